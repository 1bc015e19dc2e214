use async_trait::async_trait;
use rja_core::{apply_url_key, Domain, Job};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::jobs::{JobPage, JobQuery, JobStore, StoreError, UpsertOutcome};

const JOB_COLUMNS: &str = "id, title, company, description, apply_url, location, remote, \
     salary_min, salary_max, domain, source, source_job_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn salary_from_row(row: &PgRow, column: &str) -> Result<Option<u32>, StoreError> {
    let value: Option<i64> = row.try_get(column)?;
    value
        .map(|v| u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("{column}={v}"))))
        .transpose()
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let domain: String = row.try_get("domain")?;
    let domain: Domain = domain
        .parse()
        .map_err(|err| StoreError::Corrupt(format!("{err}")))?;
    Ok(Job {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        description: row.try_get("description")?,
        apply_url: row.try_get("apply_url")?,
        location: row.try_get("location")?,
        remote: row.try_get("remote")?,
        salary_min: salary_from_row(row, "salary_min")?,
        salary_max: salary_from_row(row, "salary_max")?,
        domain,
        source: row.try_get("source")?,
        source_job_id: row.try_get("source_job_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn is_primary_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505") && db.constraint() == Some("jobs_pkey")
        }
        _ => false,
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn load_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn upsert(&self, job: &Job) -> Result<UpsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, apply_url_key, title, company, description, apply_url, location, remote,
                salary_min, salary_max, domain, source, source_job_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (apply_url_key) DO UPDATE
               SET title = EXCLUDED.title,
                   company = EXCLUDED.company,
                   description = EXCLUDED.description,
                   apply_url = EXCLUDED.apply_url,
                   location = EXCLUDED.location,
                   remote = EXCLUDED.remote,
                   salary_min = EXCLUDED.salary_min,
                   salary_max = EXCLUDED.salary_max,
                   domain = EXCLUDED.domain,
                   source = EXCLUDED.source,
                   source_job_id = EXCLUDED.source_job_id,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&job.id)
        .bind(job.apply_url_key())
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.description)
        .bind(&job.apply_url)
        .bind(&job.location)
        .bind(job.remote)
        .bind(job.salary_min.map(i64::from))
        .bind(job.salary_max.map(i64::from))
        .bind(job.domain.as_str())
        .bind(&job.source)
        .bind(&job.source_job_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let inserted: bool = row.try_get("inserted")?;
                Ok(if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                })
            }
            Err(err) if is_primary_key_violation(&err) => {
                let existing: Option<String> =
                    sqlx::query_scalar("SELECT apply_url FROM jobs WHERE id = $1")
                        .bind(&job.id)
                        .fetch_optional(&self.pool)
                        .await?;
                Err(StoreError::IdConflict {
                    id: job.id.clone(),
                    existing_apply_url: existing.unwrap_or_default(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_apply_url(&self, apply_url: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE apply_url_key = $1"
        ))
        .bind(apply_url_key(apply_url))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, StoreError> {
        let filter = r#"
            WHERE ($1::text IS NULL OR domain = $1)
              AND ($2::boolean IS NULL OR remote = $2)
              AND ($3::text IS NULL OR title ILIKE $3 OR company ILIKE $3)
        "#;
        let domain = query.domain.map(Domain::as_str);
        let search = query.search_term().map(escape_like);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM jobs {filter}"))
            .bind(domain)
            .bind(query.remote)
            .bind(search.as_deref())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs {filter} ORDER BY created_at DESC, id LIMIT $4 OFFSET $5"
        ))
        .bind(domain)
        .bind(query.remote)
        .bind(search.as_deref())
        .bind(i64::from(query.effective_limit()))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage::new(
            jobs,
            query,
            u64::try_from(total).unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("rust"), "%rust%");
        assert_eq!(escape_like("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }
}
