use std::path::{Path, PathBuf};

use regex::Regex;
use rja_core::{Domain, Job, UnknownDomain};
use serde::Deserialize;
use thiserror::Error;

/// Rules shipped with the binary.
pub const DEFAULT_RULES_YAML: &str = include_str!("../../../rules/domains.yaml");

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing rules: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    UnknownDomain(#[from] UnknownDomain),
    #[error("`Other` is the fallback domain and cannot have a rule")]
    FallbackRule,
    #[error("rule for {0} has no keywords")]
    EmptyRule(Domain),
    #[error("compiling matcher: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSpec {
    domain: String,
    contains_any: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DomainRule {
    pub domain: Domain,
    matcher: Regex,
}

impl DomainRule {
    /// Case-insensitive match of any keyword, bounded by non-alphanumerics
    /// so that `c#`, `.net` and `ci/cd` work as keywords.
    pub fn new(domain: Domain, keywords: &[String]) -> Result<Self, RulesError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(RulesError::EmptyRule(domain));
        }
        let pattern = format!(
            r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{})(?:$|[^\p{{L}}\p{{N}}])",
            alternatives.join("|")
        );
        Ok(Self {
            domain,
            matcher: Regex::new(&pattern)?,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// Ordered rule list; the first matching rule decides.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<DomainRule>,
}

impl Classifier {
    pub fn from_rules(rules: Vec<DomainRule>) -> Self {
        Self { rules }
    }

    pub fn from_yaml(text: &str) -> Result<Self, RulesError> {
        let file: RulesFile = serde_yaml::from_str(text)?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            let domain: Domain = rule.domain.parse()?;
            if domain == Domain::Other {
                return Err(RulesError::FallbackRule);
            }
            rules.push(DomainRule::new(domain, &rule.contains_any)?);
        }
        Ok(Self { rules })
    }

    pub fn builtin() -> Result<Self, RulesError> {
        Self::from_yaml(DEFAULT_RULES_YAML)
    }

    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn rules(&self) -> &[DomainRule] {
        &self.rules
    }

    pub fn classify(&self, title: &str, description: &str) -> Domain {
        self.rules
            .iter()
            .find(|rule| rule.matches(title) || rule.matches(description))
            .map(|rule| rule.domain)
            .unwrap_or(Domain::Other)
    }

    pub fn classify_job(&self, job: &Job) -> Domain {
        self.classify(&job.title, &job.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> Classifier {
        Classifier::builtin().unwrap()
    }

    #[test]
    fn builtin_rules_follow_priority_order() {
        let order: Vec<Domain> = builtin().rules().iter().map(|r| r.domain).collect();
        assert_eq!(
            order,
            [
                Domain::CloudAws,
                Domain::DevOps,
                Domain::DataMl,
                Domain::Java,
                Domain::Qa,
                Domain::Pm,
                Domain::Frontend,
                Domain::Backend,
            ]
        );
    }

    #[test]
    fn earlier_rule_wins_over_later_match() {
        let c = builtin();
        assert_eq!(
            c.classify(
                "Sr Backend Engineer",
                "Run services on Kubernetes in AWS"
            ),
            Domain::CloudAws
        );
        assert_eq!(c.classify("Platform Engineer", "kubernetes, golang"), Domain::DevOps);
        assert_eq!(c.classify("Backend Engineer", "Golang and PostgreSQL"), Domain::Backend);
    }

    #[test]
    fn keywords_respect_word_boundaries() {
        let c = builtin();
        assert_eq!(c.classify("HTML email designer", ""), Domain::Frontend);
        assert_eq!(c.classify("JavaScript Developer", ""), Domain::Frontend);
        assert_eq!(c.classify("Trusted advisor", ""), Domain::Other);
        assert_eq!(c.classify("Engineer", "We ship C# services"), Domain::Backend);
        assert_eq!(c.classify("ASP.NET Developer", ""), Domain::Backend);
        assert_eq!(c.classify("Engineer", "Own our CI/CD"), Domain::DevOps);
    }

    #[test]
    fn unmatched_text_is_other() {
        assert_eq!(builtin().classify("Office Manager", "Keep the lights on."), Domain::Other);
        assert_eq!(builtin().classify("", ""), Domain::Other);
    }

    #[test]
    fn unknown_domains_fail_at_load() {
        let err = Classifier::from_yaml(
            "version: 1\nrules:\n  - domain: Blockchain\n    contains_any: [solidity]\n",
        )
        .unwrap_err();
        assert!(matches!(err, RulesError::UnknownDomain(_)));

        let err = Classifier::from_yaml(
            "version: 1\nrules:\n  - domain: Other\n    contains_any: [misc]\n",
        )
        .unwrap_err();
        assert!(matches!(err, RulesError::FallbackRule));
    }
}
