//! Purge targets and per-target outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::DomainError;
use super::keys::CacheTag;

/// Status codes a Varnish backend returns for an accepted purge.
pub const PURGE_SUCCESS_CODES: [u16; 2] = [200, 201];

/// A cache backend reachable over plain HTTP, written `host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PurgeTarget(String);

impl PurgeTarget {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("purge target must not be empty"));
        }
        if trimmed.contains("://") {
            return Err(DomainError::validation(format!(
                "purge target `{trimmed}` must be host[:port] without a scheme"
            )));
        }
        if trimmed.contains('/') || trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "purge target `{trimmed}` must not contain a path or whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn purge_url(&self, tag: &CacheTag) -> String {
        format!("http://{}/{}", self.0, tag.as_str())
    }
}

impl TryFrom<String> for PurgeTarget {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PurgeTarget> for String {
    fn from(target: PurgeTarget) -> Self {
        target.0
    }
}

impl fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one PURGE request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeResult {
    pub target: PurgeTarget,
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PurgeResult {
    pub fn succeeded(target: PurgeTarget, url: String, status: u16) -> Self {
        Self {
            target,
            url,
            success: true,
            status: Some(status),
            message: None,
        }
    }

    pub fn failed(
        target: PurgeTarget,
        url: String,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target,
            url,
            success: false,
            status,
            message: Some(message.into()),
        }
    }
}

/// Results of one broadcast, in target order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub tag: CacheTag,
    pub results: Vec<PurgeResult>,
}

impl PurgeReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &PurgeResult> {
        self.results.iter().filter(|result| result.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PurgeResult> {
        self.results.iter().filter(|result| !result.success)
    }

    /// True when every target accepted the purge.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |results: Vec<&PurgeResult>| {
            results
                .iter()
                .map(|result| result.target.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ok: Vec<_> = self.succeeded().collect();
        let failed: Vec<_> = self.failed().collect();

        write!(f, "purge `{}`", self.tag)?;
        if !ok.is_empty() {
            write!(f, "; succeeded on {}", join(ok))?;
        }
        if !failed.is_empty() {
            write!(f, "; failed on ")?;
            let details: Vec<String> = failed
                .iter()
                .map(|result| match result.message.as_deref() {
                    Some(message) => format!("{} ({message})", result.target),
                    None => result.target.to_string(),
                })
                .collect();
            f.write_str(&details.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PurgeError {
    #[error("no purge targets configured")]
    NoTargets,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(value: &str) -> PurgeTarget {
        PurgeTarget::parse(value).expect("valid target")
    }

    #[test]
    fn targets_are_host_and_port_only() {
        assert_eq!(target(" 10.0.0.1:6081 ").as_str(), "10.0.0.1:6081");
        assert!(PurgeTarget::parse("").is_err());
        assert!(PurgeTarget::parse("http://cache:80").is_err());
        assert!(PurgeTarget::parse("cache/purge").is_err());
        assert!(PurgeTarget::parse("cache 1").is_err());
    }

    #[test]
    fn purge_url_appends_tag_as_path() {
        let tag = CacheTag::raw("site_42").expect("tag");
        assert_eq!(target("cache:6081").purge_url(&tag), "http://cache:6081/site_42");
    }

    #[test]
    fn report_summarises_mixed_outcomes() {
        let a = target("a:80");
        let b = target("b:80");
        let report = PurgeReport {
            tag: CacheTag::raw("site").expect("tag"),
            results: vec![
                PurgeResult::succeeded(a.clone(), "http://a:80/site".into(), 200),
                PurgeResult::failed(b.clone(), "http://b:80/site".into(), Some(503), "503 Service Unavailable"),
            ],
        };

        assert!(!report.is_success());
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(
            report.to_string(),
            "purge `site`; succeeded on a:80; failed on b:80 (503 Service Unavailable)"
        );
    }

    #[test]
    fn targets_deserialize_through_validation() {
        let parsed: Result<PurgeTarget, _> = serde_json::from_str("\"cache:6081\"");
        assert!(parsed.is_ok());
        let parsed: Result<PurgeTarget, _> = serde_json::from_str("\"https://cache\"");
        assert!(parsed.is_err());
    }
}
