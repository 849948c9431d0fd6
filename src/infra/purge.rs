//! PURGE fan-out to every configured Varnish backend.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, histogram};
use reqwest::{Client, Method};
use tracing::{info, warn};

use crate::application::invalidation::PurgeBackend;
use crate::domain::{
    keys::CacheTag,
    purge::{PURGE_SUCCESS_CODES, PurgeResult, PurgeTarget, PurgeReport},
};

pub use crate::domain::purge::PurgeError;

use super::error::InfraError;

pub const PURGE_METHOD: &str = "PURGE";
const METRIC_PURGE_TOTAL: &str = "varnish_xkey_purge_total";
const METRIC_PURGE_MS: &str = "varnish_xkey_purge_ms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub targets: Vec<PurgeTarget>,
    /// Per request; a broadcast has no overall deadline.
    pub timeout: Duration,
    pub protection: bool,
    pub cdn_endpoint: Option<PurgeTarget>,
}

impl BroadcastConfig {
    pub fn new(targets: Vec<PurgeTarget>, timeout: Duration) -> Self {
        Self {
            targets,
            timeout,
            protection: false,
            cdn_endpoint: None,
        }
    }

    pub fn with_protection(mut self, cdn_endpoint: PurgeTarget) -> Self {
        self.protection = true;
        self.cdn_endpoint = Some(cdn_endpoint);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpPurgeBroadcaster {
    client: Client,
    method: Method,
    config: BroadcastConfig,
}

impl HttpPurgeBroadcaster {
    pub fn new(config: BroadcastConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("varnish-xkey/", env!("CARGO_PKG_VERSION")))
            // Backends are addressed by IP and frequently sit behind self-signed certificates.
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| InfraError::http_client(describe_transport_error(&err)))?;
        let method = Method::from_bytes(PURGE_METHOD.as_bytes())
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            method,
            config,
        })
    }

    /// `targets` plus the CDN endpoint when protection is on and it is not
    /// already listed.
    pub fn effective_targets(&self, targets: &[PurgeTarget]) -> Vec<PurgeTarget> {
        let mut effective = targets.to_vec();
        if self.config.protection
            && let Some(cdn) = &self.config.cdn_endpoint
            && !effective.contains(cdn)
        {
            effective.push(cdn.clone());
        }
        effective
    }

    /// Send one PURGE per target concurrently. Results keep target order and
    /// individual failures never abort the others.
    pub async fn broadcast(
        &self,
        tag: &CacheTag,
        targets: &[PurgeTarget],
    ) -> Result<PurgeReport, PurgeError> {
        if targets.is_empty() {
            return Err(PurgeError::NoTargets);
        }

        let targets = self.effective_targets(targets);
        let results = join_all(targets.into_iter().map(|target| self.purge_one(tag, target))).await;
        Ok(PurgeReport {
            tag: tag.clone(),
            results,
        })
    }

    async fn purge_one(&self, tag: &CacheTag, target: PurgeTarget) -> PurgeResult {
        let url = target.purge_url(tag);
        let started_at = Instant::now();

        let response = self
            .client
            .request(self.method.clone(), &url)
            .timeout(self.config.timeout)
            .send()
            .await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                if PURGE_SUCCESS_CODES.contains(&status.as_u16()) {
                    PurgeResult::succeeded(target, url, status.as_u16())
                } else {
                    let reason = status.canonical_reason().unwrap_or_default();
                    let message = format!("{} {reason}", status.as_u16());
                    PurgeResult::failed(target, url, Some(status.as_u16()), message.trim_end())
                }
            }
            Err(err) => PurgeResult::failed(target, url, None, describe_transport_error(&err)),
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        let outcome = if result.success { "success" } else { "failure" };
        counter!(METRIC_PURGE_TOTAL, "outcome" => outcome).increment(1);
        histogram!(METRIC_PURGE_MS).record(elapsed_ms);

        if result.success {
            info!(
                target = "varnish_xkey::purge",
                backend = %result.target,
                url = %result.url,
                status = result.status,
                elapsed_ms,
                "Purge accepted"
            );
        } else {
            warn!(
                target = "varnish_xkey::purge",
                backend = %result.target,
                url = %result.url,
                status = result.status,
                error = result.message.as_deref().unwrap_or_default(),
                elapsed_ms,
                "Purge failed"
            );
        }
        result
    }
}

#[async_trait]
impl PurgeBackend for HttpPurgeBroadcaster {
    async fn purge(&self, tag: &CacheTag) -> Result<PurgeReport, PurgeError> {
        self.broadcast(tag, &self.config.targets).await
    }
}

/// The top-level reqwest message rarely names the cause, so walk the chain.
fn describe_transport_error(error: &reqwest::Error) -> String {
    let mut message = if error.is_timeout() {
        format!("timed out: {error}")
    } else {
        error.to_string()
    };
    let mut current = error.source();
    while let Some(inner) = current {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        current = inner.source();
    }
    message
}
