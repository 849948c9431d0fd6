//! Turns content lifecycle events and operator requests into purges.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    error::DomainError,
    keys::{CacheTag, ContentId, SiteKey, make_tag},
    purge::{PurgeError, PurgeReport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentEventKind {
    Saved,
    Edited,
    Published,
    Deleted,
    Trashed,
}

impl ContentEventKind {
    pub const ALL: [ContentEventKind; 5] = [
        ContentEventKind::Saved,
        ContentEventKind::Edited,
        ContentEventKind::Published,
        ContentEventKind::Deleted,
        ContentEventKind::Trashed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentEventKind::Saved => "saved",
            ContentEventKind::Edited => "edited",
            ContentEventKind::Published => "published",
            ContentEventKind::Deleted => "deleted",
            ContentEventKind::Trashed => "trashed",
        }
    }
}

impl FromStr for ContentEventKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown content event `{value}`")))
    }
}

impl fmt::Display for ContentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification from the CMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub kind: ContentEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<ContentId>,
}

/// Something that can invalidate a tag on every cache backend.
#[async_trait]
pub trait PurgeBackend: Send + Sync {
    async fn purge(&self, tag: &CacheTag) -> Result<PurgeReport, PurgeError>;
}

#[derive(Clone)]
pub struct CacheInvalidator {
    site: SiteKey,
    backend: Arc<dyn PurgeBackend>,
    events: BTreeSet<ContentEventKind>,
}

impl CacheInvalidator {
    pub fn new(site: SiteKey, backend: Arc<dyn PurgeBackend>) -> Self {
        Self {
            site,
            backend,
            events: ContentEventKind::ALL.into_iter().collect(),
        }
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = ContentEventKind>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn handles(&self, kind: ContentEventKind) -> bool {
        self.events.contains(&kind)
    }

    /// Purge for a lifecycle event. `Ok(None)` when the event kind is not
    /// subscribed.
    pub async fn handle(&self, event: &ContentEvent) -> Result<Option<PurgeReport>, PurgeError> {
        if !self.handles(event.kind) {
            info!(
                target = "varnish_xkey::invalidation",
                event = %event.kind,
                "Ignoring unsubscribed content event"
            );
            return Ok(None);
        }
        self.flush(event.content_id.as_ref()).await.map(Some)
    }

    /// Purge one content item, or the whole site when no id is given.
    pub async fn flush(&self, content: Option<&ContentId>) -> Result<PurgeReport, PurgeError> {
        let tag = make_tag(&self.site, content);
        self.purge_tag(&tag).await
    }

    /// Purge a tag as given, without composing it.
    pub async fn purge_tag(&self, tag: &CacheTag) -> Result<PurgeReport, PurgeError> {
        let report = self.backend.purge(tag).await?;
        if report.is_success() {
            info!(
                target = "varnish_xkey::invalidation",
                tag = %tag,
                targets = report.results.len(),
                "Cache invalidated"
            );
        } else {
            warn!(
                target = "varnish_xkey::invalidation",
                tag = %tag,
                summary = %report,
                "Cache invalidation partially failed"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::purge::{PurgeResult, PurgeTarget};

    #[derive(Default)]
    struct RecordingBackend {
        tags: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PurgeBackend for RecordingBackend {
        async fn purge(&self, tag: &CacheTag) -> Result<PurgeReport, PurgeError> {
            self.tags
                .lock()
                .expect("tags lock")
                .push(tag.as_str().to_string());
            let target = PurgeTarget::parse("cache:80").expect("target");
            let url = target.purge_url(tag);
            Ok(PurgeReport {
                tag: tag.clone(),
                results: vec![PurgeResult::succeeded(target, url, 200)],
            })
        }
    }

    fn invalidator(backend: Arc<RecordingBackend>) -> CacheInvalidator {
        CacheInvalidator::new(SiteKey::new("superot").expect("site"), backend)
    }

    #[tokio::test]
    async fn events_purge_the_content_tag() {
        let backend = Arc::new(RecordingBackend::default());
        let invalidator = invalidator(backend.clone());

        let report = invalidator
            .handle(&ContentEvent {
                kind: ContentEventKind::Published,
                content_id: Some(ContentId::from(42_u64)),
            })
            .await
            .expect("purge")
            .expect("subscribed");

        assert!(report.is_success());
        assert_eq!(*backend.tags.lock().expect("tags lock"), ["superot_42"]);
    }

    #[tokio::test]
    async fn unsubscribed_events_are_ignored() {
        let backend = Arc::new(RecordingBackend::default());
        let invalidator = invalidator(backend.clone()).with_events([ContentEventKind::Deleted]);

        let outcome = invalidator
            .handle(&ContentEvent {
                kind: ContentEventKind::Saved,
                content_id: Some(ContentId::from(1_u64)),
            })
            .await
            .expect("no error");

        assert!(outcome.is_none());
        assert!(backend.tags.lock().expect("tags lock").is_empty());
    }

    #[tokio::test]
    async fn flush_without_id_purges_the_site() {
        let backend = Arc::new(RecordingBackend::default());
        invalidator(backend.clone())
            .flush(None)
            .await
            .expect("purge");
        assert_eq!(*backend.tags.lock().expect("tags lock"), ["superot"]);
    }

    #[test]
    fn event_kinds_parse_from_config_names() {
        assert_eq!("Trashed".parse::<ContentEventKind>().ok(), Some(ContentEventKind::Trashed));
        assert!("archived".parse::<ContentEventKind>().is_err());

        let event: ContentEvent =
            serde_json::from_str(r#"{ "kind": "edited", "content_id": 9 }"#).expect("event");
        assert_eq!(event.content_id, Some(ContentId::from(9_u64)));
    }
}
