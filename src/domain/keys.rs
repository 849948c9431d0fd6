//! Cache tag (xkey) composition.
//!
//! Every response cached by Varnish carries one or more `xkey` tags. The site
//! tag lets an operator flush the whole tenant; the content tag targets one
//! item.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Marker carried by ids that are already qualified for a multisite network.
pub const MULTISITE_MARKER: &str = "multisite_";

/// Characters that would let a value escape its segment of the purge URL.
const FORBIDDEN_IN_SEGMENT: [char; 4] = ['/', '?', '#', '\\'];

/// Tags travel as one path segment of `PURGE http://<target>/<tag>`.
fn check_segment(what: &str, value: &str) -> Result<(), DomainError> {
    if value.chars().any(char::is_whitespace) || value.contains(FORBIDDEN_IN_SEGMENT) {
        return Err(DomainError::validation(format!(
            "{what} `{value}` must not contain whitespace, `/`, `?`, `#` or `\\`"
        )));
    }
    Ok(())
}

/// Identifies the tenant in every tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SiteKey(String);

impl SiteKey {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("site key must not be empty"));
        }
        check_segment("site key", trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawContentId", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// A blank id is allowed and stands for "no content".
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        check_segment("content id", trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the id was already qualified for a multisite network.
    pub fn is_multisite_qualified(&self) -> bool {
        self.0.to_ascii_lowercase().contains(MULTISITE_MARKER)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ContentId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

/// CMS exports carry numeric ids; hand-written payloads often use strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContentId {
    Number(u64),
    Text(String),
}

impl TryFrom<RawContentId> for ContentId {
    type Error = DomainError;

    fn try_from(raw: RawContentId) -> Result<Self, Self::Error> {
        match raw {
            RawContentId::Number(value) => Ok(ContentId::from(value)),
            RawContentId::Text(value) => ContentId::new(value),
        }
    }
}

/// A tag understood by the Varnish xkey vmod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CacheTag(String);

impl CacheTag {
    /// Tag covering every response of the site.
    pub fn site(site: &SiteKey) -> Self {
        Self(site.as_str().to_string())
    }

    /// Wrap an operator-supplied tag without composing it.
    pub fn raw(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("tag must not be empty"));
        }
        check_segment("tag", trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compose the tag for `content` within `site`.
pub fn make_tag(site: &SiteKey, content: Option<&ContentId>) -> CacheTag {
    match content {
        None => CacheTag::site(site),
        Some(id) if id.is_empty() => CacheTag::site(site),
        Some(id) if id.is_multisite_qualified() => CacheTag(id.as_str().to_string()),
        Some(id) => CacheTag(format!("{}_{}", site.as_str(), id.as_str())),
    }
}

/// Tags a rendered response should carry, site tag first.
pub fn tags_for(site: &SiteKey, content: Option<&ContentId>) -> Vec<CacheTag> {
    let site_tag = CacheTag::site(site);
    let content_tag = make_tag(site, content);
    if content_tag == site_tag {
        vec![site_tag]
    } else {
        vec![site_tag, content_tag]
    }
}
