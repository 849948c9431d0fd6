//! Response headers that drive the Varnish VCL.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::domain::{error::DomainError, keys::CacheTag};

pub const HEADER_TTL: &str = "X-VC-TTL";
pub const HEADER_ENABLED: &str = "X-VC-Enabled";
pub const HEADER_DEBUG: &str = "X-VC-Debug";
pub const HEADER_CACHEABLE: &str = "X-VC-Cacheable";
pub const HEADER_XKEY: &str = "xkey";

pub const LOGGED_IN_REASON: &str = "NO:User is logged in";
/// Lifetime given to redirect responses.
pub const REDIRECT_TTL: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub name: String,
    pub value: String,
    /// Appended next to other values instead of replacing them.
    pub multivalue: bool,
}

/// Ordered header list. Single-valued names are unique (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: Vec<ResponseHeader>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single-valued header, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|header| !header.multivalue && header.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.value = value,
            None => self.headers.push(ResponseHeader {
                name,
                value,
                multivalue: false,
            }),
        }
        self
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push(ResponseHeader {
            name: name.into(),
            value: value.into(),
            multivalue: true,
        });
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.headers
            .retain(|header| !header.name.eq_ignore_ascii_case(name));
        self
    }

    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseHeader> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Write the set into `map`: single-valued headers overwrite, multivalue
    /// headers are appended. Nothing is written unless every header is valid.
    pub fn apply(&self, map: &mut HeaderMap) -> Result<(), DomainError> {
        let encoded = self
            .headers
            .iter()
            .map(|header| {
                let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|err| {
                    DomainError::validation(format!(
                        "invalid header name `{}`: {err}",
                        header.name
                    ))
                })?;
                let value = HeaderValue::from_str(&header.value).map_err(|err| {
                    DomainError::validation(format!("invalid value for `{}`: {err}", header.name))
                })?;
                Ok((name, value, header.multivalue))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        for (name, value, multivalue) in encoded {
            if multivalue {
                map.append(name, value);
            } else {
                map.insert(name, value);
            }
        }
        Ok(())
    }
}

/// Everything the emitter needs to know about one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderInput {
    pub enabled: bool,
    pub debug: bool,
    pub session_active: bool,
    pub ttl: u32,
    pub tags: Vec<CacheTag>,
}

/// Host hook that may rewrite the single-valued headers before tags are added.
pub trait HeaderOverride: Send + Sync {
    fn override_headers(&self, headers: HeaderSet) -> HeaderSet;
}

impl<F> HeaderOverride for F
where
    F: Fn(HeaderSet) -> HeaderSet + Send + Sync,
{
    fn override_headers(&self, headers: HeaderSet) -> HeaderSet {
        self(headers)
    }
}

#[derive(Clone, Default)]
pub struct HeaderEmitter {
    override_hook: Option<Arc<dyn HeaderOverride>>,
}

impl HeaderEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, hook: Arc<dyn HeaderOverride>) -> Self {
        self.override_hook = Some(hook);
        self
    }

    pub fn build(&self, input: &HeaderInput) -> HeaderSet {
        let mut headers = HeaderSet::new();
        headers
            .set(HEADER_TTL, "0")
            .set(HEADER_ENABLED, "false")
            .set(HEADER_DEBUG, "false");

        if input.enabled {
            headers.set(HEADER_ENABLED, "true");
            if input.session_active {
                headers.set(HEADER_CACHEABLE, LOGGED_IN_REASON);
            } else {
                headers.set(HEADER_TTL, input.ttl.to_string());
            }
            if input.debug {
                headers.set(HEADER_DEBUG, "true");
            }
        }

        let mut headers = match &self.override_hook {
            Some(hook) => hook.override_headers(headers),
            None => headers,
        };

        for tag in &input.tags {
            headers.append(HEADER_XKEY, tag.as_str());
        }
        headers
    }

    /// Headers for a redirect response, whatever the page would have used.
    pub fn redirect(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        headers.set(HEADER_TTL, REDIRECT_TTL.to_string());
        headers
    }

    /// Headers for the logout endpoint, which must never be cached.
    pub fn logout(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        headers.set(HEADER_TTL, "0");
        headers
    }
}

pub fn build_headers(input: &HeaderInput) -> HeaderSet {
    HeaderEmitter::new().build(input)
}
