//! Session marker cookie and the forced-logout round trip.
//!
//! Varnish cannot see the CMS session, so a marker cookie is set on login and
//! the VCL bypasses the cache while it is present. A visitor whose CMS
//! session expired but who still carries the marker is sent through the
//! logout endpoint once so the marker gets cleared.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use time::{Duration, OffsetDateTime};
use url::{Url, form_urlencoded};

/// Lifetime of the marker cookie.
pub const MARKER_LIFETIME: Duration = Duration::days(100);
pub const DEFAULT_LOGOUT_PATH: &str = "/varnish-logout";
pub const REDIRECT_PARAM: &str = "redirect_to";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` disables the marker entirely.
    pub cookie_name: Option<String>,
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    pub logout_path: String,
    pub home_url: Url,
}

#[derive(Debug, Clone)]
pub struct SessionGate {
    config: SessionConfig,
}

impl SessionGate {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.cookie_name().is_some()
    }

    pub fn logout_path(&self) -> &str {
        &self.config.logout_path
    }

    pub fn on_login(&self) -> Option<Cookie<'static>> {
        self.on_login_at(OffsetDateTime::now_utc())
    }

    pub fn on_login_at(&self, now: OffsetDateTime) -> Option<Cookie<'static>> {
        let name = self.cookie_name()?;
        Some(self.marker(name, "1", now + MARKER_LIFETIME, None))
    }

    pub fn on_logout(&self) -> Option<Cookie<'static>> {
        self.on_logout_at(OffsetDateTime::now_utc())
    }

    pub fn on_logout_at(&self, now: OffsetDateTime) -> Option<Cookie<'static>> {
        let name = self.cookie_name()?;
        Some(self.marker(name, "", now - MARKER_LIFETIME, Some(Duration::ZERO)))
    }

    /// A session counts as active when either signal says so.
    pub fn is_active(&self, cookie_present: bool, user_authenticated: bool) -> bool {
        cookie_present || user_authenticated
    }

    pub fn cookie_present(&self, headers: &HeaderMap) -> bool {
        let Some(name) = self.cookie_name() else {
            return false;
        };
        CookieJar::from_headers(headers)
            .get(name)
            .is_some_and(|cookie| !cookie.value().is_empty())
    }

    /// Where to send a visitor whose marker outlived their CMS session.
    pub fn reconcile(
        &self,
        path_and_query: &str,
        cookie_present: bool,
        user_authenticated: bool,
    ) -> Option<String> {
        self.cookie_name()?;
        let path = path_and_query
            .split_once('?')
            .map_or(path_and_query, |(path, _)| path);
        if path == self.config.logout_path || user_authenticated || !cookie_present {
            return None;
        }

        let original = self
            .config
            .home_url
            .join(path_and_query)
            .map(String::from)
            .unwrap_or_else(|_| path_and_query.to_string());
        let encoded: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
        Some(format!(
            "{}?{REDIRECT_PARAM}={encoded}",
            self.config.logout_path
        ))
    }

    /// Safe destination after logout: a local path or a URL on the home host,
    /// otherwise the home URL.
    pub fn logout_target(&self, redirect_to: Option<&str>) -> String {
        let home = self.config.home_url.as_str().to_string();
        let Some(candidate) = redirect_to.map(str::trim).filter(|value| !value.is_empty()) else {
            return home;
        };

        if candidate.starts_with('/') {
            let protocol_relative = candidate.starts_with("//") || candidate.starts_with("/\\");
            return if protocol_relative {
                home
            } else {
                candidate.to_string()
            };
        }

        match Url::parse(candidate) {
            Ok(url)
                if matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some()
                    && url.host_str() == self.config.home_url.host_str() =>
            {
                url.into()
            }
            _ => home,
        }
    }

    fn cookie_name(&self) -> Option<&str> {
        self.config
            .cookie_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    fn marker(
        &self,
        name: &str,
        value: &str,
        expires: OffsetDateTime,
        max_age: Option<Duration>,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path(self.config.cookie_path.clone())
            .http_only(true)
            .secure(false)
            .expires(expires);
        if let Some(domain) = &self.config.cookie_domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(max_age) = max_age {
            builder = builder.max_age(max_age);
        }
        builder.build()
    }
}
