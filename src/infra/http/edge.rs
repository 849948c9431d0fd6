//! Middleware for the public site: cache headers, session marker and the
//! forced-logout round trip.
//!
//! Handlers describe what they rendered by inserting [`CacheDirectives`] into
//! the response extensions. Authentication middleware of the host marks
//! logged-in requests with [`AuthenticatedUser`] and must run before these
//! layers.
//!
//! A response that already carries `X-VC-TTL` keeps it: the logout endpoint
//! and the forced-logout redirect pin it to `0`, so their answers stay private
//! however the layers are nested.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::application::{
    headers::{HEADER_TTL, HeaderEmitter, HeaderInput, HeaderSet},
    session::SessionGate,
    ttl::TtlResolver,
};
use crate::domain::{
    keys::{ContentId, SiteKey, tags_for},
    layout::ContentItem,
};

use super::middleware::log_responses;

/// What a handler rendered, as far as the cache is concerned.
#[derive(Debug, Clone, Default)]
pub struct CacheDirectives {
    pub content_id: Option<ContentId>,
    pub item: Option<Arc<ContentItem>>,
}

impl CacheDirectives {
    pub fn for_item(item: ContentItem) -> Self {
        Self {
            content_id: item.id.clone(),
            item: Some(Arc::new(item)),
        }
    }

    pub fn for_content(content_id: impl Into<ContentId>) -> Self {
        Self {
            content_id: Some(content_id.into()),
            item: None,
        }
    }
}

/// Request extension set by the host once a CMS session is verified.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatedUser;

/// Response extension set by login and logout handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Login,
    Logout,
}

#[derive(Clone)]
pub struct EdgeState {
    inner: Arc<EdgeInner>,
}

struct EdgeInner {
    site: SiteKey,
    enabled: bool,
    debug: bool,
    resolver: TtlResolver,
    emitter: HeaderEmitter,
    gate: SessionGate,
}

impl EdgeState {
    pub fn new(
        site: SiteKey,
        enabled: bool,
        debug: bool,
        resolver: TtlResolver,
        emitter: HeaderEmitter,
        gate: SessionGate,
    ) -> Self {
        Self {
            inner: Arc::new(EdgeInner {
                site,
                enabled,
                debug,
                resolver,
                emitter,
                gate,
            }),
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.inner.gate
    }

    pub fn emitter(&self) -> &HeaderEmitter {
        &self.inner.emitter
    }

    /// Headers for one response given what the handler reported.
    pub fn headers_for(&self, directives: &CacheDirectives, session_active: bool) -> HeaderSet {
        let inner = &self.inner;
        let ttl = if inner.enabled && !session_active {
            inner.resolver.resolve(directives.item.as_deref())
        } else {
            0
        };
        inner.emitter.build(&HeaderInput {
            enabled: inner.enabled,
            debug: inner.debug,
            session_active,
            ttl,
            tags: tags_for(&inner.site, directives.content_id.as_ref()),
        })
    }
}

pub async fn varnish_headers_layer(
    State(state): State<EdgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let gate = state.gate();
    let cookie_present = gate.cookie_present(request.headers());
    let authenticated = request.extensions().get::<AuthenticatedUser>().is_some();
    let session_active = gate.is_active(cookie_present, authenticated);

    let mut response = next.run(request).await;

    let directives = response
        .extensions()
        .get::<CacheDirectives>()
        .cloned()
        .unwrap_or_default();
    let mut headers = state.headers_for(&directives, session_active);
    if response.headers().contains_key(HEADER_TTL) {
        headers.remove(HEADER_TTL);
    } else if response.status().is_redirection() {
        for header in state.emitter().redirect().iter() {
            headers.set(header.name.clone(), header.value.clone());
        }
    }
    apply_headers(&headers, response.headers_mut());

    if let Some(transition) = response.extensions().get::<SessionTransition>().copied() {
        let cookie = match transition {
            SessionTransition::Login => gate.on_login(),
            SessionTransition::Logout => gate.on_logout(),
        };
        if let Some(cookie) = cookie {
            append_cookie(response.headers_mut(), &cookie.to_string());
        }
    }

    response
}

/// Send visitors whose marker outlived their CMS session through logout.
pub async fn force_logout_layer(
    State(state): State<EdgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let gate = state.gate();
    let cookie_present = gate.cookie_present(request.headers());
    let authenticated = request.extensions().get::<AuthenticatedUser>().is_some();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match gate.reconcile(&path_and_query, cookie_present, authenticated) {
        Some(location) => {
            debug!(
                target = "varnish_xkey::http::edge",
                path = %request.uri().path(),
                "Stale session marker, forcing logout"
            );
            // The visitor still carries the marker, so this answer is never shared.
            redirect(&location, &state.emitter().logout())
        }
        None => next.run(request).await,
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogoutQuery {
    redirect_to: Option<String>,
}

pub(crate) async fn logout(
    State(state): State<EdgeState>,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let gate = state.gate();
    let target = gate.logout_target(query.redirect_to.as_deref());
    let mut response = redirect(&target, &state.emitter().logout());
    if let Some(cookie) = gate.on_logout() {
        append_cookie(response.headers_mut(), &cookie.to_string());
    }
    response
}

/// Routes owned by the edge: the logout endpoint.
pub fn build_edge_router(state: EdgeState) -> Router {
    let logout_path = state.gate().logout_path().to_string();
    Router::new()
        .route(&logout_path, get(logout))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
}

fn redirect(location: &str, headers: &HeaderSet) -> Response {
    let location = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    let mut response = (StatusCode::FOUND, [(LOCATION, location)]).into_response();
    apply_headers(headers, response.headers_mut());
    response
}

fn apply_headers(headers: &HeaderSet, map: &mut HeaderMap) {
    if let Err(err) = headers.apply(map) {
        warn!(
            target = "varnish_xkey::http::edge",
            error = %err,
            "Dropped invalid cache headers"
        );
    }
}

fn append_cookie(map: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            map.append(SET_COOKIE, value);
        }
        Err(err) => warn!(
            target = "varnish_xkey::http::edge",
            error = %err,
            "Session marker cookie is not a valid header value"
        ),
    }
}
