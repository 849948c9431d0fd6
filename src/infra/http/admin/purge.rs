use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::{
    error::{AppError, HttpError},
    invalidation::ContentEvent,
};
use crate::domain::keys::{CacheTag, ContentId};
use crate::domain::purge::PurgeReport;

use super::AdminState;

#[derive(Debug, Deserialize)]
pub(super) struct PurgeRequest {
    tag: String,
}

pub(super) async fn admin_purge_tag(
    State(state): State<AdminState>,
    payload: Result<Json<PurgeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return HttpError::from(rejection).into_response(),
    };
    let tag = match CacheTag::raw(request.tag) {
        Ok(tag) => tag,
        Err(err) => return AppError::from(err).into_response(),
    };
    report_response(state.invalidator.purge_tag(&tag).await)
}

pub(super) async fn admin_flush_site(State(state): State<AdminState>) -> Response {
    report_response(state.invalidator.flush(None).await)
}

pub(super) async fn admin_flush_content(
    State(state): State<AdminState>,
    Path(content_id): Path<String>,
) -> Response {
    let content_id = match ContentId::new(content_id) {
        Ok(content_id) => content_id,
        Err(err) => return AppError::from(err).into_response(),
    };
    report_response(state.invalidator.flush(Some(&content_id)).await)
}

/// Mixed outcomes still answer 200; the body says which backends failed.
pub(super) async fn admin_content_event(
    State(state): State<AdminState>,
    payload: Result<Json<ContentEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return HttpError::from(rejection).into_response(),
    };
    match state.invalidator.handle(&event).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

fn report_response<E>(outcome: Result<PurgeReport, E>) -> Response
where
    AppError: From<E>,
{
    match outcome {
        Ok(report) => Json(report).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}
