use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub(super) async fn admin_health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
