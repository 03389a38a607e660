use axum::{http::StatusCode, response::IntoResponse, response::Response};

pub(super) async fn admin_health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
