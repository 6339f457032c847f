use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Builds the `meta.k8s.io/v1 Status` failure body clients expect from
/// an apiserver. `kube` and `kubectl` both parse these fields.
pub fn status_failure(code: StatusCode, reason: &str, message: String) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code.as_u16(),
    });
    (code, Json(body)).into_response()
}

pub fn not_found(message: String) -> Response {
    status_failure(StatusCode::NOT_FOUND, "NotFound", message)
}

pub fn already_exists(message: String) -> Response {
    status_failure(StatusCode::CONFLICT, "AlreadyExists", message)
}

pub fn invalid(message: String) -> Response {
    status_failure(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", message)
}

pub fn internal(message: String) -> Response {
    status_failure(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
}

/// Success Status returned from deletes.
pub fn status_success(message: String) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Success",
        "message": message,
    });
    (StatusCode::OK, Json(body)).into_response()
}
