use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::error::ErrorReport;
use crate::logs::ErrorLogEntry;
use crate::middleware::AuthUser;

/// Records failed requests in the error log. Auth failures are left out;
/// the client handles those by re-authenticating.
pub async fn record_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let url = format!("{} {}", request.method(), request.uri());
    let response = next.run(request).await;

    let status = response.status();
    let recordable = status.is_server_error()
        || (status.is_client_error() && status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN);
    if !recordable {
        return response;
    }

    let report = response.extensions().get::<ErrorReport>().cloned();
    let user = response.extensions().get::<AuthUser>().map(|u| u.username.clone());

    let (code, message, dev_message) = match report {
        Some(report) => (report.code.to_string(), report.message, report.kind.map(str::to_string)),
        None => (
            status.as_str().to_string(),
            status.canonical_reason().unwrap_or("request failed").to_string(),
            None,
        ),
    };

    state
        .errors
        .record(ErrorLogEntry::new(code, message, dev_message, Some(url), user))
        .await;

    response
}
