//! Choosing and finishing the final response

use serde_json::json;

use crate::action::{ActionId, ActionOutput};
use crate::response::{ActionResponse, Headers, CONTENT_TYPE_JSON, STATUS_NOT_FOUND, STATUS_OK};
use crate::transfer::StorePayload;

/// Pick the response for a settled request.
///
/// In order: the top-level handler's own response, the first response any
/// invocation produced (completion order), or the outbound store payload
/// as a JSON body.
pub fn choose_response(
    top_level: ActionOutput,
    first_candidate: Option<ActionResponse>,
    payload: impl FnOnce() -> StorePayload,
) -> ActionResponse {
    match top_level {
        ActionOutput::Response(response) => response,
        ActionOutput::Value(_) => first_candidate.unwrap_or_else(|| store_response(STATUS_OK, &payload())),
    }
}

/// Default response carrying the outbound store payload.
pub fn store_response(status: u16, payload: &StorePayload) -> ActionResponse {
    ActionResponse::new(status)
        .with_header("content-type", CONTENT_TYPE_JSON)
        .with_body(payload.encode())
}

/// Response for an action id with no registered handler.
pub fn not_found(action: &ActionId, payload: &StorePayload) -> ActionResponse {
    let body = json!({
        "error": format!("action {:?} was not found", action.as_str()),
        "action": action.as_str(),
        "store": payload,
    });

    ActionResponse::new(STATUS_NOT_FOUND)
        .with_header("content-type", CONTENT_TYPE_JSON)
        .with_body(body.to_string())
}

/// Merge page-level headers into the response, overwriting on collision.
pub fn merge_headers(response: &mut ActionResponse, headers: &Headers) {
    response.headers.merge(headers);
}

/// Signal the client to reset the submitted form.
pub fn apply_reset(response: &mut ActionResponse, reset_header: &str) {
    response.headers.set(reset_header, "1");
}
