//! Test utilities for action-dispatch applications
//!
//! - [`json_request`] / [`form_request`]: build inbound requests
//! - [`ActionHarness`]: an engine plus an action log of every invocation
//! - [`ResponseAssertions`]: status, header and store checks on responses
//! - Assertion macros for verifying which actions ran
//!
//! # Example
//!
//! ```ignore
//! use action_dispatch::testing::{ActionHarness, ResponseAssertions};
//!
//! let harness = ActionHarness::new().with("incA", increment);
//! let response = harness.call("incA", json!([["n", 5]]), json!([])).await?;
//!
//! response.assert_status(200);
//! assert_eq!(response.store_entry("n"), Some(json!(6)));
//! assert_invoked!(harness.invoked(), "incA");
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::action::{ActionHandler, ActionId};
use crate::action_log::{ActionLogConfig, ActionLogEntry, ActionLoggerMiddleware};
use crate::config::EngineConfig;
use crate::engine::ActionEngine;
use crate::error::Result;
use crate::registry::ActionMap;
use crate::request::{ActionRequest, FormData};
use crate::response::ActionResponse;
use crate::transfer::StorePayload;

/// URL used by requests built in this module.
pub const TEST_URL: &str = "http://localhost/";

/// Request for `action` with a structured body.
///
/// `store` is the client snapshot (`[[key, value], ...]`), `args` the
/// positional arguments.
pub fn json_request(action: &str, store: Value, args: Value) -> ActionRequest {
    let config = EngineConfig::default();
    let mut body = Map::new();
    body.insert(config.store_field.clone(), store);
    body.insert("args".to_string(), args);

    ActionRequest::new(TEST_URL)
        .with_header(&config.action_header, action)
        .with_json_body(Value::Object(body).to_string())
}

/// Request for `action` carrying a submitted form.
pub fn form_request(action: &str, form: FormData) -> ActionRequest {
    ActionRequest::new(format!("{TEST_URL}?_aid={}", urlencoding::encode(action))).with_form(form)
}

/// Test harness bundling an action map, a config and an action log.
///
/// Every named invocation is recorded, so tests can check which nested
/// actions ran and how they settled.
pub struct ActionHarness {
    actions: ActionMap,
    config: EngineConfig,
    logger: Arc<Mutex<ActionLoggerMiddleware>>,
}

impl Default for ActionHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHarness {
    pub fn new() -> Self {
        Self {
            actions: ActionMap::new(),
            config: EngineConfig::default(),
            logger: Arc::new(Mutex::new(ActionLoggerMiddleware::with_log(
                ActionLogConfig::with_capacity(1024),
            ))),
        }
    }

    /// Register a handler.
    pub fn with<H: ActionHandler>(mut self, id: impl Into<ActionId>, handler: H) -> Self {
        self.actions.register(id, handler);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine over the registered actions, logging into this harness.
    pub fn engine(&self) -> ActionEngine {
        ActionEngine::new(self.actions.clone())
            .with_config(self.config.clone())
            .with_shared_middleware(self.logger.clone())
    }

    /// Handle `request` with a fresh engine.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionResponse> {
        self.engine().handle_action(request).await
    }

    /// Invoke `action` with a client store snapshot and arguments.
    pub async fn call(&self, action: &str, store: Value, args: Value) -> Result<ActionResponse> {
        self.dispatch(json_request(action, store, args)).await
    }

    /// Ids of every invocation so far, in start order.
    pub fn invoked(&self) -> Vec<ActionId> {
        let logger = self.logger.lock();
        logger
            .log()
            .map(|log| log.entries().map(|entry| entry.action.clone()).collect())
            .unwrap_or_default()
    }

    /// Every recorded invocation, in start order.
    pub fn entries(&self) -> Vec<ActionLogEntry> {
        let logger = self.logger.lock();
        logger
            .log()
            .map(|log| log.entries().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of invocations that settled with a failure.
    pub fn failed(&self) -> Vec<ActionId> {
        let logger = self.logger.lock();
        logger
            .log()
            .map(|log| {
                log.entries()
                    .filter(|entry| entry.succeeded == Some(false))
                    .map(|entry| entry.action.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget recorded invocations.
    pub fn clear(&self) {
        if let Some(log) = self.logger.lock().log_mut() {
            log.clear();
        }
    }
}

/// Assertions on engine responses.
pub trait ResponseAssertions {
    /// Panics unless the status matches.
    fn assert_status(&self, status: u16) -> &Self;

    /// Panics unless header `name` has `value`.
    fn assert_header(&self, name: &str, value: &str) -> &Self;

    /// Panics if header `name` is present.
    fn assert_no_header(&self, name: &str) -> &Self;

    /// Body decoded as an outbound store payload.
    fn store_payload(&self) -> Option<StorePayload>;

    /// Value of `key` in the outbound store payload.
    fn store_entry(&self, key: &str) -> Option<Value>;
}

impl ResponseAssertions for ActionResponse {
    fn assert_status(&self, status: u16) -> &Self {
        assert_eq!(
            self.status,
            status,
            "unexpected status, body: {}",
            self.text()
        );
        self
    }

    fn assert_header(&self, name: &str, value: &str) -> &Self {
        assert_eq!(
            self.headers.get(name),
            Some(value),
            "header {name:?} mismatch, headers: {:?}",
            self.headers
        );
        self
    }

    fn assert_no_header(&self, name: &str) -> &Self {
        assert!(
            !self.headers.contains(name),
            "header {name:?} should be absent, headers: {:?}",
            self.headers
        );
        self
    }

    fn store_payload(&self) -> Option<StorePayload> {
        self.body_json().ok()
    }

    fn store_entry(&self, key: &str) -> Option<Value> {
        self.store_payload()?.get(key).map(|entry| entry.value.clone())
    }
}

/// Assert that an action was invoked.
///
/// # Example
///
/// ```ignore
/// assert_invoked!(harness.invoked(), "a2");
/// ```
#[macro_export]
macro_rules! assert_invoked {
    ($invoked:expr, $id:expr) => {{
        let invoked = &$invoked;
        assert!(
            invoked.iter().any(|id| id.as_str() == $id),
            "Expected action `{}` to be invoked, but got: {:?}",
            $id,
            invoked
        );
    }};
}

/// Assert that an action was NOT invoked.
#[macro_export]
macro_rules! assert_not_invoked {
    ($invoked:expr, $id:expr) => {{
        let invoked = &$invoked;
        assert!(
            !invoked.iter().any(|id| id.as_str() == $id),
            "Expected action `{}` NOT to be invoked, but it was: {:?}",
            $id,
            invoked
        );
    }};
}

/// Count invocations of an action.
#[macro_export]
macro_rules! count_invoked {
    ($invoked:expr, $id:expr) => {
        $invoked.iter().filter(|id| id.as_str() == $id).count()
    };
}

#[cfg(test)]
pub(crate) fn test_scope() -> Arc<crate::context::RequestScope> {
    use crate::middleware::{self, NoopMiddleware};
    use crate::store::RequestStore;

    Arc::new(crate::context::RequestScope::new(
        &ActionRequest::new(TEST_URL),
        Arc::new(EngineConfig::default()),
        RequestStore::new(),
        None,
        None,
        middleware::shared(NoopMiddleware),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use crate::{ActionContext, Props};
    use serde_json::json;

    async fn increment(_props: Props, ctx: ActionContext) -> Result<Value> {
        let n = ctx.store().get("n").and_then(|v| v.as_i64()).unwrap_or(0);
        ctx.store().set("n", n + 1);
        Ok(json!(n + 1))
    }

    #[test]
    fn test_json_request_shape() {
        let request = json_request("a1", json!([["n", 1]]), json!([2]));
        assert_eq!(request.headers.get("x-action"), Some("a1"));
        let RequestBody::Json(body) = &request.body else {
            panic!("expected json body");
        };
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body, json!({"x-s": [["n", 1]], "args": [2]}));
    }

    #[test]
    fn test_form_request_uses_query_param() {
        let request = form_request("a b", FormData::new());
        assert_eq!(request.query_param("_aid").as_deref(), Some("a b"));
    }

    #[tokio::test]
    async fn test_harness_records_invocations() {
        let harness = ActionHarness::new().with("inc", increment);
        let response = harness.call("inc", json!([["n", 1]]), json!([])).await.unwrap();

        response.assert_status(200).assert_no_header("x-reset");
        assert_eq!(response.store_entry("n"), Some(json!(2)));
        assert_invoked!(harness.invoked(), "inc");
        assert_not_invoked!(harness.invoked(), "dec");
        assert_eq!(count_invoked!(harness.invoked(), "inc"), 1);
        assert!(harness.failed().is_empty());

        harness.clear();
        assert!(harness.invoked().is_empty());
    }
}
