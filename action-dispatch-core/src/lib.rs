//! Core types and engine for action-dispatch
//!
//! This crate dispatches client-originated invocations of server-side
//! handlers ("actions") against a per-request store, and synchronizes the
//! resulting store back to the client.
//!
//! # Core Concepts
//!
//! - **Action**: an async handler registered under an opaque id
//! - **Request store**: per-request key/value state, partly mirrored to the client
//! - **Dependency chain**: ancestor bindings that become callable nested props
//! - **Invocation tracker**: ordered ledger of every invocation in a request
//! - **Engine**: runs one request from hydration to the final response
//!
//! # Basic Example
//!
//! ```ignore
//! use action_dispatch_core::prelude::*;
//!
//! async fn increment(_props: Props, ctx: ActionContext) -> Result<Value> {
//!     let n = ctx.store().get("n").and_then(|v| v.as_i64()).unwrap_or(0);
//!     ctx.store().set("n", n + 1);
//!     Ok(json!(n + 1))
//! }
//!
//! let engine = ActionEngine::new(ActionMap::new().with("incA", increment));
//! let response = engine.handle_action(request).await?;
//! ```
//!
//! # Nested Actions
//!
//! Handlers receive the actions their ancestors bound as [`Props`]. Calling
//! one starts it immediately; handlers that fire nested actions without
//! awaiting them can still wait for all of them:
//!
//! ```ignore
//! async fn save(props: Props, ctx: ActionContext) -> Result<Value> {
//!     props.call("onSaved", vec![json!("draft")]);
//!     props.call("onNotify", vec![]);
//!
//!     // Both nested actions have settled once this returns
//!     ctx.wait_nested().await?;
//!     Ok(Value::Null)
//! }
//! ```
//!
//! Every invocation of a request runs on the task driving
//! [`ActionEngine::handle_action`]: handlers interleave only where they
//! await, never in parallel.
//!
//! If any invocation returns an [`ActionResponse`], the first one to complete
//! becomes the request's response unless the top-level handler returns its own.

pub mod action;
pub mod action_log;
pub mod config;
pub mod connections;
pub mod context;
pub mod deps;
pub mod engine;
pub mod error;
mod executor;
pub mod middleware;
pub mod props;
pub mod reconcile;
pub mod registry;
pub mod request;
pub mod response;
pub mod store;
pub mod testing;
pub mod tracker;
pub mod transfer;

// Core exports
pub use action::{ActionHandler, ActionId, ActionOutput, HandlerFuture};
pub use context::{ActionContext, DeferredTask, FormTarget};
pub use engine::{ActionEngine, HeadersFuture, ResponseHeadersHook};
pub use error::{ActionError, Result};
pub use props::{ActionProp, Props};
pub use registry::{ActionMap, ActionRegistry};

// Store and transfer exports
pub use store::{RequestStore, SharedStore, StoreKey, Symbol, TransferOptions};
pub use transfer::{Hydrated, StorePayload, StoreSealer, TransferEntry, TransferService};

// Request / response exports
pub use config::EngineConfig;
pub use connections::{Connection, ConnectionRegistry};
pub use deps::{DependencyChain, DependencyEntry, DependencyLevel};
pub use request::{ActionRequest, FormData, FormValue, MatchedRoute, RequestBody};
pub use response::{ActionResponse, Headers};
pub use tracker::{Invocation, InvocationTracker, Outcome, TrackerHandle};

// Middleware exports
pub use action_log::{ActionLog, ActionLogConfig, ActionLoggerConfig, ActionLoggerMiddleware};
pub use middleware::{
    ComposedMiddleware, InvocationKey, InvocationMiddleware, LoggingMiddleware, NoopMiddleware,
    SharedMiddleware,
};

// Testing exports
pub use testing::{form_request, json_request, ActionHarness, ResponseAssertions};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{ActionHandler, ActionId, ActionOutput};
    pub use crate::context::{ActionContext, FormTarget};
    pub use crate::engine::{ActionEngine, ResponseHeadersHook};
    pub use crate::error::{ActionError, Result};
    pub use crate::props::{ActionProp, Props};
    pub use crate::registry::{ActionMap, ActionRegistry};
    pub use crate::request::{ActionRequest, FormData, FormValue, MatchedRoute};
    pub use crate::response::{ActionResponse, Headers};
    pub use crate::store::{StoreKey, Symbol, TransferOptions};
    pub use crate::EngineConfig;

    // Re-export serde_json for handler bodies
    pub use serde_json::{json, Value};
}
