//! action-dispatch: server actions with nested dispatch and store transfer
//!
//! A client fires an action by id; the engine runs its handler against a
//! per-request store, lets it call the actions its ancestor components bound,
//! waits out everything it started and sends the changed store back.
//!
//! # Example
//! ```ignore
//! use action_dispatch::prelude::*;
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

// Re-export everything from core
pub use action_dispatch_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Handlers
    pub use action_dispatch_core::{
        ActionContext, ActionHandler, ActionId, ActionOutput, ActionProp, FormTarget, Props,
    };

    // Engine
    pub use action_dispatch_core::{
        ActionEngine, ActionMap, ActionRegistry, EngineConfig, ResponseHeadersHook,
    };

    // Errors
    pub use action_dispatch_core::{ActionError, Result};

    // Requests and responses
    pub use action_dispatch_core::{
        ActionRequest, ActionResponse, FormData, FormValue, Headers, MatchedRoute,
    };

    // Store
    pub use action_dispatch_core::{StoreKey, Symbol, TransferOptions};

    // Middleware
    pub use action_dispatch_core::{
        ActionLoggerConfig, ActionLoggerMiddleware, ComposedMiddleware, InvocationKey,
        InvocationMiddleware, LoggingMiddleware, NoopMiddleware,
    };

    pub use action_dispatch_core::prelude::{json, Value};
}
