//! Invocation middleware
//!
//! Middleware observes every named invocation of a request: the top-level
//! action and each nested action prop call. Anonymous tracked futures are
//! not reported.
//!
//! Each hook receives the [`InvocationKey`] of the invocation, so `before`
//! and `after` calls pair up even when several invocations of one action
//! are in flight at once.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::action::ActionId;
use crate::tracker::Outcome;

/// Identifies one invocation among every request an engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    /// Process-wide sequence number of the request
    pub request: u64,
    /// Ledger position within the request
    pub position: usize,
}

impl InvocationKey {
    pub fn new(request: u64, position: usize) -> Self {
        Self { request, position }
    }
}

/// Hooks around each invocation.
///
/// Implement this trait to add logging, metrics or auditing to the engine.
pub trait InvocationMiddleware: Send {
    /// Called when an invocation starts, with its call arguments.
    fn before(&mut self, key: InvocationKey, action: &ActionId, args: &[Value]);

    /// Called when an invocation settles, with the key `before` received.
    fn after(&mut self, key: InvocationKey, action: &ActionId, outcome: &Outcome);
}

/// Middleware shared by every request an engine handles.
pub type SharedMiddleware = Arc<Mutex<dyn InvocationMiddleware>>;

/// Wrap middleware for use by the engine.
pub fn shared<M: InvocationMiddleware + 'static>(middleware: M) -> SharedMiddleware {
    Arc::new(Mutex::new(middleware))
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl InvocationMiddleware for NoopMiddleware {
    fn before(&mut self, _key: InvocationKey, _action: &ActionId, _args: &[Value]) {}
    fn after(&mut self, _key: InvocationKey, _action: &ActionId, _outcome: &Outcome) {}
}

/// Middleware that logs invocations through `tracing`
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    /// Whether to log when an invocation starts
    pub log_before: bool,
    /// Whether to log when an invocation settles
    pub log_after: bool,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingMiddleware {
    /// Log settled invocations only
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

    /// Log both start and settle
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_after: true,
        }
    }
}

impl InvocationMiddleware for LoggingMiddleware {
    fn before(&mut self, key: InvocationKey, action: &ActionId, args: &[Value]) {
        if self.log_before {
            tracing::debug!(
                action = %action,
                request = key.request,
                position = key.position,
                args = args.len(),
                "Invoking action"
            );
        }
    }

    fn after(&mut self, key: InvocationKey, action: &ActionId, outcome: &Outcome) {
        if !self.log_after {
            return;
        }
        match outcome {
            Ok(output) => tracing::debug!(
                action = %action,
                request = key.request,
                position = key.position,
                response = output.is_response(),
                "Action settled"
            ),
            Err(err) => tracing::debug!(
                action = %action,
                request = key.request,
                position = key.position,
                error = %err,
                "Action failed"
            ),
        }
    }
}

/// Compose multiple middleware into a single middleware
#[derive(Default)]
pub struct ComposedMiddleware {
    middlewares: Vec<Box<dyn InvocationMiddleware>>,
}

impl std::fmt::Debug for ComposedMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl ComposedMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the composition
    pub fn add<M: InvocationMiddleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl InvocationMiddleware for ComposedMiddleware {
    fn before(&mut self, key: InvocationKey, action: &ActionId, args: &[Value]) {
        for middleware in &mut self.middlewares {
            middleware.before(key, action, args);
        }
    }

    fn after(&mut self, key: InvocationKey, action: &ActionId, outcome: &Outcome) {
        // Reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(key, action, outcome);
        }
    }
}
