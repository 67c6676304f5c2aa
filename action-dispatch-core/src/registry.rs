//! Action registry lookup

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::action::{ActionHandler, ActionId};

/// Resolves action identifiers to handlers.
///
/// The registry is a prebuilt, read-only map. A miss is never retried by
/// the engine: an unknown id means a stale client build or tampering.
pub trait ActionRegistry: Send + Sync {
    fn resolve(&self, id: &ActionId) -> Option<Arc<dyn ActionHandler>>;
}

impl<R: ActionRegistry + ?Sized> ActionRegistry for Arc<R> {
    fn resolve(&self, id: &ActionId) -> Option<Arc<dyn ActionHandler>> {
        (**self).resolve(id)
    }
}

/// In-memory action registry.
///
/// # Example
///
/// ```ignore
/// let mut actions = ActionMap::new();
/// actions.register("a1", increment).register("a2", decrement);
/// let engine = ActionEngine::new(actions);
/// ```
#[derive(Clone, Default)]
pub struct ActionMap {
    handlers: HashMap<ActionId, Arc<dyn ActionHandler>>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same id.
    pub fn register<H: ActionHandler>(&mut self, id: impl Into<ActionId>, handler: H) -> &mut Self {
        self.handlers.insert(id.into(), Arc::new(handler));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H: ActionHandler>(mut self, id: impl Into<ActionId>, handler: H) -> Self {
        self.register(id, handler);
        self
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ActionId> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().map(ActionId::as_str).collect();
        ids.sort();
        f.debug_struct("ActionMap").field("actions", &ids).finish()
    }
}

impl ActionRegistry for ActionMap {
    fn resolve(&self, id: &ActionId) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionContext, Props, Result};
    use serde_json::Value;

    async fn noop(_props: Props, _ctx: ActionContext) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut actions = ActionMap::new();
        actions.register("a1", noop).register("a2", noop);

        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&ActionId::new("a1")));
        assert!(actions.resolve(&ActionId::new("a2")).is_some());
        assert!(actions.resolve(&ActionId::new("a3")).is_none());
    }

    #[test]
    fn test_shared_registry() {
        let actions: Arc<dyn ActionRegistry> = Arc::new(ActionMap::new().with("a1", noop));
        assert!(actions.resolve(&ActionId::new("a1")).is_some());
        assert!(actions.resolve(&ActionId::new("")).is_none());
    }

    #[test]
    fn test_debug_lists_sorted_ids() {
        let actions = ActionMap::new().with("b", noop).with("a", noop);
        assert_eq!(format!("{actions:?}"), r#"ActionMap { actions: ["a", "b"] }"#);
    }
}
