//! Callable action props handed to handlers

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::action::{ActionHandler, ActionId};
use crate::context::RequestScope;
use crate::error::Result;
use crate::tracker::Invocation;

/// Ordered mapping from event name to a callable action.
///
/// Built by [`resolve_props`](crate::deps::resolve_props) from the
/// dependency chain; handlers invoke nested actions through it.
#[derive(Clone, Default)]
pub struct Props {
    bindings: IndexMap<String, ActionProp>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callable bound to `event`.
    pub fn get(&self, event: &str) -> Option<&ActionProp> {
        self.bindings.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.bindings.contains_key(event)
    }

    /// Start the action bound to `event`. Returns `None` if nothing is bound.
    pub fn call(&self, event: &str, args: Vec<Value>) -> Option<Result<Invocation>> {
        self.get(event).map(|prop| prop.call(args))
    }

    /// Event names in binding order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionProp)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind `event`, replacing any earlier binding of the same name.
    pub(crate) fn bind(&mut self, event: String, prop: ActionProp) {
        self.bindings.insert(event, prop);
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.bindings.iter().map(|(event, prop)| (event, prop.action())))
            .finish()
    }
}

/// A nested action bound to an event name.
///
/// Calling it starts the action immediately as its own tracked invocation;
/// the returned [`Invocation`] may be awaited or dropped.
#[derive(Clone)]
pub struct ActionProp {
    action: ActionId,
    handler: Option<Arc<dyn ActionHandler>>,
    /// Props visible to the bound handler: the bindings of outer levels.
    scope_props: Arc<Props>,
    request: Arc<RequestScope>,
}

impl ActionProp {
    pub(crate) fn new(
        action: ActionId,
        handler: Option<Arc<dyn ActionHandler>>,
        scope_props: Arc<Props>,
        request: Arc<RequestScope>,
    ) -> Self {
        Self {
            action,
            handler,
            scope_props,
            request,
        }
    }

    pub fn action(&self) -> &ActionId {
        &self.action
    }

    /// Whether the bound action id resolved to a handler.
    pub fn is_resolved(&self) -> bool {
        self.handler.is_some()
    }

    /// Start the action with the given arguments.
    ///
    /// Fails only when the request's invocation limit is reached. Handler
    /// failures, including an unresolved action id, surface through the
    /// returned invocation.
    pub fn call(&self, args: Vec<Value>) -> Result<Invocation> {
        self.request.start(
            self.action.clone(),
            self.handler.clone(),
            (*self.scope_props).clone(),
            args,
        )
    }
}

impl fmt::Debug for ActionProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionProp")
            .field("action", &self.action)
            .field("resolved", &self.is_resolved())
            .field("scope_props", &self.scope_props.len())
            .finish()
    }
}
