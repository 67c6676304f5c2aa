//! Dependency chains and nested action props
//!
//! The client sends, per request, the event-to-action bindings of every
//! ancestor component of the element that fired the action, nearest
//! ancestor first:
//!
//! ```text
//! [
//!   [["onIncrement", "a2"]],                      // parent
//!   [["onIncrement", "a3"], ["onReset", "a4"]]    // grandparent
//! ]
//! ```
//!
//! [`resolve_props`] turns this into the [`Props`] passed to the top-level
//! handler. Levels are processed from the furthest ancestor inwards, each
//! one seeded with the result of the previous, so nearer levels override
//! outer ones on name collision.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::context::RequestScope;
use crate::error::Result;
use crate::props::{ActionProp, Props};
use crate::registry::ActionRegistry;

/// "When `event` fires, invoke `action`."
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, ActionId)", into = "(String, ActionId)")]
pub struct DependencyEntry {
    pub event: String,
    pub action: ActionId,
}

impl DependencyEntry {
    pub fn new(event: impl Into<String>, action: impl Into<ActionId>) -> Self {
        Self {
            event: event.into(),
            action: action.into(),
        }
    }
}

impl From<(String, ActionId)> for DependencyEntry {
    fn from((event, action): (String, ActionId)) -> Self {
        Self { event, action }
    }
}

impl From<DependencyEntry> for (String, ActionId) {
    fn from(entry: DependencyEntry) -> Self {
        (entry.event, entry.action)
    }
}

/// Bindings contributed by one ancestor component.
pub type DependencyLevel = Vec<DependencyEntry>;

/// Dependency levels, nearest ancestor first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyChain {
    levels: Vec<DependencyLevel>,
}

impl DependencyChain {
    pub fn new(levels: Vec<DependencyLevel>) -> Self {
        Self { levels }
    }

    /// Parse the dependency header value.
    pub fn parse(header: &str) -> Result<Self> {
        if header.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(header)?)
    }

    /// Levels, nearest ancestor first.
    pub fn levels(&self) -> &[DependencyLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Every action id referenced by the chain.
    pub fn action_ids(&self) -> impl Iterator<Item = &ActionId> {
        self.levels.iter().flatten().map(|entry| &entry.action)
    }
}

/// Build the props object for the top-level handler.
///
/// Unknown action ids are still bound; invoking them rejects with
/// [`ActionError::UnresolvedAction`](crate::ActionError::UnresolvedAction).
pub(crate) fn resolve_props(
    chain: &DependencyChain,
    registry: &dyn ActionRegistry,
    request: &Arc<RequestScope>,
) -> Props {
    let mut props = Props::new();

    for level in chain.levels().iter().rev() {
        let outer = Arc::new(props.clone());
        let mut next = props;

        for entry in level {
            let handler = registry.resolve(&entry.action);
            if handler.is_none() {
                tracing::warn!(
                    event = %entry.event,
                    action = %entry.action,
                    "Dependency bound to unknown action"
                );
            }
            next.bind(
                entry.event.clone(),
                ActionProp::new(entry.action.clone(), handler, outer.clone(), request.clone()),
            );
        }

        props = next;
    }

    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_scope;
    use crate::{ActionContext, ActionMap};
    use serde_json::{json, Value};

    async fn noop(_props: Props, _ctx: ActionContext) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_parse_chain() {
        let chain = DependencyChain::parse(r#"[[["onClick","a2"]],[["onClick","a3"],["onReset","a4"]]]"#)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.levels()[0], vec![DependencyEntry::new("onClick", "a2")]);
        assert_eq!(chain.levels()[1][1], DependencyEntry::new("onReset", "a4"));
        assert_eq!(chain.action_ids().count(), 3);
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(DependencyChain::parse("").unwrap().is_empty());
        assert!(DependencyChain::parse("[]").unwrap().is_empty());
        assert!(DependencyChain::parse(r#"[["onClick"]]"#).is_err());
        assert!(DependencyChain::parse("nope").is_err());
    }

    #[test]
    fn test_chain_serializes_back_to_wire_shape() {
        let chain = DependencyChain::new(vec![vec![DependencyEntry::new("onClick", "a2")]]);
        assert_eq!(serde_json::to_value(&chain).unwrap(), json!([[["onClick", "a2"]]]));
    }

    #[tokio::test]
    async fn test_nearer_level_wins() {
        let registry = ActionMap::new().with("near", noop).with("far", noop);
        let scope = test_scope();
        let chain = DependencyChain::new(vec![
            vec![DependencyEntry::new("onSave", "near")],
            vec![
                DependencyEntry::new("onSave", "far"),
                DependencyEntry::new("onClose", "far"),
            ],
        ]);

        let props = resolve_props(&chain, &registry, &scope);
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("onSave").map(|p| p.action().as_str()), Some("near"));
        assert_eq!(props.get("onClose").map(|p| p.action().as_str()), Some("far"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_bound_but_unresolved() {
        let registry = ActionMap::new();
        let scope = test_scope();
        let chain = DependencyChain::new(vec![vec![DependencyEntry::new("onSave", "ghost")]]);

        let props = resolve_props(&chain, &registry, &scope);
        let prop = props.get("onSave").expect("bound");
        assert!(!prop.is_resolved());
    }

    #[tokio::test]
    async fn test_empty_chain_gives_empty_props() {
        let props = resolve_props(&DependencyChain::default(), &ActionMap::new(), &test_scope());
        assert!(props.is_empty());
    }
}
