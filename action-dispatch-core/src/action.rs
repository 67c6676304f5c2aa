//! Action identifiers, handler outputs and the handler trait

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ActionContext;
use crate::error::Result;
use crate::props::Props;
use crate::response::ActionResponse;

/// Opaque identifier of a server action.
///
/// Identifiers are produced at build time and are only ever used as lookup
/// keys. The empty identifier marks anonymous tracked work.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Create a new action identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier used for anonymous tracked futures.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// Get the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the anonymous identifier.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ActionId> for ActionId {
    fn from(id: &ActionId) -> Self {
        id.clone()
    }
}

/// What a handler produced: either a plain value or a full response.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutput {
    Value(Value),
    Response(ActionResponse),
}

impl ActionOutput {
    /// Whether the handler returned a response.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Borrow the response, if any.
    pub fn as_response(&self) -> Option<&ActionResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Value(_) => None,
        }
    }

    /// Borrow the plain value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Response(_) => None,
        }
    }
}

impl Default for ActionOutput {
    fn default() -> Self {
        Self::Value(Value::Null)
    }
}

impl From<Value> for ActionOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<ActionResponse> for ActionOutput {
    fn from(response: ActionResponse) -> Self {
        Self::Response(response)
    }
}

impl From<()> for ActionOutput {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// Boxed future returned by [`ActionHandler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<ActionOutput>> + Send + 'static>>;

/// A server-side action.
///
/// Handlers receive the props resolved from the dependency chain and the
/// per-invocation context. Any async function of the shape
/// `async fn(Props, ActionContext) -> Result<T>` where `T: Into<ActionOutput>`
/// implements this trait.
///
/// # Example
///
/// ```ignore
/// async fn increment(_props: Props, ctx: ActionContext) -> Result<Value> {
///     let n = ctx.store().get("n").and_then(|v| v.as_i64()).unwrap_or(0);
///     ctx.store().set("n", n + 1);
///     Ok(Value::from(n + 1))
/// }
/// ```
pub trait ActionHandler: Send + Sync + 'static {
    fn call(&self, props: Props, ctx: ActionContext) -> HandlerFuture;
}

impl<F, Fut, O> ActionHandler for F
where
    F: Fn(Props, ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Into<ActionOutput>,
{
    fn call(&self, props: Props, ctx: ActionContext) -> HandlerFuture {
        let fut = (self)(props, ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_id() {
        let a = ActionId::new("a1");
        let b = ActionId::from("a1");
        let c: ActionId = String::from("a1").into();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "a1");
        assert_eq!(a.to_string(), "a1");
        assert!(!a.is_anonymous());
        assert!(ActionId::anonymous().is_anonymous());
    }

    #[test]
    fn test_action_id_serde_transparent() {
        let id: ActionId = serde_json::from_value(json!("a7")).unwrap();
        assert_eq!(id, ActionId::new("a7"));
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("a7"));
    }

    #[test]
    fn test_output_conversions() {
        let out: ActionOutput = json!(6).into();
        assert_eq!(out.as_value(), Some(&json!(6)));
        assert!(!out.is_response());

        let out: ActionOutput = ActionResponse::new(201).into();
        assert!(out.is_response());
        assert_eq!(out.as_response().map(|r| r.status), Some(201));

        let out: ActionOutput = ().into();
        assert_eq!(out, ActionOutput::Value(Value::Null));
    }
}
