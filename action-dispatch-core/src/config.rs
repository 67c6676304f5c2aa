//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::error::Result;

/// Names and limits used by the engine.
///
/// All fields have defaults, so a partial JSON document is enough:
///
/// ```
/// use action_dispatch_core::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "max_invocations": 64 }"#).unwrap();
/// assert_eq!(config.max_invocations, 64);
/// assert_eq!(config.action_header, "x-action");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Header carrying the action identifier.
    pub action_header: String,
    /// Query parameter carrying the action identifier when the header is absent.
    pub action_query_param: String,
    /// Header carrying the serialized dependency chain.
    pub dependencies_header: String,
    /// Field holding the client store snapshot, in JSON bodies and forms.
    pub store_field: String,
    /// Header set on the response when a form handler called `reset()`.
    pub reset_header: String,
    /// Prefix of the store key that records each action's call arguments.
    pub params_key_prefix: String,
    /// Upper bound on tracked invocations per request.
    pub max_invocations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_header: "x-action".to_string(),
            action_query_param: "_aid".to_string(),
            dependencies_header: "x-actions".to_string(),
            store_field: "x-s".to_string(),
            reset_header: "X-Reset".to_string(),
            params_key_prefix: "__params:".to_string(),
            max_invocations: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn with_max_invocations(mut self, max: usize) -> Self {
        self.max_invocations = max;
        self
    }

    pub fn with_reset_header(mut self, name: impl Into<String>) -> Self {
        self.reset_header = name.into();
        self
    }

    pub fn with_store_field(mut self, name: impl Into<String>) -> Self {
        self.store_field = name.into();
        self
    }

    /// Store key under which `action`'s call arguments are recorded.
    pub fn params_key(&self, action: &ActionId) -> String {
        format!("{}{}", self.params_key_prefix, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.action_header, "x-action");
        assert_eq!(config.action_query_param, "_aid");
        assert_eq!(config.dependencies_header, "x-actions");
        assert_eq!(config.reset_header, "X-Reset");
        assert_eq!(config.params_key(&ActionId::new("a1")), "__params:a1");
    }

    #[test]
    fn test_partial_document() {
        let config =
            EngineConfig::from_json_str(r#"{ "reset_header": "x-form-reset" }"#).unwrap();
        assert_eq!(config.reset_header, "x-form-reset");
        assert_eq!(config.max_invocations, 1024);
    }

    #[test]
    fn test_invalid_document() {
        assert!(EngineConfig::from_json_str("{ nope").is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_invocations(8)
            .with_store_field("store")
            .with_reset_header("x-r");
        assert_eq!(config.max_invocations, 8);
        assert_eq!(config.store_field, "store");
        assert_eq!(config.reset_header, "x-r");
    }
}
