//! Inbound request model
//!
//! The engine does not parse wire formats. Transports hand it an
//! [`ActionRequest`] with headers already split out and multipart bodies
//! already decoded into [`FormData`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::response::Headers;
use crate::ActionId;

/// One field of a submitted form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File {
        name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File { .. } => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::File {
                name,
                content_type,
                bytes,
            } => json!({
                "name": name,
                "type": content_type,
                "size": bytes.len(),
                "base64": STANDARD.encode(bytes),
            }),
        }
    }
}

impl From<&str> for FormValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FormValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Decoded multipart form, in field order. Names may repeat.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<FormValue>) -> &mut Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Builder form of [`append`](Self::append).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.append(name, value);
        self
    }

    /// First value with the given name.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// All values with the given name.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FormValue> + 'a {
        self.fields
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove every field with the given name, returning the first.
    pub fn remove(&mut self, name: &str) -> Option<FormValue> {
        let mut first = None;
        self.fields.retain(|(n, v)| {
            if n != name {
                return true;
            }
            if first.is_none() {
                first = Some(v.clone());
            }
            false
        });
        first
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON rendering: one key per name, repeated names become arrays.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            let value = value.to_json();
            match map.get_mut(name) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

/// Body of an inbound action request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Structured body: a JSON object with the store snapshot and `args`.
    Json(String),
    /// Decoded multipart form submission.
    Form(FormData),
}

/// Route the request was matched to by the external router.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchedRoute {
    pub pathname: String,
    pub file_path: String,
    pub params: BTreeMap<String, String>,
}

impl MatchedRoute {
    pub fn new(pathname: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            file_path: file_path.into(),
            params: BTreeMap::new(),
        }
    }
}

/// An inbound action invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionRequest {
    /// Request id, used to pick up an open client connection.
    pub id: Option<String>,
    pub url: String,
    pub headers: Headers,
    pub body: RequestBody,
    pub route: Option<MatchedRoute>,
}

impl ActionRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_json_body(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Json(body.into());
        self
    }

    pub fn with_form(mut self, form: FormData) -> Self {
        self.body = RequestBody::Form(form);
        self
    }

    pub fn with_route(mut self, route: MatchedRoute) -> Self {
        self.route = Some(route);
        self
    }

    /// First query parameter with the given name, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.url.split_once('?')?.1;
        let query = query.split('#').next().unwrap_or_default();

        query
            .split('&')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key) == name).then(|| decode_component(value))
            })
            .next()
    }

    /// Requested action: header first, then query parameter, else empty.
    pub fn action_id(&self, config: &EngineConfig) -> ActionId {
        self.headers
            .get(&config.action_header)
            .map(str::to_string)
            .or_else(|| self.query_param(&config.action_query_param))
            .map(ActionId::from)
            .unwrap_or_default()
    }
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_header_takes_precedence() {
        let config = EngineConfig::default();
        let request = ActionRequest::new("http://localhost/page?_aid=fromQuery")
            .with_header("X-Action", "fromHeader");
        assert_eq!(request.action_id(&config), ActionId::new("fromHeader"));

        let request = ActionRequest::new("http://localhost/page?_aid=fromQuery");
        assert_eq!(request.action_id(&config), ActionId::new("fromQuery"));

        let request = ActionRequest::new("http://localhost/page");
        assert!(request.action_id(&config).is_anonymous());
    }

    #[test]
    fn test_query_param_decoding() {
        let request = ActionRequest::new("http://x/?a=1&name=hello%20world&b=c+d#frag");
        assert_eq!(request.query_param("name").as_deref(), Some("hello world"));
        assert_eq!(request.query_param("b").as_deref(), Some("c d"));
        assert_eq!(request.query_param("a").as_deref(), Some("1"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[test]
    fn test_form_data_remove_and_get() {
        let mut form = FormData::new()
            .with("tag", "a")
            .with("x-s", "[]")
            .with("tag", "b");

        assert_eq!(form.get_all("tag").count(), 2);
        assert_eq!(form.remove("x-s"), Some(FormValue::from("[]")));
        assert!(form.get("x-s").is_none());
        assert_eq!(form.len(), 2);
        assert_eq!(form.get("tag").and_then(FormValue::as_text), Some("a"));
    }

    #[test]
    fn test_form_data_to_json() {
        let form = FormData::new()
            .with("name", "Ada")
            .with("tag", "a")
            .with("tag", "b")
            .with(
                "avatar",
                FormValue::File {
                    name: "a.png".into(),
                    content_type: "image/png".into(),
                    bytes: vec![1, 2, 3],
                },
            );

        let value = form.to_json();
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["tag"], json!(["a", "b"]));
        assert_eq!(value["avatar"]["size"], 3);
        assert_eq!(value["avatar"]["base64"], "AQID");
        assert_eq!(value["avatar"]["type"], "image/png");
    }
}
