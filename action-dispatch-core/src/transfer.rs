//! Store transfer between client and server
//!
//! Inbound, [`TransferService::hydrate`] pulls the client's store snapshot
//! and the positional call arguments out of the request. Outbound,
//! [`TransferService::encode_outbound`] serializes every key in the transfer
//! set with its current value.
//!
//! # Wire format
//!
//! A snapshot is a JSON array of entries. Each entry is `[key, value]`, or
//! `[key, value, options]` when options are set:
//!
//! ```text
//! [["count", 6], ["token", "q1Zx...", {"encrypt": true}]]
//! ```
//!
//! A structured request body is an object holding the snapshot under the
//! configured store field and the call arguments under `args`:
//!
//! ```text
//! { "x-s": [["count", 5]], "args": [1, "two"] }
//! ```

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ActionError, Result};
use crate::request::{ActionRequest, FormData, FormValue, RequestBody};
use crate::store::{RequestStore, TransferOptions};

/// Seals values marked with [`TransferOptions::ENCRYPT`].
///
/// The engine never ships an encrypted key in clear text: without a sealer
/// such keys are withheld from the outbound payload.
pub trait StoreSealer: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// One `{key, value, options}` triple of a store snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferEntry {
    pub key: String,
    pub value: Value,
    pub options: TransferOptions,
}

impl TransferEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            options: TransferOptions::empty(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }
}

impl Serialize for TransferEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = if self.options.is_empty() { 2 } else { 3 };
        let mut tuple = serializer.serialize_tuple(len)?;
        tuple.serialize_element(&self.key)?;
        tuple.serialize_element(&self.value)?;
        if !self.options.is_empty() {
            tuple.serialize_element(&self.options)?;
        }
        tuple.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntryRepr {
    WithOptions(String, Value, TransferOptions),
    Plain(String, Value),
}

impl<'de> Deserialize<'de> for TransferEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match EntryRepr::deserialize(deserializer)? {
            EntryRepr::WithOptions(key, value, options) => Self {
                key,
                value,
                options,
            },
            EntryRepr::Plain(key, value) => Self::new(key, value),
        })
    }
}

/// Ordered list of transferred entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorePayload {
    entries: Vec<TransferEntry>,
}

impl StorePayload {
    pub fn new(entries: Vec<TransferEntry>) -> Self {
        Self { entries }
    }

    /// Entry for `key`, if transferred.
    pub fn get(&self, key: &str) -> Option<&TransferEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[TransferEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TransferEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON text of the payload.
    pub fn encode(&self) -> String {
        // Serializing strings, values and option maps cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Everything the transfer service extracted from a request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hydrated {
    /// Client store entries, already unsealed.
    pub entries: Vec<TransferEntry>,
    /// Submitted form, with the store field removed.
    pub form: Option<FormData>,
    /// Positional call arguments of a structured body.
    pub args: Vec<Value>,
}

impl Hydrated {
    /// Write the client entries into `store` and mark them for transfer,
    /// so the response carries their post-action values.
    pub fn apply(&self, store: &mut RequestStore) {
        for entry in &self.entries {
            store.set(entry.key.as_str(), entry.value.clone());
            store.mark_for_transfer([entry.key.as_str()], entry.options);
        }
    }
}

/// Decodes inbound store snapshots and encodes outbound ones.
#[derive(Clone)]
pub struct TransferService {
    store_field: String,
    sealer: Option<Arc<dyn StoreSealer>>,
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService")
            .field("store_field", &self.store_field)
            .field("sealer", &self.sealer.is_some())
            .finish()
    }
}

impl TransferService {
    pub fn new(store_field: impl Into<String>) -> Self {
        Self {
            store_field: store_field.into(),
            sealer: None,
        }
    }

    pub fn with_sealer(mut self, sealer: Arc<dyn StoreSealer>) -> Self {
        self.sealer = Some(sealer);
        self
    }

    /// Extract the client store snapshot, form and call arguments.
    ///
    /// A malformed snapshot is logged and dropped: the request proceeds with
    /// an empty client store.
    pub fn hydrate(&self, request: &ActionRequest) -> Hydrated {
        let mut hydrated = match &request.body {
            RequestBody::Empty => Hydrated::default(),
            RequestBody::Json(text) => self.hydrate_json(text),
            RequestBody::Form(form) => self.hydrate_form(form),
        };
        hydrated.args = unwrap_web_component_event(std::mem::take(&mut hydrated.args));

        tracing::debug!(
            entries = hydrated.entries.len(),
            args = hydrated.args.len(),
            form = hydrated.form.is_some(),
            "Hydrated request"
        );
        hydrated
    }

    fn hydrate_json(&self, text: &str) -> Hydrated {
        let body: Value = match serde_json::from_str(text) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed action body, continuing with empty store");
                return Hydrated::default();
            }
        };

        let entries = match body.get(&self.store_field) {
            Some(snapshot) => self.decode_or_empty(snapshot),
            None => Vec::new(),
        };

        let args = match body.get("args") {
            Some(Value::Array(args)) => args.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };

        Hydrated {
            entries,
            form: None,
            args,
        }
    }

    fn hydrate_form(&self, form: &FormData) -> Hydrated {
        let mut form = form.clone();
        let entries = match form.remove(&self.store_field) {
            Some(FormValue::Text(snapshot)) => self.decode_or_empty(&Value::String(snapshot)),
            Some(FormValue::File { .. }) => {
                tracing::warn!(field = %self.store_field, "Store field sent as a file, ignoring");
                Vec::new()
            }
            None => Vec::new(),
        };

        Hydrated {
            entries,
            form: Some(form),
            args: Vec::new(),
        }
    }

    fn decode_or_empty(&self, snapshot: &Value) -> Vec<TransferEntry> {
        match self.decode_snapshot(snapshot) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed store snapshot, continuing with empty store");
                Vec::new()
            }
        }
    }

    /// Decode a snapshot given either as a JSON array or as JSON text.
    pub fn decode_snapshot(&self, snapshot: &Value) -> Result<Vec<TransferEntry>> {
        let payload: StorePayload = match snapshot {
            Value::String(text) => serde_json::from_str(text)?,
            other => serde_json::from_value(other.clone())?,
        };

        payload
            .into_entries()
            .into_iter()
            .map(|mut entry| {
                if entry.options.contains(TransferOptions::ENCRYPT) {
                    entry.value = self.open_value(&entry.value)?;
                }
                Ok(entry)
            })
            .collect()
    }

    /// Decode an encoded outbound payload back into entries.
    pub fn decode(&self, text: &str) -> Result<Vec<TransferEntry>> {
        self.decode_snapshot(&Value::String(text.to_string()))
    }

    /// Serialize every key in the transfer set with its current value.
    ///
    /// Symbol keys are skipped. Keys marked [`TransferOptions::ENCRYPT`] are
    /// sealed, or withheld when sealing is not possible.
    pub fn encode_outbound(&self, store: &RequestStore) -> StorePayload {
        let mut entries = Vec::new();

        for (key, options) in store.transfer_set() {
            let Some(name) = key.as_name() else {
                tracing::debug!(key = %key, "Skipping symbol key in transfer set");
                continue;
            };

            let mut value = store.get(key).cloned().unwrap_or(Value::Null);
            if options.contains(TransferOptions::ENCRYPT) {
                value = match self.seal_value(&value) {
                    Ok(sealed) => sealed,
                    Err(err) => {
                        tracing::warn!(key = %name, error = %err, "Withholding key that could not be sealed");
                        continue;
                    }
                };
            }

            entries.push(TransferEntry {
                key: name.to_string(),
                value,
                options,
            });
        }

        StorePayload::new(entries)
    }

    fn sealer(&self) -> Result<&dyn StoreSealer> {
        self.sealer.as_deref().ok_or_else(|| {
            ActionError::MalformedTransferPayload("no store sealer configured".to_string())
        })
    }

    fn seal_value(&self, value: &Value) -> Result<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let sealed = self.sealer()?.seal(&plaintext)?;
        Ok(Value::String(STANDARD.encode(sealed)))
    }

    fn open_value(&self, value: &Value) -> Result<Value> {
        let Value::String(text) = value else {
            return Err(ActionError::MalformedTransferPayload(
                "sealed value is not a string".to_string(),
            ));
        };
        let sealed = STANDARD
            .decode(text)
            .map_err(|err| ActionError::MalformedTransferPayload(err.to_string()))?;
        let plaintext = self.sealer()?.open(&sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Web component events carry the real arguments in `detail`.
fn unwrap_web_component_event(args: Vec<Value>) -> Vec<Value> {
    let is_component_event = match args.first() {
        Some(Value::Object(event)) => {
            event.contains_key("isTrusted")
                && event.contains_key("detail")
                && event.get("_wc").is_some_and(is_truthy)
        }
        _ => false,
    };
    if !is_component_event {
        return args;
    }

    let detail = args.into_iter().next().and_then(|event| match event {
        Value::Object(mut event) => event.remove("detail"),
        _ => None,
    });
    match detail {
        Some(Value::Array(args)) => args,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
