//! Per-request key/value store with a transfer set
//!
//! Every inbound request gets exactly one [`RequestStore`]. Handlers read and
//! write it through the [`SharedStore`] handle on their context; keys marked
//! for transfer are mirrored back to the client when the response is built.
//!
//! # Example
//!
//! ```ignore
//! let store = ctx.store();
//! if !store.has("count") {
//!     store.set("count", 0);
//! }
//! store.mark_for_transfer(["count"], TransferOptions::empty());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A process-local opaque store key.
///
/// Two symbols are equal only if they came from the same [`Symbol::new`]
/// call. Symbols never leave the process: they can be marked for transfer
/// but are skipped when the outbound payload is encoded.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    pub fn new(description: &str) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            description: Arc::from(description),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({}#{})", self.description, self.id)
    }
}

/// Key of a store entry.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum StoreKey {
    Name(String),
    Symbol(Symbol),
}

impl StoreKey {
    /// The key text, for named keys.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Symbol(symbol) => write!(f, "{symbol:?}"),
        }
    }
}

impl From<&str> for StoreKey {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

impl From<String> for StoreKey {
    fn from(s: String) -> Self {
        Self::Name(s)
    }
}

impl From<&String> for StoreKey {
    fn from(s: &String) -> Self {
        Self::Name(s.clone())
    }
}

impl From<Symbol> for StoreKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<&Symbol> for StoreKey {
    fn from(symbol: &Symbol) -> Self {
        Self::Symbol(symbol.clone())
    }
}

impl From<&StoreKey> for StoreKey {
    fn from(key: &StoreKey) -> Self {
        key.clone()
    }
}

bitflags! {
    /// Per-key options carried alongside transferred values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransferOptions: u8 {
        /// Seal the value before it reaches the client.
        const ENCRYPT = 1 << 0;
    }
}

#[derive(Serialize, Deserialize)]
struct TransferOptionsRepr {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    encrypt: bool,
}

impl Serialize for TransferOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TransferOptionsRepr {
            encrypt: self.contains(Self::ENCRYPT),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransferOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TransferOptionsRepr::deserialize(deserializer)?;
        let mut options = TransferOptions::empty();
        options.set(TransferOptions::ENCRYPT, repr.encrypt);
        Ok(options)
    }
}

/// Per-request key/value container.
///
/// Values and the transfer set are kept apart: marking a key records only
/// the intent, the value is read when the outbound payload is encoded.
#[derive(Clone, Debug, Default)]
pub struct RequestStore {
    values: IndexMap<StoreKey, Value>,
    transfer: IndexMap<StoreKey, TransferOptions>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which the engine records the request's dependency chain.
    pub fn dependencies_key() -> &'static Symbol {
        static KEY: OnceLock<Symbol> = OnceLock::new();
        KEY.get_or_init(|| Symbol::new("DEPENDENCIES"))
    }

    pub fn get(&self, key: &StoreKey) -> Option<&Value> {
        self.values.get(key)
    }

    /// Insert or overwrite a value. Last write wins.
    pub fn set(&mut self, key: impl Into<StoreKey>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &StoreKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn delete(&mut self, key: &StoreKey) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Add keys to the transfer set. Re-marking a key replaces its options.
    pub fn mark_for_transfer<I, K>(&mut self, keys: I, options: TransferOptions)
    where
        I: IntoIterator<Item = K>,
        K: Into<StoreKey>,
    {
        for key in keys {
            self.transfer.insert(key.into(), options);
        }
    }

    pub fn is_marked(&self, key: &StoreKey) -> bool {
        self.transfer.contains_key(key)
    }

    /// Transfer set in marking order, with options.
    pub fn transfer_set(&self) -> impl Iterator<Item = (&StoreKey, TransferOptions)> {
        self.transfer.iter().map(|(k, o)| (k, *o))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&StoreKey, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Cloneable handle to the request store, shared by every invocation of
/// one request.
///
/// The lock is held only for the duration of a single call, never across
/// an await point.
#[derive(Clone, Debug, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<RequestStore>>,
}

impl SharedStore {
    pub fn new(store: RequestStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: impl Into<StoreKey>) -> Option<Value> {
        self.inner.lock().get(&key.into()).cloned()
    }

    pub fn set(&self, key: impl Into<StoreKey>, value: impl Into<Value>) {
        self.inner.lock().set(key, value);
    }

    pub fn has(&self, key: impl Into<StoreKey>) -> bool {
        self.inner.lock().has(&key.into())
    }

    pub fn delete(&self, key: impl Into<StoreKey>) -> Option<Value> {
        self.inner.lock().delete(&key.into())
    }

    pub fn mark_for_transfer<I, K>(&self, keys: I, options: TransferOptions)
    where
        I: IntoIterator<Item = K>,
        K: Into<StoreKey>,
    {
        self.inner.lock().mark_for_transfer(keys, options);
    }

    /// Run `f` with shared access to the store.
    pub fn read<R>(&self, f: impl FnOnce(&RequestStore) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// Use this for read-modify-write sequences that must not interleave
    /// with other invocations.
    pub fn update<R>(&self, f: impl FnOnce(&mut RequestStore) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Copy of the current store contents.
    pub fn snapshot(&self) -> RequestStore {
        self.inner.lock().clone()
    }
}
