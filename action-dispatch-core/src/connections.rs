//! Open client connections keyed by request id
//!
//! A transport that keeps a push channel open to the client (a socket, an
//! event stream) registers its sender here under the request id the client
//! will send with its next action. The engine takes the sender out when the
//! matching action arrives and hands it to the handler through
//! [`ActionContext::connection`](crate::ActionContext::connection).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Sender half of an open client connection.
pub type Connection = mpsc::UnboundedSender<Value>;

/// Registry of open connections, shared between transport and engine.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<String, Connection>>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("open", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one for `id`.
    pub fn open(&self, id: impl Into<String>, sender: Connection) {
        let id = id.into();
        tracing::debug!(request = %id, "Connection opened");
        self.connections.lock().insert(id, sender);
    }

    /// Open a fresh channel for `id` and return its receiving half.
    pub fn channel(&self, id: impl Into<String>) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.open(id, tx);
        rx
    }

    /// Remove and return the connection for `id`.
    pub fn take(&self, id: &str) -> Option<Connection> {
        self.connections.lock().remove(id)
    }

    /// Drop the connection for `id`. Returns whether one was registered.
    pub fn close(&self, id: &str) -> bool {
        let closed = self.connections.lock().remove(id).is_some();
        if closed {
            tracing::debug!(request = %id, "Connection closed");
        }
        closed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_removes() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.channel("req-1");
        assert!(registry.contains("req-1"));

        let tx = registry.take("req-1").expect("registered");
        assert!(!registry.contains("req-1"));
        assert!(registry.take("req-1").is_none());

        tx.send(json!({"hello": 1})).unwrap();
        assert_eq!(rx.try_recv().unwrap(), json!({"hello": 1}));
    }

    #[test]
    fn test_close() {
        let registry = ConnectionRegistry::new();
        let _rx = registry.channel("a");
        let _rx2 = registry.channel("b");
        assert_eq!(registry.len(), 2);

        assert!(registry.close("a"));
        assert!(!registry.close("a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ConnectionRegistry::new();
        let transport = registry.clone();
        let _rx = transport.channel("a");
        assert!(registry.contains("a"));
    }
}
