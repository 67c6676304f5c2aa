//! Ordered ledger of in-flight invocations
//!
//! Every invocation of a request (the top-level action, nested action props
//! and anonymous tracked futures) appends one entry. Entries are never
//! removed; settling flips a completion cell in place, so positions stay
//! valid for the life of the request.
//!
//! [`InvocationTracker::await_all_after`] gives handlers a way to wait on
//! work they started without awaiting: it locates the caller's own entry and
//! waits for every entry positioned after it.
//!
//! # Example
//!
//! ```ignore
//! let tracker = InvocationTracker::new(1024);
//! let top = tracker.begin("a1")?;
//! let nested = tracker.begin("a2")?;
//!
//! tracker.resolve(nested, json!(1).into());
//! let settled = tracker.await_all_after(&ActionId::new("a1")).await?;
//! assert_eq!(settled.len(), 1);
//! tracker.resolve(top, ActionOutput::default());
//! ```

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::action::{ActionId, ActionOutput};
use crate::error::{ActionError, Result};

/// Settled result of one invocation.
pub type Outcome = std::result::Result<ActionOutput, ActionError>;

struct Entry {
    id: ActionId,
    state: watch::Sender<Option<Outcome>>,
    /// Set once some caller has awaited the outcome.
    observed: Arc<AtomicBool>,
}

impl Entry {
    fn invocation(&self, position: usize) -> Invocation {
        Invocation {
            id: self.id.clone(),
            position,
            state: self.state.subscribe(),
            observed: self.observed.clone(),
        }
    }
}

/// Position of an entry in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackerHandle {
    position: usize,
}

impl TrackerHandle {
    pub fn position(self) -> usize {
        self.position
    }
}

/// Append-only ledger of invocations for one request.
pub struct InvocationTracker {
    entries: Mutex<Vec<Entry>>,
    limit: usize,
}

impl std::fmt::Debug for InvocationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationTracker")
            .field("entries", &self.len())
            .field("pending", &self.pending())
            .field("limit", &self.limit)
            .finish()
    }
}

impl InvocationTracker {
    /// Create a tracker accepting at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Append a pending entry for `id`.
    pub fn begin(&self, id: impl Into<ActionId>) -> Result<TrackerHandle> {
        let id = id.into();
        let mut entries = self.entries.lock();
        if entries.len() >= self.limit {
            tracing::warn!(action = %id, limit = self.limit, "Invocation limit reached");
            return Err(ActionError::InvocationLimit { limit: self.limit });
        }

        let (state, _) = watch::channel(None);
        let position = entries.len();
        entries.push(Entry {
            id,
            state,
            observed: Arc::new(AtomicBool::new(false)),
        });
        Ok(TrackerHandle { position })
    }

    /// Complete an entry successfully.
    pub fn resolve(&self, handle: TrackerHandle, output: ActionOutput) {
        self.settle(handle, Ok(output));
    }

    /// Complete an entry with a failure.
    pub fn reject(&self, handle: TrackerHandle, error: ActionError) {
        self.settle(handle, Err(error));
    }

    fn settle(&self, handle: TrackerHandle, outcome: Outcome) {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(handle.position) else {
            tracing::debug!(position = handle.position, "Settle for unknown entry");
            return;
        };

        let already_settled = entry.state.borrow().is_some();
        if already_settled {
            tracing::debug!(action = %entry.id, position = handle.position, "Entry already settled");
        } else {
            entry.state.send_replace(Some(outcome));
        }
    }

    /// Future that completes when the entry at `handle` settles.
    pub fn invocation(&self, handle: TrackerHandle) -> Invocation {
        self.entries.lock()[handle.position].invocation(handle.position)
    }

    /// Position of the first entry registered under `id`.
    pub fn position_of(&self, id: &ActionId) -> Option<usize> {
        self.entries.lock().iter().position(|entry| &entry.id == id)
    }

    /// Whether the entry at `handle` has settled.
    pub fn is_settled(&self, handle: TrackerHandle) -> bool {
        self.entries
            .lock()
            .get(handle.position)
            .map(|entry| entry.state.borrow().is_some())
            .unwrap_or(false)
    }

    /// Wait for every entry positioned after the first entry of `id`.
    ///
    /// Entries are awaited in ledger order. Entries appended while waiting
    /// are awaited too; the call returns once it reaches the end of the
    /// ledger with everything settled. If `id` has no entry, the whole
    /// ledger is awaited.
    ///
    /// Failures do not stop the wait. Once all entries have settled, any
    /// failures are returned together as [`ActionError::Aggregate`].
    pub async fn await_all_after(&self, id: &ActionId) -> Result<Vec<ActionOutput>> {
        let start = self.position_of(id).map_or(0, |p| p + 1);
        self.await_from(start).await
    }

    /// Wait for every entry at or after `start`, with the same semantics
    /// as [`await_all_after`](Self::await_all_after).
    pub async fn await_from(&self, start: usize) -> Result<Vec<ActionOutput>> {
        let mut next = start;
        let mut settled = Vec::new();
        let mut failures = Vec::new();

        loop {
            let invocation = match self.entries.lock().get(next) {
                Some(entry) => entry.invocation(next),
                None => break,
            };

            match invocation.wait().await {
                Ok(output) => settled.push(output),
                Err(err) => failures.push(err),
            }
            next += 1;
        }

        tracing::debug!(
            start,
            settled = settled.len(),
            failed = failures.len(),
            "Drained tracked invocations"
        );

        if failures.is_empty() {
            Ok(settled)
        } else {
            Err(ActionError::Aggregate(failures))
        }
    }

    /// Wait until every entry at or after `start` has settled, then report
    /// the failures no caller has awaited.
    ///
    /// A failure some handler awaited (directly, or through
    /// [`await_from`](Self::await_from)) counts as handled. Everything else is
    /// returned as [`ActionError::Aggregate`]. Returns the number of entries
    /// drained.
    pub async fn drain_from(&self, start: usize) -> Result<usize> {
        let mut next = start;
        loop {
            let mut state = match self.entries.lock().get(next) {
                Some(entry) => entry.state.subscribe(),
                None => break,
            };
            // A closed channel means the tracker is gone; nothing left to wait on
            let _ = state.wait_for(Option::is_some).await;
            next += 1;
        }

        let failures: Vec<ActionError> = self
            .entries
            .lock()
            .iter()
            .skip(start)
            .take(next.saturating_sub(start))
            .filter(|entry| !entry.observed.load(Ordering::Acquire))
            .filter_map(|entry| match &*entry.state.borrow() {
                Some(Err(err)) => Some(err.clone()),
                _ => None,
            })
            .collect();

        let drained = next.saturating_sub(start);
        tracing::debug!(start, drained, unhandled = failures.len(), "Drained ledger");

        if failures.is_empty() {
            Ok(drained)
        } else {
            Err(ActionError::Aggregate(failures))
        }
    }

    /// Number of entries ever appended.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of entries not yet settled.
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.state.borrow().is_none())
            .count()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Handle to a started invocation.
///
/// The invocation runs whether or not this handle is awaited. Awaiting it
/// yields the invocation's outcome.
#[derive(Debug)]
pub struct Invocation {
    id: ActionId,
    position: usize,
    state: watch::Receiver<Option<Outcome>>,
    observed: Arc<AtomicBool>,
}

impl Invocation {
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_settled(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Wait for the outcome.
    ///
    /// Awaiting marks the invocation as observed: a failure returned here is
    /// the caller's to handle.
    pub async fn wait(mut self) -> Outcome {
        let outcome = match self.state.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            Err(_) => None,
        };
        self.observed.store(true, Ordering::Release);
        outcome.unwrap_or_else(|| {
            Err(ActionError::Cancelled {
                id: self.id.to_string(),
            })
        })
    }
}

impl IntoFuture for Invocation {
    type Output = Outcome;
    type IntoFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn value(n: i64) -> ActionOutput {
        ActionOutput::Value(json!(n))
    }

    #[test]
    fn test_begin_appends_in_order() {
        let tracker = InvocationTracker::new(8);
        let a = tracker.begin("a").unwrap();
        let b = tracker.begin("").unwrap();
        let c = tracker.begin("a").unwrap();

        assert_eq!(a.position(), 0);
        assert_eq!(b.position(), 1);
        assert_eq!(c.position(), 2);
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.pending(), 3);
        // First occurrence wins
        assert_eq!(tracker.position_of(&ActionId::new("a")), Some(0));
    }

    #[test]
    fn test_settle_keeps_entry_in_place() {
        let tracker = InvocationTracker::new(8);
        let a = tracker.begin("a").unwrap();
        tracker.resolve(a, value(1));

        assert!(tracker.is_settled(a));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.position_of(&ActionId::new("a")), Some(0));
    }

    #[test]
    fn test_second_settle_is_ignored() {
        let tracker = InvocationTracker::new(8);
        let a = tracker.begin("a").unwrap();
        tracker.resolve(a, value(1));
        tracker.reject(a, ActionError::handler("a", "late"));

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let outcome = rt.block_on(tracker.invocation(a).wait());
        assert_eq!(outcome, Ok(value(1)));
    }

    #[test]
    fn test_limit() {
        let tracker = InvocationTracker::new(2);
        tracker.begin("a").unwrap();
        tracker.begin("b").unwrap();
        assert_eq!(
            tracker.begin("c"),
            Err(ActionError::InvocationLimit { limit: 2 })
        );
    }

    #[tokio::test]
    async fn test_await_all_after_waits_for_later_entries() {
        let tracker = Arc::new(InvocationTracker::new(16));
        let top = tracker.begin("top").unwrap();

        // Three nested entries settled out of order
        let handles: Vec<_> = (0..3).map(|i| tracker.begin(format!("n{i}")).unwrap()).collect();
        for (i, handle) in handles.iter().copied().enumerate().rev() {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5 * (3 - i as u64))).await;
                tracker.resolve(handle, value(i as i64));
            });
        }

        let settled = tracker.await_all_after(&ActionId::new("top")).await.unwrap();
        assert_eq!(settled, vec![value(0), value(1), value(2)]);
        for handle in handles {
            assert!(tracker.is_settled(handle));
        }
        assert!(!tracker.is_settled(top));
    }

    #[tokio::test]
    async fn test_await_all_after_skips_earlier_entries() {
        let tracker = InvocationTracker::new(16);
        let _before = tracker.begin("before").unwrap();
        tracker.begin("me").unwrap();
        let after = tracker.begin("after").unwrap();
        tracker.resolve(after, value(7));

        // "before" never settles but is not waited on
        let settled = tokio::time::timeout(
            Duration::from_millis(100),
            tracker.await_all_after(&ActionId::new("me")),
        )
        .await
        .expect("timeout")
        .unwrap();
        assert_eq!(settled, vec![value(7)]);
    }

    #[tokio::test]
    async fn test_await_all_after_aggregates_failures() {
        let tracker = InvocationTracker::new(16);
        tracker.begin("me").unwrap();
        let ok = tracker.begin("ok").unwrap();
        let bad = tracker.begin("bad").unwrap();
        let worse = tracker.begin("worse").unwrap();

        tracker.reject(bad, ActionError::handler("bad", "boom"));
        tracker.resolve(ok, value(1));
        tracker.reject(worse, ActionError::handler("worse", "bang"));

        let err = tracker.await_all_after(&ActionId::new("me")).await.unwrap_err();
        assert_eq!(
            err,
            ActionError::Aggregate(vec![
                ActionError::handler("bad", "boom"),
                ActionError::handler("worse", "bang"),
            ])
        );
    }

    #[tokio::test]
    async fn test_await_all_after_includes_entries_appended_while_waiting() {
        let tracker = Arc::new(InvocationTracker::new(16));
        tracker.begin("me").unwrap();
        let first = tracker.begin("first").unwrap();

        let t = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let second = t.begin("second").unwrap();
            t.resolve(first, value(1));
            tokio::time::sleep(Duration::from_millis(5)).await;
            t.resolve(second, value(2));
        });

        let settled = tracker.await_all_after(&ActionId::new("me")).await.unwrap();
        assert_eq!(settled, vec![value(1), value(2)]);
    }

    #[tokio::test]
    async fn test_unknown_id_awaits_whole_ledger() {
        let tracker = InvocationTracker::new(16);
        let a = tracker.begin("a").unwrap();
        tracker.resolve(a, value(1));

        let settled = tracker.await_all_after(&ActionId::new("zzz")).await.unwrap();
        assert_eq!(settled, vec![value(1)]);
    }

    #[tokio::test]
    async fn test_await_from_position() {
        let tracker = InvocationTracker::new(16);
        tracker.begin("a").unwrap();
        let again = tracker.begin("a").unwrap();
        let nested = tracker.begin("b").unwrap();
        tracker.resolve(nested, value(2));

        // The second "a" waits only on what follows it
        let settled = tracker.await_from(again.position() + 1).await.unwrap();
        assert_eq!(settled, vec![value(2)]);
        assert!(tracker.await_from(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_reports_unobserved_failures_only() {
        let tracker = InvocationTracker::new(16);
        tracker.begin("top").unwrap();
        let caught = tracker.begin("caught").unwrap();
        let loose = tracker.begin("loose").unwrap();
        let fine = tracker.begin("fine").unwrap();

        tracker.reject(caught, ActionError::handler("caught", "handled"));
        tracker.reject(loose, ActionError::handler("loose", "dropped"));
        tracker.resolve(fine, value(1));

        // Someone awaited "caught"
        assert!(tracker.invocation(caught).wait().await.is_err());

        let err = tracker.drain_from(1).await.unwrap_err();
        assert_eq!(
            err,
            ActionError::Aggregate(vec![ActionError::handler("loose", "dropped")])
        );
        assert_eq!(tracker.drain_from(3).await, Ok(1));
        assert_eq!(tracker.drain_from(10).await, Ok(0));
    }

    #[tokio::test]
    async fn test_invocation_into_future() {
        let tracker = InvocationTracker::new(4);
        let a = tracker.begin("a").unwrap();
        let invocation = tracker.invocation(a);
        assert!(!invocation.is_settled());
        assert_eq!(invocation.id(), &ActionId::new("a"));

        tracker.resolve(a, value(3));
        assert_eq!(invocation.await, Ok(value(3)));
    }
}
