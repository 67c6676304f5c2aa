//! Per-request invocation scope and the context handed to handlers
//!
//! A [`RequestScope`] owns everything one request's invocation tree shares:
//! the store, the invocation ledger, the response candidates and deferred
//! tasks. Every invocation (top-level or nested) is started through
//! [`RequestScope::start`], which records it in the ledger and hands the
//! handler to the request's executor so it runs whether or not the caller
//! awaits it.

use std::future::Future;
use std::pin::Pin;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::action::{ActionHandler, ActionId, ActionOutput, HandlerFuture};
use crate::config::EngineConfig;
use crate::connections::Connection;
use crate::error::{ActionError, Result};
use crate::executor::{Drive, RequestExecutor};
use crate::middleware::{InvocationKey, SharedMiddleware};
use crate::props::Props;
use crate::request::{ActionRequest, FormData, MatchedRoute};
use crate::response::{ActionResponse, Headers};
use crate::store::{RequestStore, SharedStore};
use crate::tracker::{Invocation, InvocationTracker, Outcome, TrackerHandle};

/// Work scheduled to run after the response is produced.
pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub(crate) struct RequestScope {
    sequence: u64,
    request_id: Option<String>,
    url: String,
    headers: Headers,
    route: Option<MatchedRoute>,
    config: Arc<EngineConfig>,
    store: SharedStore,
    tracker: InvocationTracker,
    candidates: Mutex<Vec<ActionResponse>>,
    form: Option<FormTarget>,
    connection: Option<Connection>,
    middleware: SharedMiddleware,
    deferred: Mutex<Vec<DeferredTask>>,
    executor: Arc<RequestExecutor>,
}

impl RequestScope {
    pub(crate) fn new(
        request: &ActionRequest,
        config: Arc<EngineConfig>,
        store: RequestStore,
        form: Option<FormData>,
        connection: Option<Connection>,
        middleware: SharedMiddleware,
    ) -> Self {
        let form = form.map(|data| FormTarget::new(data, request.url.clone()));
        Self {
            sequence: REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            request_id: request.id.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            route: request.route.clone(),
            tracker: InvocationTracker::new(config.max_invocations),
            config,
            store: SharedStore::new(store),
            candidates: Mutex::new(Vec::new()),
            form,
            connection,
            middleware,
            deferred: Mutex::new(Vec::new()),
            executor: RequestExecutor::new(),
        }
    }

    /// Run `body` on this request's executor.
    ///
    /// Invocations started while `body` runs are polled by the returned
    /// future, interleaving with it only at await points.
    pub(crate) fn drive<F: Future>(&self, body: F) -> Drive<F> {
        self.executor.drive(body)
    }

    fn key(&self, handle: TrackerHandle) -> InvocationKey {
        InvocationKey::new(self.sequence, handle.position())
    }

    /// Start an invocation of `action`.
    ///
    /// The call arguments are recorded under the action's params key and
    /// handed to the invocation's own context. The handler runs up to its
    /// first await before this returns. A missing handler still takes a
    /// ledger entry, which rejects with [`ActionError::UnresolvedAction`].
    pub(crate) fn start(
        self: &Arc<Self>,
        action: ActionId,
        handler: Option<Arc<dyn ActionHandler>>,
        props: Props,
        args: Vec<Value>,
    ) -> Result<Invocation> {
        let handle = self.tracker.begin(action.clone())?;
        self.middleware.lock().before(self.key(handle), &action, &args);
        let args: Arc<[Value]> = args.into();
        self.store
            .set(self.config.params_key(&action), Value::Array(args.to_vec()));

        tracing::debug!(
            action = %action,
            position = handle.position(),
            props = props.len(),
            "Starting invocation"
        );

        let ctx = ActionContext::new(self.clone(), action.clone(), handle.position(), args);
        let future: HandlerFuture = match handler {
            Some(handler) => handler.call(props, ctx),
            None => {
                let err = ActionError::unresolved(action.as_str());
                Box::pin(async move { Err(err) })
            }
        };

        let invocation = self.tracker.invocation(handle);
        self.spawn_tracked(action, handle, future);
        Ok(invocation)
    }

    /// Start `future` on the request executor and settle `handle` with its result.
    ///
    /// A panicking handler settles as [`ActionError::Cancelled`].
    fn spawn_tracked(self: &Arc<Self>, action: ActionId, handle: TrackerHandle, future: HandlerFuture) {
        let scope = self.clone();

        self.executor.start(Box::pin(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(action = %action, position = handle.position(), "Invocation panicked");
                    Err(ActionError::Cancelled {
                        id: action.to_string(),
                    })
                }
            };
            scope.settle(&action, handle, outcome);
        }));
    }

    fn settle(&self, action: &ActionId, handle: TrackerHandle, outcome: Outcome) {
        if let Ok(ActionOutput::Response(response)) = &outcome {
            self.candidates.lock().push(response.clone());
        }
        if !action.is_anonymous() {
            self.middleware.lock().after(self.key(handle), action, &outcome);
        }

        match outcome {
            Ok(output) => self.tracker.resolve(handle, output),
            Err(err) => {
                tracing::debug!(action = %action, position = handle.position(), error = %err, "Invocation failed");
                self.tracker.reject(handle, err);
            }
        }
    }

    pub(crate) fn tracker(&self) -> &InvocationTracker {
        &self.tracker
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn form(&self) -> Option<&FormTarget> {
        self.form.as_ref()
    }

    pub(crate) fn route(&self) -> Option<&MatchedRoute> {
        self.route.as_ref()
    }

    /// First response produced by any invocation, in completion order.
    pub(crate) fn first_candidate(&self) -> Option<ActionResponse> {
        self.candidates.lock().first().cloned()
    }

    pub(crate) fn take_deferred(&self) -> Vec<DeferredTask> {
        std::mem::take(&mut *self.deferred.lock())
    }
}

/// Request context handed to every handler invocation.
///
/// Cheap to clone; clones refer to the same request.
#[derive(Clone)]
pub struct ActionContext {
    scope: Arc<RequestScope>,
    action: ActionId,
    position: usize,
    args: Arc<[Value]>,
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("action", &self.action)
            .field("position", &self.position)
            .field("url", &self.scope.url)
            .finish()
    }
}

impl ActionContext {
    pub(crate) fn new(
        scope: Arc<RequestScope>,
        action: ActionId,
        position: usize,
        args: Arc<[Value]>,
    ) -> Self {
        Self {
            scope,
            action,
            position,
            args,
        }
    }

    /// Id of the action this context was created for.
    pub fn action_id(&self) -> &ActionId {
        &self.action
    }

    /// Ledger position of this invocation.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The request store.
    pub fn store(&self) -> &SharedStore {
        &self.scope.store
    }

    pub fn url(&self) -> &str {
        &self.scope.url
    }

    pub fn request_id(&self) -> Option<&str> {
        self.scope.request_id.as_deref()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.scope.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.scope.headers
    }

    pub fn route(&self) -> Option<&MatchedRoute> {
        self.scope.route.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.scope.config
    }

    /// The submitted form, for form-driven actions.
    pub fn form(&self) -> Option<&FormTarget> {
        self.scope.form.as_ref()
    }

    /// Open client connection for this request, if the transport had one.
    pub fn connection(&self) -> Option<&Connection> {
        self.scope.connection.as_ref()
    }

    /// Arguments this invocation was called with.
    ///
    /// The store's params key for the action holds the arguments of its
    /// latest call; each context keeps its own.
    pub fn params(&self) -> Vec<Value> {
        self.args.to_vec()
    }

    pub fn tracker(&self) -> &InvocationTracker {
        &self.scope.tracker
    }

    /// Wait for every invocation started after this one.
    ///
    /// Nested calls a handler fires without awaiting are still finished by
    /// the time this returns. Failures come back together as
    /// [`ActionError::Aggregate`].
    pub async fn wait_nested(&self) -> Result<Vec<ActionOutput>> {
        self.scope.tracker.await_from(self.position + 1).await
    }

    /// Track a future under an anonymous ledger entry so that
    /// [`wait_nested`](Self::wait_nested) covers it.
    pub fn track<F, T>(&self, future: F) -> Result<Invocation>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Into<ActionOutput>,
    {
        let action = ActionId::anonymous();
        let handle = self.scope.tracker.begin(action.clone())?;
        let invocation = self.scope.tracker.invocation(handle);
        self.scope
            .spawn_tracked(action, handle, Box::pin(async move { future.await.map(Into::into) }));
        Ok(invocation)
    }

    /// Schedule `task` to run once the response has been produced.
    pub fn after<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scope.deferred.lock().push(Box::pin(task));
    }

    /// Responses produced so far, in completion order.
    pub fn response_candidates(&self) -> Vec<ActionResponse> {
        self.scope.candidates.lock().clone()
    }
}

/// Form that triggered the action.
#[derive(Debug)]
pub struct FormTarget {
    data: FormData,
    action: String,
    reset: AtomicBool,
}

impl FormTarget {
    pub(crate) fn new(data: FormData, action: String) -> Self {
        Self {
            data,
            action,
            reset: AtomicBool::new(false),
        }
    }

    /// Submitted fields, without the store snapshot field.
    pub fn data(&self) -> &FormData {
        &self.data
    }

    /// URL the form was posted to.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Ask the client to reset the form once the response arrives.
    pub fn reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    pub fn was_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    /// Event object passed as the sole argument of a form action.
    pub(crate) fn event(&self) -> Value {
        let target = json!({
            "action": self.action,
            "autocomplete": "on",
            "enctype": "multipart/form-data",
            "encoding": "multipart/form-data",
            "method": "post",
            "elements": {},
        });

        json!({
            "isTrusted": true,
            "bubbles": false,
            "cancelBubble": false,
            "cancelable": false,
            "composed": false,
            "currentTarget": target,
            "defaultPrevented": true,
            "eventPhase": 0,
            "formData": self.data.to_json(),
            "returnValue": true,
            "srcElement": null,
            "target": target,
            "timeStamp": 0,
            "type": "formdata",
        })
    }
}
