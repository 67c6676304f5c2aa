//! The action engine: one entry point per inbound request
//!
//! [`ActionEngine::handle_action`] runs the whole dispatch pipeline:
//!
//! 1. hydrate the request store from the client snapshot
//! 2. resolve the requested action (unknown ids get a 404 response)
//! 3. build nested action props from the dependency chain
//! 4. run the top-level handler and wait out everything it started
//! 5. reconcile the response, merge page headers, signal form reset
//!
//! # Example
//!
//! ```ignore
//! let actions = ActionMap::new().with("incA", increment);
//! let engine = ActionEngine::new(actions);
//!
//! let response = engine.handle_action(request).await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::action::{ActionHandler, ActionId};
use crate::config::EngineConfig;
use crate::connections::ConnectionRegistry;
use crate::context::{ActionContext, FormTarget, RequestScope};
use crate::deps::{resolve_props, DependencyChain};
use crate::error::{ActionError, Result};
use crate::middleware::{self, InvocationMiddleware, NoopMiddleware, SharedMiddleware};
use crate::props::Props;
use crate::reconcile;
use crate::registry::ActionRegistry;
use crate::request::{ActionRequest, MatchedRoute};
use crate::response::{ActionResponse, Headers};
use crate::store::RequestStore;
use crate::transfer::{StorePayload, StoreSealer, TransferService};

/// Future returned by a [`ResponseHeadersHook`].
pub type HeadersFuture = Pin<Box<dyn Future<Output = Result<Headers>> + Send + 'static>>;

/// Supplies page-level response headers for a matched route.
///
/// Called once per request that carries a [`MatchedRoute`], after the
/// response has been chosen. Returned headers overwrite the response's own.
///
/// Any `Fn(MatchedRoute, ActionContext, u16) -> impl Future<Output = Result<Headers>>`
/// implements this trait.
pub trait ResponseHeadersHook: Send + Sync + 'static {
    fn headers(&self, route: &MatchedRoute, ctx: &ActionContext, status: u16) -> HeadersFuture;
}

impl<F, Fut> ResponseHeadersHook for F
where
    F: Fn(MatchedRoute, ActionContext, u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Headers>> + Send + 'static,
{
    fn headers(&self, route: &MatchedRoute, ctx: &ActionContext, status: u16) -> HeadersFuture {
        Box::pin(self(route.clone(), ctx.clone(), status))
    }
}

/// Dispatches inbound action requests.
///
/// The engine is cheap to clone and holds no per-request state; every call
/// to [`handle_action`](Self::handle_action) gets its own store and ledger.
#[derive(Clone)]
pub struct ActionEngine {
    registry: Arc<dyn ActionRegistry>,
    config: Arc<EngineConfig>,
    sealer: Option<Arc<dyn StoreSealer>>,
    transfer: TransferService,
    headers_hook: Option<Arc<dyn ResponseHeadersHook>>,
    connections: Option<ConnectionRegistry>,
    middleware: SharedMiddleware,
}

impl std::fmt::Debug for ActionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEngine")
            .field("config", &self.config)
            .field("transfer", &self.transfer)
            .field("headers_hook", &self.headers_hook.is_some())
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ActionEngine {
    pub fn new<R: ActionRegistry + 'static>(registry: R) -> Self {
        let config = EngineConfig::default();
        Self {
            registry: Arc::new(registry),
            transfer: TransferService::new(config.store_field.clone()),
            config: Arc::new(config),
            sealer: None,
            headers_hook: None,
            connections: None,
            middleware: middleware::shared(NoopMiddleware),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self.rebuild_transfer();
        self
    }

    /// Seal store keys marked [`TransferOptions::ENCRYPT`](crate::TransferOptions::ENCRYPT).
    pub fn with_sealer<S: StoreSealer + 'static>(mut self, sealer: S) -> Self {
        self.sealer = Some(Arc::new(sealer));
        self.rebuild_transfer();
        self
    }

    pub fn with_headers_hook<H: ResponseHeadersHook>(mut self, hook: H) -> Self {
        self.headers_hook = Some(Arc::new(hook));
        self
    }

    /// Hand open client connections to handlers by request id.
    pub fn with_connections(mut self, connections: ConnectionRegistry) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_middleware<M: InvocationMiddleware + 'static>(self, middleware: M) -> Self {
        self.with_shared_middleware(middleware::shared(middleware))
    }

    /// Use middleware the caller keeps a handle to, e.g. to read an action log.
    pub fn with_shared_middleware(mut self, middleware: SharedMiddleware) -> Self {
        self.middleware = middleware;
        self
    }

    fn rebuild_transfer(&mut self) {
        let mut transfer = TransferService::new(self.config.store_field.clone());
        if let Some(sealer) = &self.sealer {
            transfer = transfer.with_sealer(sealer.clone());
        }
        self.transfer = transfer;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transfer(&self) -> &TransferService {
        &self.transfer
    }

    /// Handle one action request.
    ///
    /// An unknown action id is answered with a 404 response, and a malformed
    /// store snapshot is dropped. Handler failures are returned as errors:
    /// the top-level handler's own failure first, else the aggregate of
    /// failures among the invocations it started that no handler awaited.
    pub async fn handle_action(&self, request: ActionRequest) -> Result<ActionResponse> {
        let hydrated = self.transfer.hydrate(&request);
        let action = request.action_id(&self.config);
        let chain = self.dependency_chain(&request);

        let mut store = RequestStore::new();
        hydrated.apply(&mut store);
        store.set(
            RequestStore::dependencies_key(),
            serde_json::to_value(&chain).unwrap_or_default(),
        );

        let connection = match (&self.connections, request.id.as_deref()) {
            (Some(connections), Some(id)) => connections.take(id),
            _ => None,
        };
        let scope = Arc::new(RequestScope::new(
            &request,
            self.config.clone(),
            store,
            hydrated.form,
            connection,
            self.middleware.clone(),
        ));

        let Some(handler) = self.registry.resolve(&action) else {
            tracing::error!(
                action = %action,
                url = %request.url,
                "Action not found; the client build may be stale"
            );
            return Ok(reconcile::not_found(&action, &self.outbound(&scope)));
        };

        let args = match scope.form() {
            Some(form) => vec![form.event()],
            None => hydrated.args,
        };
        let props = resolve_props(&chain, &*self.registry, &scope);

        tracing::debug!(
            action = %action,
            levels = chain.len(),
            props = props.len(),
            args = args.len(),
            "Dispatching action"
        );

        let response = scope
            .drive(self.run(&scope, action.clone(), handler, props, args))
            .await?;

        let deferred = scope.take_deferred();
        if !deferred.is_empty() {
            tracing::debug!(action = %action, tasks = deferred.len(), "Running deferred tasks");
        }
        for task in deferred {
            tokio::spawn(task);
        }

        tracing::debug!(
            action = %action,
            status = response.status,
            invocations = scope.tracker().len(),
            "Action handled"
        );
        Ok(response)
    }

    /// Run the top-level handler, wait out its invocation tree and build
    /// the response. Polled on the request's executor.
    async fn run(
        &self,
        scope: &Arc<RequestScope>,
        action: ActionId,
        handler: Arc<dyn ActionHandler>,
        props: Props,
        args: Vec<Value>,
    ) -> Result<ActionResponse> {
        let top_args: Arc<[Value]> = args.clone().into();
        let invocation = scope.start(action.clone(), Some(handler), props, args)?;
        let position = invocation.position();
        let top_level = invocation.await;
        let drained = scope.tracker().drain_from(position + 1).await;

        let output = top_level?;
        drained?;

        let mut response =
            reconcile::choose_response(output, scope.first_candidate(), || self.outbound(scope));

        if let (Some(hook), Some(route)) = (&self.headers_hook, scope.route()) {
            let ctx = ActionContext::new(scope.clone(), action, position, top_args);
            let headers = hook
                .headers(route, &ctx, response.status)
                .await
                .map_err(|err| match err {
                    ActionError::HeaderHook(_) => err,
                    other => ActionError::HeaderHook(other.to_string()),
                })?;
            reconcile::merge_headers(&mut response, &headers);
        }

        if scope.form().is_some_and(FormTarget::was_reset) {
            reconcile::apply_reset(&mut response, &self.config.reset_header);
        }
        Ok(response)
    }

    fn dependency_chain(&self, request: &ActionRequest) -> DependencyChain {
        let header = request
            .headers
            .get(&self.config.dependencies_header)
            .unwrap_or_default();

        DependencyChain::parse(header).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Malformed dependency header, ignoring nested actions");
            DependencyChain::default()
        })
    }

    fn outbound(&self, scope: &RequestScope) -> StorePayload {
        scope.store().read(|store| self.transfer.encode_outbound(store))
    }

    /// Whether `action` resolves in this engine's registry.
    pub fn has_action(&self, action: &ActionId) -> bool {
        self.registry.resolve(action).is_some()
    }
}
