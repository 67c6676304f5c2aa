//! Forms, sealed store keys, page headers, connections and deferred work

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use action_dispatch::prelude::*;
use action_dispatch::testing::{form_request, json_request, ActionHarness, ResponseAssertions};
use action_dispatch::{ConnectionRegistry, Outcome, StoreSealer};
use tokio::sync::mpsc;

const SECRET_KEY: u8 = 0x5a;

struct XorSealer;

impl StoreSealer for XorSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ SECRET_KEY).collect())
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        self.seal(sealed)
    }
}

async fn subscribe(_props: Props, ctx: ActionContext) -> Result<Value> {
    let form = ctx.form().expect("form action");
    let email = form
        .data()
        .get("email")
        .and_then(FormValue::as_text)
        .unwrap_or_default()
        .to_string();

    ctx.store().set("subscribed", email);
    ctx.store().mark_for_transfer(["subscribed"], TransferOptions::empty());
    form.reset();
    Ok(Value::Null)
}

#[tokio::test]
async fn test_form_submission_resets_and_hydrates() {
    let harness = ActionHarness::new().with("subscribe", subscribe);
    let form = FormData::new()
        .with("email", "ada@example.com")
        .with("x-s", r#"[["visits", 2]]"#);

    let response = harness
        .dispatch(form_request("subscribe", form))
        .await
        .unwrap();

    response.assert_status(200).assert_header("x-reset", "1");
    assert_eq!(
        response.store_entry("subscribed"),
        Some(json!("ada@example.com"))
    );
    assert_eq!(response.store_entry("visits"), Some(json!(2)));
}

#[tokio::test]
async fn test_form_event_is_the_only_argument() {
    async fn inspect(_props: Props, ctx: ActionContext) -> Result<Value> {
        let args = ctx.params();
        ctx.store().set("argc", args.len());
        ctx.store().set("event", args.into_iter().next().unwrap_or_default());
        ctx.store()
            .mark_for_transfer(["argc", "event"], TransferOptions::empty());
        Ok(Value::Null)
    }

    let harness = ActionHarness::new().with("inspect", inspect);
    let form = FormData::new().with("tag", "a").with("tag", "b");

    let response = harness.dispatch(form_request("inspect", form)).await.unwrap();

    response.assert_no_header("x-reset");
    assert_eq!(response.store_entry("argc"), Some(json!(1)));
    let event = response.store_entry("event").unwrap();
    assert_eq!(event["type"], "formdata");
    assert_eq!(event["formData"], json!({ "tag": ["a", "b"] }));
    assert_eq!(event["target"]["method"], "post");
}

#[tokio::test]
async fn test_sealed_keys_round_trip() {
    async fn login(_props: Props, ctx: ActionContext) -> Result<Value> {
        ctx.store().set("token", "t-123");
        ctx.store().mark_for_transfer(["token"], TransferOptions::ENCRYPT);
        Ok(Value::Null)
    }

    async fn whoami(_props: Props, ctx: ActionContext) -> Result<Value> {
        let token = ctx.store().get("token").unwrap_or_default();
        ctx.store().set("seen", token);
        ctx.store().mark_for_transfer(["seen"], TransferOptions::empty());
        Ok(Value::Null)
    }

    let engine = ActionEngine::new(ActionMap::new().with("login", login).with("whoami", whoami))
        .with_sealer(XorSealer);

    let first = engine
        .handle_action(json_request("login", json!([]), json!([])))
        .await
        .unwrap();
    let sealed = first.store_entry("token").unwrap();
    assert!(sealed.is_string());
    assert_ne!(sealed, json!("t-123"));

    // The client echoes the payload back verbatim
    let second = engine
        .handle_action(json_request("whoami", json!(first.text()), json!([])))
        .await
        .unwrap();
    assert_eq!(second.store_entry("seen"), Some(json!("t-123")));
    assert_eq!(second.store_entry("token"), Some(sealed));
}

#[tokio::test]
async fn test_sealed_keys_withheld_without_sealer() {
    async fn login(_props: Props, ctx: ActionContext) -> Result<Value> {
        ctx.store().set("token", "t-123");
        ctx.store().mark_for_transfer(["token"], TransferOptions::ENCRYPT);
        ctx.store().set("user", "ada");
        ctx.store().mark_for_transfer(["user"], TransferOptions::empty());
        Ok(Value::Null)
    }

    let harness = ActionHarness::new().with("login", login);
    let response = harness.call("login", json!([]), json!([])).await.unwrap();

    assert_eq!(response.store_entry("token"), None);
    assert_eq!(response.store_entry("user"), Some(json!("ada")));
}

#[tokio::test]
async fn test_page_headers_merge_into_response() {
    let engine = ActionEngine::new(ActionMap::new().with(
        "noop",
        |_props: Props, _ctx: ActionContext| async { Ok::<_, ActionError>(Value::Null) },
    ))
    .with_headers_hook(
        |route: MatchedRoute, _ctx: ActionContext, status: u16| async move {
            let mut headers = Headers::new();
            headers.set("x-page", route.pathname);
            headers.set("x-status", status.to_string());
            headers.set("content-type", "application/json; charset=utf-8");
            Ok::<_, ActionError>(headers)
        },
    );

    let with_route = json_request("noop", json!([]), json!([]))
        .with_route(MatchedRoute::new("/dashboard", "pages/dashboard.rs"));
    let response = engine.handle_action(with_route).await.unwrap();
    response
        .assert_header("x-page", "/dashboard")
        .assert_header("x-status", "200")
        .assert_header("content-type", "application/json; charset=utf-8");

    let without_route = json_request("noop", json!([]), json!([]));
    let response = engine.handle_action(without_route).await.unwrap();
    response.assert_no_header("x-page");
}

#[tokio::test]
async fn test_connection_handed_to_handler() {
    async fn stream(_props: Props, ctx: ActionContext) -> Result<Value> {
        if let Some(connection) = ctx.connection() {
            let _ = connection.send(json!({ "progress": 50 }));
            let _ = connection.send(json!({ "progress": 100 }));
        }
        Ok(Value::Null)
    }

    let connections = ConnectionRegistry::new();
    let mut updates = connections.channel("req-1");
    let engine = ActionEngine::new(ActionMap::new().with("stream", stream))
        .with_connections(connections.clone());

    let request = json_request("stream", json!([]), json!([])).with_id("req-1");
    engine.handle_action(request).await.unwrap();

    assert_eq!(updates.recv().await, Some(json!({ "progress": 50 })));
    assert_eq!(updates.recv().await, Some(json!({ "progress": 100 })));
    // The engine took ownership; once it is dropped the stream ends
    assert_eq!(updates.recv().await, None);
    assert!(!connections.contains("req-1"));
}

#[tokio::test]
async fn test_deferred_tasks_run_after_response() {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let engine = ActionEngine::new(ActionMap::new().with(
        "notify",
        move |_props: Props, ctx: ActionContext| {
            let tx = tx.clone();
            async move {
                ctx.after(async move {
                    let _ = tx.send("sent");
                });
                Ok::<_, ActionError>(Value::Null)
            }
        },
    ));

    engine
        .handle_action(json_request("notify", json!([]), json!([])))
        .await
        .unwrap();
    assert_eq!(rx.recv().await, Some("sent"));
}

#[tokio::test]
async fn test_deferred_tasks_skipped_on_failure() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();

    let engine = ActionEngine::new(ActionMap::new().with(
        "broken",
        move |_props: Props, ctx: ActionContext| {
            let counter = counter.clone();
            async move {
                ctx.after(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                Err::<Value, _>(ActionError::handler("broken", "no"))
            }
        },
    ));

    let result = engine
        .handle_action(json_request("broken", json!([]), json!([])))
        .await;
    assert!(result.is_err());
    tokio::task::yield_now().await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct Counting {
    before: Arc<AtomicUsize>,
    after: Arc<AtomicUsize>,
    open: Arc<Mutex<HashSet<InvocationKey>>>,
}

impl InvocationMiddleware for Counting {
    fn before(&mut self, key: InvocationKey, _action: &ActionId, _args: &[Value]) {
        self.before.fetch_add(1, Ordering::SeqCst);
        assert!(self.open.lock().unwrap().insert(key), "key reused: {key:?}");
    }

    fn after(&mut self, key: InvocationKey, _action: &ActionId, _outcome: &Outcome) {
        self.after.fetch_add(1, Ordering::SeqCst);
        assert!(self.open.lock().unwrap().remove(&key), "unpaired settle: {key:?}");
    }
}

#[tokio::test]
async fn test_middleware_sees_every_named_invocation() {
    async fn top(props: Props, ctx: ActionContext) -> Result<Value> {
        props.call("onChild", vec![]).expect("bound")?;
        ctx.track(async { Ok::<_, ActionError>(Value::Null) })?;
        Ok(Value::Null)
    }

    let counting = Counting::default();
    let (before, after, open) = (
        counting.before.clone(),
        counting.after.clone(),
        counting.open.clone(),
    );

    let mut middleware = ComposedMiddleware::new();
    middleware.add(counting).add(LoggingMiddleware::verbose());

    let engine = ActionEngine::new(ActionMap::new().with("top", top).with(
        "child",
        |_props: Props, _ctx: ActionContext| async { Ok::<_, ActionError>(Value::Null) },
    ))
    .with_middleware(middleware);

    let request = json_request("top", json!([]), json!([]))
        .with_header("x-actions", json!([[["onChild", "child"]]]).to_string());
    engine.handle_action(request).await.unwrap();

    // Anonymous tracked work is not reported
    assert_eq!(before.load(Ordering::SeqCst), 2);
    assert_eq!(after.load(Ordering::SeqCst), 2);
    assert!(open.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_action_log_pairs_repeated_calls() {
    async fn fan(props: Props, ctx: ActionContext) -> Result<Value> {
        for delay in [30u64, 0] {
            props.call("onItem", vec![json!(delay)]).expect("bound")?;
        }
        ctx.wait_nested().await?;
        Ok(Value::Null)
    }

    async fn item(_props: Props, ctx: ActionContext) -> Result<Value> {
        let delay = ctx.params().first().and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if delay == 0 {
            return Err(ActionError::handler("item", "fast failure"));
        }
        Ok(Value::Null)
    }

    let harness = ActionHarness::new().with("fan", fan).with("item", item);
    let request = json_request("fan", json!([]), json!([]))
        .with_header("x-actions", json!([[["onItem", "item"]]]).to_string());
    let _ = harness.dispatch(request).await;

    let states: Vec<_> = harness
        .entries()
        .into_iter()
        .map(|e| (e.action.to_string(), e.summary, e.succeeded))
        .collect();
    assert_eq!(
        states,
        vec![
            ("fan".to_string(), "[]".to_string(), Some(false)),
            ("item".to_string(), "[30]".to_string(), Some(true)),
            ("item".to_string(), "[0]".to_string(), Some(false)),
        ]
    );
}
