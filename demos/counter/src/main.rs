//! Counter - action-dispatch example
//!
//! Runs one action request through the engine and prints the response:
//! 1. The client store snapshot and arguments become the request body
//! 2. The engine hydrates the store and runs the action
//! 3. Nested actions bound with `--bind` run through props
//! 4. The changed store is printed as the client would receive it
//!
//! # Usage
//!
//! ```sh
//! # Increment a counter the client holds at 5
//! cargo run -p counter -- increment --store '[["count", 5]]'
//!
//! # Add 10, then let the bound `onChange` action double the result
//! cargo run -p counter -- add --store '[["count", 1]]' --args '[10]' --bind onChange=double
//!
//! # Replay a raw request body from a file (or `-` for stdin)
//! cargo run -p counter -- increment --body request.json
//! ```

use std::io::Read;
use std::process::ExitCode;

use action_dispatch::prelude::*;
use clap::Parser;
use serde_json::Map;

const COUNT: &str = "count";
const URL: &str = "http://localhost/counter";

/// Run a counter action through action-dispatch
#[derive(Parser, Debug)]
#[command(name = "counter")]
#[command(about = "Dispatch counter actions and print the response")]
struct Args {
    /// Action to invoke: increment, decrement, add, double, reset
    action: String,

    /// Client store snapshot, e.g. '[["count", 5]]'
    #[arg(long, default_value = "[]")]
    store: String,

    /// Positional call arguments as a JSON array
    #[arg(long, default_value = "[]")]
    args: String,

    /// Bind a nested action, as EVENT=ACTION (repeatable)
    #[arg(long = "bind", value_parser = parse_binding)]
    bindings: Vec<(String, String)>,

    /// Read the raw request body from a file (`-` for stdin)
    #[arg(long, conflicts_with_all = ["store", "args"])]
    body: Option<String>,

    /// Log every invocation with its arguments
    #[arg(long, short)]
    verbose: bool,
}

fn parse_binding(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(event, action)| (event.to_string(), action.to_string()))
        .ok_or_else(|| format!("expected EVENT=ACTION, got {raw:?}"))
}

fn count(ctx: &ActionContext) -> i64 {
    ctx.store().get(COUNT).and_then(|v| v.as_i64()).unwrap_or(0)
}

/// Store the new count and notify whoever bound `onChange`.
async fn commit(props: &Props, ctx: &ActionContext, value: i64) -> Result<Value> {
    ctx.store().set(COUNT, value);
    ctx.store().mark_for_transfer([COUNT], TransferOptions::empty());

    if let Some(invocation) = props.call("onChange", vec![json!(value)]) {
        invocation?;
        ctx.wait_nested().await?;
    }
    Ok(json!(count(ctx)))
}

async fn increment(props: Props, ctx: ActionContext) -> Result<Value> {
    commit(&props, &ctx, count(&ctx) + 1).await
}

async fn decrement(props: Props, ctx: ActionContext) -> Result<Value> {
    commit(&props, &ctx, count(&ctx) - 1).await
}

async fn add(props: Props, ctx: ActionContext) -> Result<Value> {
    let amount = ctx
        .params()
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| ActionError::handler("add", "expected a numeric argument"))?;
    commit(&props, &ctx, count(&ctx) + amount).await
}

async fn double(_props: Props, ctx: ActionContext) -> Result<Value> {
    let doubled = count(&ctx) * 2;
    ctx.store().set(COUNT, doubled);
    Ok(json!(doubled))
}

async fn reset(_props: Props, ctx: ActionContext) -> Result<ActionResponse> {
    ctx.store().set(COUNT, 0);
    Ok(ActionResponse::new(303).with_header("location", "/"))
}

fn actions() -> ActionMap {
    ActionMap::new()
        .with("increment", increment)
        .with("decrement", decrement)
        .with("add", add)
        .with("double", double)
        .with("reset", reset)
}

fn read_body(source: &str) -> std::io::Result<String> {
    if source == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        Ok(body)
    } else {
        std::fs::read_to_string(source)
    }
}

fn build_request(args: &Args, config: &EngineConfig) -> std::result::Result<ActionRequest, String> {
    let body = match &args.body {
        Some(source) => read_body(source).map_err(|e| format!("reading {source}: {e}"))?,
        None => {
            let store: Value =
                serde_json::from_str(&args.store).map_err(|e| format!("--store: {e}"))?;
            let call_args: Value =
                serde_json::from_str(&args.args).map_err(|e| format!("--args: {e}"))?;

            let mut body = Map::new();
            body.insert(config.store_field.clone(), store);
            body.insert("args".to_string(), call_args);
            Value::Object(body).to_string()
        }
    };

    let mut request = ActionRequest::new(URL)
        .with_header(&config.action_header, args.action.as_str())
        .with_json_body(body);

    if !args.bindings.is_empty() {
        let level: Vec<Value> = args
            .bindings
            .iter()
            .map(|(event, action)| json!([event, action]))
            .collect();
        request = request.with_header(&config.dependencies_header, json!([level]).to_string());
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::default();
    let request = match build_request(&args, &config) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(2);
        }
    };

    let mut engine = ActionEngine::new(actions()).with_config(config);
    if args.verbose {
        engine = engine.with_middleware(LoggingMiddleware::verbose());
    }

    match engine.handle_action(request).await {
        Ok(response) => {
            println!("status: {}", response.status);
            for (name, value) in response.headers.iter() {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", response.text());
            if response.status < 400 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Action failed");
            for leaf in err.leaves() {
                eprintln!("Error: {leaf}");
            }
            ExitCode::FAILURE
        }
    }
}
