//! Run tool calls through the pipeline from the command line.
//!
//! Usage:
//!   cargo run --example call_tool -- --tool echo --params '{"message": "hi"}'
//!   cargo run --example call_tool -- --tool delete --params '{"path": "lib/old"}' --confirmed
//!   cargo run --example call_tool -- --tool slow --params '{"ms": 500}' --copies 3
//!   cargo run --example call_tool -- --config fly-mcp.json --tool slow --params '{"ms": 5000}'
//!
//! `--copies` fires that many identical calls at once, which makes the
//! concurrency limits visible. Set RUST_LOG=debug to watch each stage.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fly_mcp::{
    handler_fn, load_config, RequestId, Server, ServerConfig, ToolCallRequest, ToolDefinition,
    ToolError, ToolRegistry,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "call_tool", about = "Run tool calls through the fly-mcp pipeline")]
struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Tool to call: echo, slow or delete
    #[arg(long, default_value = "echo")]
    tool: String,

    /// Parameters as a JSON object
    #[arg(long, default_value = "{}")]
    params: String,

    /// Assert confirmation for tools that require it
    #[arg(long)]
    confirmed: bool,

    /// Number of identical calls to run concurrently
    #[arg(long, default_value_t = 1)]
    copies: usize,
}

fn demo_tools() -> Result<ToolRegistry, Box<dyn std::error::Error>> {
    let echo = ToolDefinition::new(
        "echo",
        handler_fn(|params: Value, _ctx| async move {
            Ok::<_, ToolError>(json!({ "message": params["message"] }))
        }),
    )
    .description("Echo a message back")
    .read_only()
    .idempotent()
    .params_schema(json!({
        "type": "object",
        "properties": {"message": {"type": "string"}},
        "required": ["message"]
    }));

    let slow = ToolDefinition::new(
        "slow",
        handler_fn(|params: Value, ctx| async move {
            let ms = params["ms"].as_u64().unwrap_or(1000);
            let steps = 10;
            for step in 1..=steps {
                ctx.check_cancelled()?;
                tokio::time::sleep(Duration::from_millis(ms / steps)).await;
                ctx.report_progress(step as f64, Some(steps as f64), None);
            }
            Ok::<_, ToolError>(json!({ "sleptMs": ms }))
        }),
    )
    .description("Sleep for a while, checking for cancellation")
    .max_concurrency(2)
    .params_schema(json!({
        "type": "object",
        "properties": {"ms": {"type": "integer", "minimum": 0}}
    }));

    let delete = ToolDefinition::new(
        "delete",
        handler_fn(|params: Value, _ctx| async move {
            Ok::<_, ToolError>(json!({ "deleted": params["path"], "dryRun": true }))
        }),
    )
    .description("Pretend to delete generated files")
    .writes_to_disk()
    .requires_confirmation()
    .params_schema(json!({
        "type": "object",
        "properties": {"path": {"type": "string", "minLength": 1}},
        "required": ["path"]
    }));

    Ok(ToolRegistry::new()
        .with_tool(echo)?
        .with_tool(slow)?
        .with_tool(delete)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let params: Value = serde_json::from_str(&cli.params)?;
    let server = Server::builder(config, demo_tools()?).build()?;

    let mut calls = Vec::new();
    for i in 0..cli.copies.max(1) {
        let server = server.clone();
        let mut request = ToolCallRequest::new(
            RequestId::Number(i as i64 + 1),
            cli.tool.clone(),
            params.clone(),
        );
        request.confirmed = cli.confirmed;
        calls.push(tokio::spawn(async move { server.call(request).await }));
    }

    for call in calls {
        let response = call.await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}
