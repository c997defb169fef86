//! JSON-line entry point.
//!
//! Reads one `{"operation": "...", "args": {...}}` object per stdin line and
//! writes one JSON result (or `{"error": "..."}`) per line. Transport framing
//! beyond that is left to whatever hosts the process.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use websets_client::WebsetsClient;

use orchestrator::handlers::dispatch;
use orchestrator::kernel::{config::Settings, OrchestratorDeps};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let client = Arc::new(WebsetsClient::new(settings.api_key.clone()));
    let deps = OrchestratorDeps::new(client, &settings);
    let _sweeper = deps.store.spawn_sweeper();

    info!(
        workflows = ?deps.registry.registered_types(),
        "orchestrator ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                let operation = request
                    .get("operation")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let args = request.get("args").cloned().unwrap_or(Value::Null);
                match dispatch(&deps, &operation, args).await {
                    Ok(value) => value,
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            Err(e) => json!({"error": format!("invalid request: {e}")}),
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
