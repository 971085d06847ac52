//! Ping Bot Example
//!
//! Feeds raw chat events, one JSON object per line, from stdin through the
//! Kestrel pipeline and prints every reply to stdout as a JSON line.
//!
//! Plugins come from three places:
//!
//! - `plugins/ping.toml`, `plugins/about.toml`: `reply` manifests
//! - `plugins/echo.toml`: a manifest bound to the `echo` handler kind below
//! - `uptime`: registered in code
//!
//! # Usage
//!
//! ```bash
//! cd demos/ping_bot
//! echo '{"key":{"id":"A1","remoteJid":"62811@s.whatsapp.net"},"pushName":"Ana","message":{"conversation":".ping"}}' \
//!     | cargo run --package ping-bot
//! ```
//!
//! Editing a manifest under `plugins/` while the bot runs reloads it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use kestrel::prelude::*;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "ping-bot", about = "Runs raw chat events from stdin through Kestrel")]
struct Cli {
    /// Configuration file. Searched for in the current directory if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, testing, ...).
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// Transport
// ============================================================================

/// Writes each outgoing message as a JSON line.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(
        &self,
        destination: &str,
        content: &str,
        options: SendOptions,
    ) -> TransportResult<()> {
        let line = json!({
            "to": destination,
            "text": content,
            "quoted": options.quoted.is_some(),
        });
        println!("{line}");
        Ok(())
    }
}

// ============================================================================
// Plugins
// ============================================================================

/// The `echo` handler kind. `[config] shout = true` upper-cases the reply.
struct Echo {
    shout: bool,
}

impl Echo {
    fn from_manifest(manifest: &PluginManifest) -> Result<Self, BoxError> {
        let shout = manifest
            .config
            .get("shout")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self { shout })
    }
}

#[async_trait]
impl CommandPlugin for Echo {
    async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn execute(
        &self,
        msg: &CanonicalMessage,
        _transport: &BoxedTransport,
        ctx: &ExecutionContext,
    ) -> Result<Value, BoxError> {
        if ctx.args.is_empty() {
            msg.reply(&format!("Usage: {}{} <text>", msg.prefix, ctx.command))
                .await;
            return Ok(Value::Null);
        }
        let mut text = ctx.args.join(" ");
        if self.shout {
            text = text.to_uppercase();
        }
        msg.reply(&text).await;
        Ok(Value::String(text))
    }
}

struct Uptime {
    started: Instant,
}

#[async_trait]
impl CommandPlugin for Uptime {
    async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn execute(
        &self,
        msg: &CanonicalMessage,
        _transport: &BoxedTransport,
        _ctx: &ExecutionContext,
    ) -> Result<Value, BoxError> {
        let secs = self.started.elapsed().as_secs();
        msg.reply(&format!(
            "⏱️ Up for {}h {}m {}s",
            secs / 3600,
            secs % 3600 / 60,
            secs % 60
        ))
        .await;
        Ok(json!({ "uptime_secs": secs }))
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

async fn read_events(tx: mpsc::Sender<Value>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str(&line) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping line that is not JSON"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = KestrelRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }

    let runtime = builder
        .transport(StdoutTransport)
        .handler("echo", |m| Ok(Arc::new(Echo::from_manifest(m)?) as BoxedPlugin))
        .builtin(
            PluginManifest::new("uptime")
                .with_alias("up")
                .with_category("info")
                .with_description("Time since the bot started"),
            Uptime {
                started: Instant::now(),
            },
        )
        .build()
        .context("failed to build the runtime")?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(read_events(tx));

    // Returns at end of input or on Ctrl+C.
    runtime.run(rx).await.context("runtime failed")?;
    Ok(())
}
