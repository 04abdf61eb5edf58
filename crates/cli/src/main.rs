//! Console renderer over the call monitor
//!
//! Connects to a callwatch backend, hydrates the active-call list, and
//! prints call transitions as they stream in. This is the whole UI:
//! everything interesting happens in `callwatch-monitor-core`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use callwatch_monitor_core::events::MonitorEventHandler;
use callwatch_monitor_core::{CallMonitor, CallRecord, ConnectionState, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "callwatch", about = "Watch live voice-agent calls from the terminal")]
struct Args {
    /// Base URL of the REST API
    #[arg(long, env = "CALLWATCH_API_BASE", default_value = "http://127.0.0.1:8000")]
    api_base: String,

    /// URL of the dashboard stream endpoint
    #[arg(
        long,
        env = "CALLWATCH_STREAM_URL",
        default_value = "ws://127.0.0.1:8000/ws/dashboard"
    )]
    stream_url: String,

    /// Bearer token issued by the session provider
    #[arg(long, env = "CALLWATCH_TOKEN")]
    token: String,

    /// Tenant whose calls to watch
    #[arg(long, env = "CALLWATCH_TENANT")]
    tenant: String,

    /// Only watch calls assigned to this user id
    #[arg(long)]
    user: Option<String>,

    /// Seconds between reconnect attempts
    #[arg(long, default_value_t = 3)]
    reconnect_secs: u64,
}

struct ConsoleRenderer;

#[async_trait]
impl MonitorEventHandler for ConsoleRenderer {
    async fn on_new_active_call(&self, call: CallRecord) {
        println!(
            "NEW    {}  {}  {}",
            call.id,
            call.status.as_deref().unwrap_or("-"),
            call.phone_number.as_deref().unwrap_or("unknown number"),
        );
    }

    async fn on_call_updated(&self, call: CallRecord) {
        println!(
            "UPDATE {}  {}  {}",
            call.id,
            call.status.as_deref().unwrap_or("-"),
            call.live_transcript
                .as_deref()
                .map(last_line)
                .unwrap_or_default(),
        );
    }

    async fn on_call_ended(&self, call: CallRecord) {
        println!(
            "ENDED  {}  duration {}",
            call.id,
            call.duration
                .map(|secs| format!("{secs}s"))
                .unwrap_or_else(|| "unknown".into()),
        );
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        println!("--     stream {state}");
    }
}

fn last_line(transcript: &str) -> &str {
    transcript.lines().last().unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callwatch=info,callwatch_monitor_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = MonitorConfig::new(&args.api_base, &args.stream_url, &args.token, &args.tenant)
        .with_reconnect_delay(Duration::from_secs(args.reconnect_secs));
    if let Some(user) = &args.user {
        config = config.with_user_filter(user);
    }

    let monitor = CallMonitor::new(config).context("invalid monitor configuration")?;
    monitor.set_event_handler(Arc::new(ConsoleRenderer)).await;
    monitor.start().await;
    info!(tenant = %args.tenant, "watching for active calls, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    monitor.shutdown().await;
    Ok(())
}
