//! # callwatch-monitor-core
//!
//! Active-call state synchronization for supervisor dashboards that
//! monitor live voice-agent phone calls.
//!
//! The crate keeps a client's view of "currently active calls" correct
//! and live despite an unreliable stream connection, an independent REST
//! snapshot, and partial updates that must never clobber known data. Its
//! one outward promise: a *new call* notification fires exactly once per
//! call lifecycle, never duplicated across reconnects or snapshot
//! refreshes.
//!
//! # Architecture
//!
//! ```text
//! SnapshotClient (REST)  ----\
//!                             +--> Reconciler --> MonitorEventHandler
//! ConnectionManager (WS) --> StreamEventBus     SubscriptionManager
//! ```
//!
//! - [`connection::ConnectionManager`] - owns the persistent stream:
//!   connect, authenticate, detect loss, reconnect on a fixed delay.
//! - [`events::StreamEventBus`] - decodes frames and fans them out to
//!   listeners synchronously, in registration order.
//! - [`reconciler::Reconciler`] - the authoritative id -> record map,
//!   merging snapshots and streamed updates non-destructively.
//! - [`subscription::SubscriptionManager`] - tells the server which calls
//!   to stream details for, replaying after every reconnect.
//! - [`monitor::CallMonitor`] - ties the above into one object with one
//!   lifetime.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callwatch_monitor_core::{CallMonitor, CallRecord, MonitorConfig};
//! use callwatch_monitor_core::events::MonitorEventHandler;
//!
//! struct Alerts;
//!
//! #[async_trait]
//! impl MonitorEventHandler for Alerts {
//!     async fn on_new_active_call(&self, call: CallRecord) {
//!         println!("📞 {} is live", call.id);
//!     }
//!     async fn on_call_ended(&self, call: CallRecord) {
//!         println!("{} ended", call.id);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> callwatch_monitor_core::Result<()> {
//!     let config = MonitorConfig::new(
//!         "https://api.example.com",
//!         "wss://api.example.com/ws/dashboard",
//!         std::env::var("CALLWATCH_TOKEN").unwrap_or_default(),
//!         "acme",
//!     );
//!     let monitor = CallMonitor::new(config)?;
//!     monitor.set_event_handler(Arc::new(Alerts)).await;
//!     monitor.start().await;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod monitor;
pub mod reconciler;
pub mod snapshot;
pub mod subscription;

pub use call::CallRecord;
pub use config::MonitorConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{MonitorError, Result};
pub use events::{
    ControlMessage, MonitorEvent, MonitorEventHandler, StreamEvent, StreamEventBus,
    StreamListener,
};
pub use monitor::CallMonitor;
pub use reconciler::{NotificationGate, Reconciler, Transition};
pub use snapshot::SnapshotClient;
pub use subscription::SubscriptionManager;
