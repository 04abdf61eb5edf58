//! The call monitor: one owner for the whole synchronizer
//!
//! [`CallMonitor`] wires the snapshot loader, the stream connection, the
//! decoder fan-out, the reconciler, and the subscription manager into a
//! single object with one lifetime: `start` brings everything up
//! concurrently, `shutdown` tears everything down in one logical step.
//! State is reachable only through the narrow read/subscribe surface
//! here - there are no ambient singletons.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callwatch_monitor_core::{CallMonitor, CallRecord, MonitorConfig};
//! use callwatch_monitor_core::events::MonitorEventHandler;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl MonitorEventHandler for Printer {
//!     async fn on_new_active_call(&self, call: CallRecord) {
//!         println!("new call: {}", call.id);
//!     }
//!     async fn on_call_ended(&self, call: CallRecord) {
//!         println!("call ended: {}", call.id);
//!     }
//! }
//!
//! # async fn example() -> callwatch_monitor_core::Result<()> {
//! let config = MonitorConfig::new(
//!     "https://api.example.com",
//!     "wss://api.example.com/ws/dashboard",
//!     "bearer-token",
//!     "acme",
//! );
//! let monitor = CallMonitor::new(config)?;
//! monitor.set_event_handler(Arc::new(Printer)).await;
//! monitor.start().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call::CallRecord;
use crate::config::MonitorConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::Result;
use crate::events::{
    MonitorEvent, MonitorEventHandler, StreamEvent, StreamEventBus, StreamListener,
};
use crate::reconciler::{Reconciler, Transition};
use crate::snapshot::SnapshotClient;
use crate::subscription::SubscriptionManager;

/// Everything the frame path touches, shared between the pump tasks and
/// the public API.
struct Pipeline {
    reconciler: RwLock<Reconciler>,
    bus: StreamEventBus,
    subscriptions: SubscriptionManager,
    handler: tokio::sync::RwLock<Option<Arc<dyn MonitorEventHandler>>>,
}

impl Pipeline {
    /// Decode one frame, fan it out, apply it, then deliver the derived
    /// transitions. Malformed frames are dropped here and never reach
    /// listeners or state.
    async fn handle_frame(&self, frame: &str) {
        let event = match StreamEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        self.bus.dispatch(&event);

        // Apply synchronously; the lock is never held across an await.
        let transitions: Vec<Transition> = {
            let mut reconciler = self.reconciler.write().unwrap();
            match &event {
                StreamEvent::CallUpsert { call, .. } => {
                    reconciler.apply_upsert(call.clone()).into_iter().collect()
                }
                StreamEvent::TranscriptUpdate {
                    call_id,
                    full_transcript,
                    append,
                    status,
                } => reconciler
                    .apply_transcript(
                        call_id,
                        full_transcript.clone(),
                        append.clone(),
                        status.clone(),
                    )
                    .into_iter()
                    .collect(),
                StreamEvent::Hello { source, .. } => {
                    debug!(source = source.as_deref(), "server greeting");
                    Vec::new()
                }
                StreamEvent::Unknown => Vec::new(),
            }
        };

        for transition in transitions {
            self.deliver(transition).await;
        }
    }

    /// Merge snapshot records and deliver the resulting transitions.
    fn apply_snapshot(&self, calls: Vec<CallRecord>) -> Vec<Transition> {
        self.reconciler.write().unwrap().apply_snapshot(calls)
    }

    async fn deliver(&self, transition: Transition) {
        match &transition {
            Transition::NewActiveCall(call) => {
                self.subscriptions.subscribe(&call.id);
            }
            Transition::Ended(call) => {
                self.subscriptions.forget(&call.id);
            }
            Transition::Updated(_) => {}
        }

        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            let event = match transition {
                Transition::NewActiveCall(call) => MonitorEvent::NewActiveCall { call },
                Transition::Updated(call) => MonitorEvent::CallUpdated { call },
                Transition::Ended(call) => MonitorEvent::CallEnded { call },
            };
            handler.on_monitor_event(event).await;
        }
    }

    async fn deliver_connection_state(&self, state: ConnectionState) {
        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            handler
                .on_monitor_event(MonitorEvent::ConnectionStateChanged { state })
                .await;
        }
    }
}

/// The supervisor-facing synchronizer for one tenant's active calls.
pub struct CallMonitor {
    pipeline: Arc<Pipeline>,
    connection: ConnectionManager,
    snapshot: Arc<SnapshotClient>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallMonitor {
    /// Build a monitor from a validated configuration. Nothing connects
    /// until [`start`](Self::start).
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let stream_url = config.authenticated_stream_url()?;
        let (connection, inbound_rx) =
            ConnectionManager::new(stream_url, config.reconnect_delay);
        let snapshot = Arc::new(SnapshotClient::new(&config)?);
        let subscriptions =
            SubscriptionManager::new(connection.control_sender(), connection.watch_state());

        let pipeline = Arc::new(Pipeline {
            reconciler: RwLock::new(Reconciler::new()),
            bus: StreamEventBus::new(),
            subscriptions,
            handler: tokio::sync::RwLock::new(None),
        });

        // Replay subscriptions on every reconnect, before the first frame
        // of the new session is read. The first open has nothing pending:
        // the server only forgets subscriptions when a socket drops.
        let replay_pipeline = pipeline.clone();
        connection.set_on_connected(move |reconnect| {
            if !reconnect {
                return;
            }
            let active_ids = replay_pipeline.reconciler.read().unwrap().active_ids();
            replay_pipeline.subscriptions.replay(active_ids);
        });

        Ok(Self {
            pipeline,
            connection,
            snapshot,
            inbound: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bring the synchronizer up: start the stream connection and the
    /// snapshot hydration concurrently. Idempotent; a second call is
    /// ignored.
    pub async fn start(&self) {
        let Some(mut inbound_rx) = self.inbound.lock().unwrap().take() else {
            debug!("monitor already started");
            return;
        };
        info!("starting call monitor");

        let pump_pipeline = self.pipeline.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                pump_pipeline.handle_frame(&frame).await;
            }
        });

        let watch_pipeline = self.pipeline.clone();
        let mut state_rx = self.connection.watch_state();
        let watcher = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                watch_pipeline.deliver_connection_state(state).await;
            }
        });

        let hydrate_pipeline = self.pipeline.clone();
        let hydrate_snapshot = self.snapshot.clone();
        let hydration = tokio::spawn(async move {
            match hydrate(&hydrate_pipeline, &hydrate_snapshot).await {
                Ok(count) => debug!(count, "snapshot hydration complete"),
                Err(e) => {
                    // Keep whatever the stream has built up; hydration can
                    // be retried via refresh_snapshot.
                    warn!(error = %e, "snapshot hydration failed");
                }
            }
        });

        self.tasks
            .lock()
            .unwrap()
            .extend([pump, watcher, hydration]);
        self.connection.connect();
    }

    /// Re-fetch the snapshot and merge it into existing state, e.g. after
    /// a sign-in or a long disconnection. Returns the number of records
    /// merged. Failure leaves state untouched.
    pub async fn refresh_snapshot(&self) -> Result<usize> {
        hydrate(&self.pipeline, &self.snapshot).await
    }

    /// Fetch the heavy detail fields for one call and merge them into the
    /// tracked record, marking it `details_loaded`. Returns the tracked
    /// record when the call is still active, or the fetched record when
    /// it has already ended.
    pub async fn load_call_details(&self, call_id: &str) -> Result<CallRecord> {
        let fetched = self.snapshot.fetch_call_details(call_id).await?;

        let (merged, transition) = {
            let mut reconciler = self.pipeline.reconciler.write().unwrap();
            match reconciler.get_mut(call_id) {
                Some(existing) => {
                    existing.merge_from(fetched);
                    let merged = existing.clone();
                    (merged.clone(), Some(Transition::Updated(merged)))
                }
                None => (fetched, None),
            }
        };
        if let Some(transition) = transition {
            self.pipeline.deliver(transition).await;
        }
        Ok(merged)
    }

    /// Snapshot of every currently-active call.
    pub fn active_calls(&self) -> Vec<CallRecord> {
        self.pipeline.reconciler.read().unwrap().active_calls()
    }

    pub fn active_call(&self, call_id: &str) -> Option<CallRecord> {
        self.pipeline.reconciler.read().unwrap().get(call_id).cloned()
    }

    pub fn active_call_count(&self) -> usize {
        self.pipeline.reconciler.read().unwrap().len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Install the handler that receives high-level monitor events.
    pub async fn set_event_handler(&self, handler: Arc<dyn MonitorEventHandler>) {
        *self.pipeline.handler.write().await = Some(handler);
    }

    /// Register a listener for raw decoded stream events.
    pub fn register_listener(&self, listener: Arc<dyn StreamListener>) -> Uuid {
        self.pipeline.bus.register(listener)
    }

    pub fn unregister_listener(&self, token: Uuid) -> bool {
        self.pipeline.bus.unregister(token)
    }

    /// Request detailed updates for a call outside the automatic
    /// new-active path (e.g. a supervisor opening a transcript view).
    pub fn subscribe_call(&self, call_id: &str) -> bool {
        self.pipeline.subscriptions.subscribe(call_id)
    }

    pub fn unsubscribe_call(&self, call_id: &str) -> bool {
        self.pipeline.subscriptions.unsubscribe(call_id)
    }

    /// Tear everything down in one logical step: stop the connection
    /// (cancelling any pending reconnect), stop the pump tasks, then
    /// clear all in-memory state. Nothing can fire afterwards.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.pipeline.reconciler.write().unwrap().clear();
        info!("call monitor shut down");
    }
}

async fn hydrate(pipeline: &Pipeline, snapshot: &SnapshotClient) -> Result<usize> {
    let calls = snapshot.fetch_active_calls().await?;
    let transitions = pipeline.apply_snapshot(calls);
    let count = transitions.len();
    for transition in transitions {
        pipeline.deliver(transition).await;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ControlMessage;
    use async_trait::async_trait;
    use tokio::sync::{mpsc as tokio_mpsc, watch};

    struct RecordingHandler {
        log: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                log: Mutex::new(Vec::new()),
            }
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MonitorEventHandler for RecordingHandler {
        async fn on_new_active_call(&self, call: CallRecord) {
            self.log.lock().unwrap().push(format!("new:{}", call.id));
        }
        async fn on_call_ended(&self, call: CallRecord) {
            self.log.lock().unwrap().push(format!("ended:{}", call.id));
        }
        async fn on_call_updated(&self, call: CallRecord) {
            self.log.lock().unwrap().push(format!("updated:{}", call.id));
        }
    }

    fn pipeline_fixture() -> (Arc<Pipeline>, tokio_mpsc::UnboundedReceiver<ControlMessage>) {
        let (outbound_tx, outbound_rx) = tokio_mpsc::unbounded_channel();
        // The receiver keeps returning the last value after the sender
        // drops, which is all these fixtures need.
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let pipeline = Arc::new(Pipeline {
            reconciler: RwLock::new(Reconciler::new()),
            bus: StreamEventBus::new(),
            subscriptions: SubscriptionManager::new(outbound_tx, state_rx),
            handler: tokio::sync::RwLock::new(None),
        });
        (pipeline, outbound_rx)
    }

    #[tokio::test]
    async fn frame_path_notifies_and_subscribes_once() {
        let (pipeline, mut outbound) = pipeline_fixture();
        let handler = Arc::new(RecordingHandler::new());
        *pipeline.handler.write().await = Some(handler.clone());

        pipeline
            .handle_frame(r#"{"type": "call-upsert", "call": {"id": "c1", "status": "ringing"}}"#)
            .await;
        pipeline
            .handle_frame(
                r#"{"type": "call-upsert", "call": {"id": "c1", "status": "in-progress"}}"#,
            )
            .await;

        assert_eq!(handler.entries(), vec!["new:c1", "updated:c1"]);
        assert_eq!(
            outbound.try_recv().unwrap(),
            ControlMessage::Subscribe {
                call_id: "c1".into()
            }
        );
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn ended_call_reaches_the_handler_and_frees_the_subscription() {
        let (pipeline, mut outbound) = pipeline_fixture();
        let handler = Arc::new(RecordingHandler::new());
        *pipeline.handler.write().await = Some(handler.clone());

        pipeline
            .handle_frame(r#"{"type": "call-upsert", "call": {"id": "c1", "status": "queued"}}"#)
            .await;
        pipeline
            .handle_frame(
                r#"{"type": "call-upsert", "call": {"id": "c1", "status": "completed"}}"#,
            )
            .await;

        assert_eq!(handler.entries(), vec!["new:c1", "ended:c1"]);
        assert!(pipeline.reconciler.read().unwrap().is_empty());
        // One subscribe for the activation; nothing on the end.
        assert!(outbound.try_recv().is_ok());
        assert!(outbound.try_recv().is_err());
        assert_eq!(pipeline.subscriptions.subscribed_count(), 0);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_silently() {
        let (pipeline, _outbound) = pipeline_fixture();
        let handler = Arc::new(RecordingHandler::new());
        *pipeline.handler.write().await = Some(handler.clone());

        pipeline.handle_frame("{{ not json").await;
        pipeline.handle_frame(r#"{"type": "call-upsert"}"#).await;

        assert!(handler.entries().is_empty());
        assert!(pipeline.reconciler.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_hydration_emits_updates_but_no_notifications() {
        let (pipeline, mut outbound) = pipeline_fixture();
        let handler = Arc::new(RecordingHandler::new());
        *pipeline.handler.write().await = Some(handler.clone());

        let transitions = pipeline.apply_snapshot(vec![CallRecord {
            id: "c2".into(),
            status: Some("in-progress".into()),
            ..Default::default()
        }]);
        for transition in transitions {
            pipeline.deliver(transition).await;
        }

        assert_eq!(handler.entries(), vec!["updated:c2"]);
        // Hydrated calls are not auto-subscribed; the reconnect replay or
        // an explicit subscribe_call covers them.
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn raw_listeners_see_decoded_frames() {
        let (pipeline, _outbound) = pipeline_fixture();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_handle = seen.clone();
        pipeline.bus.register(Arc::new(move |_: &StreamEvent| {
            *seen_handle.lock().unwrap() += 1;
        }));

        pipeline
            .handle_frame(r#"{"type": "hello", "message": "Dashboard WebSocket connected"}"#)
            .await;
        pipeline
            .handle_frame(r#"{"type": "call-upsert", "call": {"id": "c1", "status": "ringing"}}"#)
            .await;

        assert_eq!(*seen.lock().unwrap(), 2);
    }
}
