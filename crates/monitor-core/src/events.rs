//! Stream event decoding, fan-out, and outward event delivery
//!
//! Three layers live here:
//!
//! - [`StreamEvent`] - decoded inbound frames from the dashboard stream,
//!   tolerant of unknown event types. A frame that fails to decode is
//!   dropped by the caller; it never unregisters listeners or tears down
//!   the connection.
//! - [`StreamEventBus`] - synchronous fan-out of decoded events to every
//!   registered listener, in registration order. Registration and removal
//!   are safe at any time, including from within a listener's own callback.
//! - [`MonitorEventHandler`] - the async trait applications implement to
//!   receive the high-level transitions the reconciler derives (new active
//!   call, update, end, connection state changes).
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use callwatch_monitor_core::events::{StreamEvent, StreamEventBus};
//!
//! let bus = StreamEventBus::new();
//! let token = bus.register(Arc::new(|event: &StreamEvent| {
//!     println!("decoded: {event:?}");
//! }));
//!
//! let event = StreamEvent::decode(
//!     r#"{"type": "transcript-update", "callId": "c1", "fullTranscript": "hi"}"#,
//! ).unwrap();
//! bus.dispatch(&event);
//!
//! assert!(bus.unregister(token));
//! ```

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::{CallPayload, CallRecord};
use crate::connection::ConnectionState;
use crate::error::{MonitorError, Result};

/// A decoded frame from the dashboard stream.
///
/// The wire shape is `{"type": "...", ...}` with camelCase fields; the
/// snake_case spellings are accepted as well. Unknown `type` values decode
/// to [`StreamEvent::Unknown`] so new server-side events never break the
/// read loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Full or partial data for one call.
    CallUpsert {
        #[serde(default, alias = "clientId")]
        client_id: Option<String>,
        call: CallPayload,
    },
    /// Incremental transcript text, optionally carrying a status change.
    TranscriptUpdate {
        #[serde(alias = "callId", deserialize_with = "crate::call::id_string")]
        call_id: String,
        #[serde(default, alias = "fullTranscript")]
        full_transcript: Option<String>,
        #[serde(default)]
        append: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    /// Greeting frame sent by the server right after the handshake.
    Hello {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Decode a raw text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| MonitorError::Decode(e.to_string()))
    }
}

/// Control messages the client pushes to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Request detailed updates for one call.
    Subscribe {
        #[serde(rename = "callId")]
        call_id: String,
    },
    /// Stop detailed updates for one call.
    Unsubscribe {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

impl ControlMessage {
    pub fn call_id(&self) -> &str {
        match self {
            ControlMessage::Subscribe { call_id } => call_id,
            ControlMessage::Unsubscribe { call_id } => call_id,
        }
    }
}

/// A listener for decoded stream events.
///
/// Invoked synchronously on the read path; implementations must not block
/// on I/O.
pub trait StreamListener: Send + Sync {
    fn on_event(&self, event: &StreamEvent);
}

impl<F> StreamListener for F
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    fn on_event(&self, event: &StreamEvent) {
        self(event)
    }
}

/// Synchronous fan-out of decoded stream events.
///
/// Listeners are invoked in registration order. Dispatch iterates a
/// snapshot of the registration list taken when dispatch starts and
/// re-checks liveness before each invocation, so:
///
/// - a listener added during dispatch of event N first sees event N+1;
/// - a listener removed during dispatch does not receive event N if it has
///   not yet been invoked;
/// - removal is safe from within a listener's own callback.
pub struct StreamEventBus {
    listeners: RwLock<Vec<(Uuid, Arc<dyn StreamListener>)>>,
}

impl StreamEventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener; returns a token for later removal.
    pub fn register(&self, listener: Arc<dyn StreamListener>) -> Uuid {
        let token = Uuid::new_v4();
        self.listeners.write().unwrap().push((token, listener));
        token
    }

    /// Remove a listener. Returns `false` if the token is unknown.
    pub fn unregister(&self, token: Uuid) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        if let Some(pos) = listeners.iter().position(|(t, _)| *t == token) {
            listeners.remove(pos);
            true
        } else {
            false
        }
    }

    /// Deliver an event to every live listener, in registration order.
    pub fn dispatch(&self, event: &StreamEvent) {
        let snapshot: Vec<(Uuid, Arc<dyn StreamListener>)> =
            self.listeners.read().unwrap().clone();
        for (token, listener) in snapshot {
            // The lock is not held across the callback, so listeners may
            // register or unregister freely from inside it.
            let live = self
                .listeners
                .read()
                .unwrap()
                .iter()
                .any(|(t, _)| *t == token);
            if live {
                listener.on_event(event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

impl Default for StreamEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// High-level events derived by the reconciler.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A call was observed active for the first time via the live stream.
    NewActiveCall { call: CallRecord },
    /// An already-tracked call received new data.
    CallUpdated { call: CallRecord },
    /// A tracked call transitioned to inactive; the record carries the
    /// last known state at removal time.
    CallEnded { call: CallRecord },
    /// The stream connection changed state.
    ConnectionStateChanged { state: ConnectionState },
}

/// Handler for high-level monitor events.
///
/// `on_new_active_call` and `on_call_ended` are the transitions a
/// supervisor UI must render; the rest default to no-ops.
#[async_trait]
pub trait MonitorEventHandler: Send + Sync {
    /// A call was observed active for the first time via the live stream.
    ///
    /// Fires exactly once per call lifecycle; snapshot hydration and
    /// reconnects never repeat it.
    async fn on_new_active_call(&self, call: CallRecord);

    /// A tracked call transitioned to inactive.
    async fn on_call_ended(&self, call: CallRecord);

    /// An already-tracked call received new data.
    async fn on_call_updated(&self, _call: CallRecord) {}

    /// The stream connection changed state.
    async fn on_connection_state_changed(&self, _state: ConnectionState) {}

    /// Unified dispatch; override only for custom routing.
    async fn on_monitor_event(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::NewActiveCall { call } => self.on_new_active_call(call).await,
            MonitorEvent::CallUpdated { call } => self.on_call_updated(call).await,
            MonitorEvent::CallEnded { call } => self.on_call_ended(call).await,
            MonitorEvent::ConnectionStateChanged { state } => {
                self.on_connection_state_changed(state).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn decodes_call_upsert() {
        let event = StreamEvent::decode(
            r#"{"type": "call-upsert", "clientId": "acme", "call": {"id": "c1", "status": "ringing"}}"#,
        )
        .unwrap();
        match event {
            StreamEvent::CallUpsert { client_id, call } => {
                assert_eq!(client_id.as_deref(), Some("acme"));
                assert_eq!(call.id, "c1");
                assert_eq!(call.status.as_deref(), Some("ringing"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_transcript_update() {
        let event = StreamEvent::decode(
            r#"{"type": "transcript-update", "callId": "c3", "append": "AI: hello", "fullTranscript": "AI: hello"}"#,
        )
        .unwrap();
        match event {
            StreamEvent::TranscriptUpdate {
                call_id,
                full_transcript,
                append,
                status,
            } => {
                assert_eq!(call_id, "c3");
                assert_eq!(full_transcript.as_deref(), Some("AI: hello"));
                assert_eq!(append.as_deref(), Some("AI: hello"));
                assert!(status.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_tolerated() {
        let event = StreamEvent::decode(r#"{"type": "queue-depth", "depth": 4}"#).unwrap();
        assert!(matches!(event, StreamEvent::Unknown));
    }

    #[test]
    fn malformed_frames_error_without_panicking() {
        assert!(StreamEvent::decode("not json").is_err());
        assert!(StreamEvent::decode(r#"{"no": "type"}"#).is_err());
    }

    #[test]
    fn control_messages_serialize_to_wire_shape() {
        let json = serde_json::to_string(&ControlMessage::Subscribe {
            call_id: "c1".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","callId":"c1"}"#);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = StreamEventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.register(Arc::new(move |_: &StreamEvent| {
                order.lock().unwrap().push(tag);
            }));
        }

        bus.dispatch(&StreamEvent::Unknown);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn listener_removed_during_dispatch_is_skipped() {
        let bus = Arc::new(StreamEventBus::new());
        let fired = Arc::new(AtomicUsize::new(0));

        // The first listener removes the second before it runs.
        let second_token = Arc::new(Mutex::new(None::<Uuid>));
        let bus_handle = bus.clone();
        let token_handle = second_token.clone();
        bus.register(Arc::new(move |_: &StreamEvent| {
            if let Some(token) = *token_handle.lock().unwrap() {
                bus_handle.unregister(token);
            }
        }));

        let fired_handle = fired.clone();
        let token = bus.register(Arc::new(move |_: &StreamEvent| {
            fired_handle.fetch_add(1, Ordering::SeqCst);
        }));
        *second_token.lock().unwrap() = Some(token);

        bus.dispatch(&StreamEvent::Unknown);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn listener_added_during_dispatch_waits_for_next_event() {
        let bus = Arc::new(StreamEventBus::new());
        let late_fired = Arc::new(AtomicUsize::new(0));

        let bus_handle = bus.clone();
        let fired_handle = late_fired.clone();
        let registered = Arc::new(AtomicUsize::new(0));
        bus.register(Arc::new(move |_: &StreamEvent| {
            // Only the first dispatch registers the late listener.
            if registered.fetch_add(1, Ordering::SeqCst) == 0 {
                let fired = fired_handle.clone();
                bus_handle.register(Arc::new(move |_: &StreamEvent| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }));

        bus.dispatch(&StreamEvent::Unknown);
        assert_eq!(late_fired.load(Ordering::SeqCst), 0);

        bus.dispatch(&StreamEvent::Unknown);
        assert_eq!(late_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_remove_itself() {
        let bus = Arc::new(StreamEventBus::new());
        let token_slot = Arc::new(Mutex::new(None::<Uuid>));
        let fired = Arc::new(AtomicUsize::new(0));

        let bus_handle = bus.clone();
        let slot_handle = token_slot.clone();
        let fired_handle = fired.clone();
        let token = bus.register(Arc::new(move |_: &StreamEvent| {
            fired_handle.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = *slot_handle.lock().unwrap() {
                bus_handle.unregister(token);
            }
        }));
        *token_slot.lock().unwrap() = Some(token);

        bus.dispatch(&StreamEvent::Unknown);
        bus.dispatch(&StreamEvent::Unknown);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }
}
