//! Per-call subscription tracking
//!
//! The server only streams detailed updates (live transcripts) for calls a
//! client has subscribed to, and it forgets those subscriptions whenever
//! the socket drops. [`SubscriptionManager`] owns that bookkeeping: it
//! subscribes newly active calls while the connection is up, and replays
//! the whole set after a reconnect.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::connection::ConnectionState;
use crate::events::ControlMessage;

/// Issues `subscribe`/`unsubscribe` control messages and remembers which
/// call ids are covered on the current connection.
pub struct SubscriptionManager {
    outbound: mpsc::UnboundedSender<ControlMessage>,
    connection: watch::Receiver<ConnectionState>,
    subscribed: Mutex<HashSet<String>>,
}

impl SubscriptionManager {
    pub fn new(
        outbound: mpsc::UnboundedSender<ControlMessage>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            outbound,
            connection,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe one call. A no-op while disconnected (the reconnect
    /// replay covers it) or when the id is already subscribed. Returns
    /// whether a message was sent.
    pub fn subscribe(&self, call_id: &str) -> bool {
        if *self.connection.borrow() != ConnectionState::Connected {
            trace!(call_id, "not connected, subscription deferred to replay");
            return false;
        }
        let mut subscribed = self.subscribed.lock().unwrap();
        if !subscribed.insert(call_id.to_string()) {
            return false;
        }
        let _ = self.outbound.send(ControlMessage::Subscribe {
            call_id: call_id.to_string(),
        });
        debug!(call_id, "subscribed to call updates");
        true
    }

    /// Explicitly stop updates for one call. Returns whether a message
    /// was sent.
    pub fn unsubscribe(&self, call_id: &str) -> bool {
        let was_subscribed = self.subscribed.lock().unwrap().remove(call_id);
        if !was_subscribed || *self.connection.borrow() != ConnectionState::Connected {
            return false;
        }
        let _ = self.outbound.send(ControlMessage::Unsubscribe {
            call_id: call_id.to_string(),
        });
        debug!(call_id, "unsubscribed from call updates");
        true
    }

    /// Drop local bookkeeping for an ended call. No wire message: the
    /// server stops sending updates for ended calls on its own.
    pub fn forget(&self, call_id: &str) {
        self.subscribed.lock().unwrap().remove(call_id);
    }

    /// Re-issue one subscribe per given id after a reconnect. The
    /// previous connection's bookkeeping is discarded first, so the
    /// replayed set matches the active-call map exactly, without
    /// duplicates.
    pub fn replay<I>(&self, active_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut subscribed = self.subscribed.lock().unwrap();
        subscribed.clear();
        let mut sent = 0;
        for call_id in active_ids {
            if subscribed.insert(call_id.clone()) {
                let _ = self.outbound.send(ControlMessage::Subscribe { call_id });
                sent += 1;
            }
        }
        debug!(count = sent, "replayed call subscriptions");
        sent
    }

    pub fn subscribed_count(&self) -> usize {
        self.subscribed.lock().unwrap().len()
    }
}
