//! The authoritative active-call state store
//!
//! The [`Reconciler`] owns the mapping from call id to [`CallRecord`] and
//! is the only place that mutates it. Streamed upserts, transcript
//! updates, and REST snapshots all funnel through it and reduce to the
//! same per-field non-destructive merge, which keeps the result
//! independent of which source arrives first.
//!
//! Every apply returns the [`Transition`]s it caused, so callers can
//! notify and subscribe without the reconciler knowing about either
//! concern.
//!
//! # Examples
//!
//! ```rust
//! use callwatch_monitor_core::call::CallPayload;
//! use callwatch_monitor_core::reconciler::{Reconciler, Transition};
//!
//! let mut reconciler = Reconciler::new();
//! let payload: CallPayload =
//!     serde_json::from_str(r#"{"id": "c1", "status": "ringing"}"#).unwrap();
//!
//! match reconciler.apply_upsert(payload) {
//!     Some(Transition::NewActiveCall(call)) => assert_eq!(call.id, "c1"),
//!     other => panic!("unexpected transition: {other:?}"),
//! }
//! assert_eq!(reconciler.len(), 1);
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::call::{CallPayload, CallRecord, is_active_status};

/// A state change derived from applying an event or snapshot.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The call was observed active for the first time via the live
    /// stream; exactly one of these fires per call lifecycle.
    NewActiveCall(CallRecord),
    /// An already-tracked call received new data.
    Updated(CallRecord),
    /// The call left the active set; carries its last known state.
    Ended(CallRecord),
}

/// Tracks which call ids have already triggered a new-call notification.
///
/// An id re-arms only after [`disarm`](Self::disarm) - i.e. after the call
/// was observed transitioning to inactive. Ids hydrated from a snapshot
/// are marked known without ever notifying.
#[derive(Debug, Default)]
pub struct NotificationGate {
    known: HashSet<String>,
}

impl NotificationGate {
    /// Mark an id as known. Returns `true` if it was not known before,
    /// i.e. a notification should fire for a stream-discovered call.
    pub fn mark_known(&mut self, id: &str) -> bool {
        self.known.insert(id.to_string())
    }

    /// Forget an id so a future activation notifies again.
    pub fn disarm(&mut self, id: &str) {
        self.known.remove(id);
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }
}

/// The authoritative mapping from call id to record.
///
/// Holds only currently-active calls. All mutation is synchronous; the
/// owner is expected to hold a lock for the duration of an apply and to
/// perform any I/O (notifications, subscribe messages) afterwards from
/// the returned transitions.
#[derive(Debug, Default)]
pub struct Reconciler {
    active: HashMap<String, CallRecord>,
    gate: NotificationGate,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a streamed `call-upsert`.
    ///
    /// The effective status is the incoming one when present and
    /// non-empty, else the previously known status for the id - a partial
    /// update must never regress a call to "unknown".
    pub fn apply_upsert(&mut self, payload: CallPayload) -> Option<Transition> {
        let incoming = CallRecord::from_payload(payload);
        let id = incoming.id.clone();

        let effective_status = incoming
            .status
            .clone()
            .or_else(|| self.active.get(&id).and_then(|c| c.status.clone()));

        if is_active_status(effective_status.as_deref()) {
            if let Some(existing) = self.active.get_mut(&id) {
                existing.merge_from(incoming);
                trace!(call_id = %id, "merged upsert into tracked call");
                return Some(Transition::Updated(existing.clone()));
            }

            let mut record = incoming;
            record.status = effective_status;
            self.active.insert(id.clone(), record.clone());
            if self.gate.mark_known(&id) {
                debug!(call_id = %id, "new active call");
                Some(Transition::NewActiveCall(record))
            } else {
                Some(Transition::Updated(record))
            }
        } else if let Some(mut existing) = self.active.remove(&id) {
            existing.merge_from(incoming);
            self.gate.disarm(&id);
            debug!(call_id = %id, status = ?existing.status, "call ended");
            Some(Transition::Ended(existing))
        } else {
            // Inactive and untracked: nothing to do.
            None
        }
    }

    /// Apply a streamed `transcript-update`.
    ///
    /// Only the live transcript (and status, when provided) change.
    /// Unknown ids are ignored - the transcript stream may race ahead of
    /// the upsert that introduces the call.
    pub fn apply_transcript(
        &mut self,
        call_id: &str,
        full_transcript: Option<String>,
        append: Option<String>,
        status: Option<String>,
    ) -> Option<Transition> {
        if !self.active.contains_key(call_id) {
            trace!(call_id, "transcript for untracked call ignored");
            return None;
        }

        let record = self.active.get_mut(call_id)?;
        if let Some(full) = full_transcript.filter(|s| !s.is_empty()) {
            record.live_transcript = Some(full);
        } else if let Some(chunk) = append.filter(|s| !s.is_empty()) {
            record.live_transcript = Some(match record.live_transcript.take() {
                Some(mut existing) => {
                    existing.push('\n');
                    existing.push_str(&chunk);
                    existing
                }
                None => chunk,
            });
        }
        if let Some(status) = status.filter(|s| !s.trim().is_empty()) {
            record.status = Some(status);
        }

        // A status carried on a transcript frame can end the call; the
        // active map must never hold an inactive record.
        if is_active_status(record.status.as_deref()) {
            Some(Transition::Updated(record.clone()))
        } else {
            let existing = self.active.remove(call_id)?;
            self.gate.disarm(call_id);
            debug!(call_id, "call ended via transcript status");
            Some(Transition::Ended(existing))
        }
    }

    /// Merge a REST snapshot into existing state.
    ///
    /// Ids not yet tracked are inserted as already-known, so hydration
    /// never fires a new-call notification. Ids already tracked merge
    /// non-destructively, streamed data surviving wherever the snapshot
    /// is empty. A snapshot never removes calls: the stream is the
    /// authority on endings.
    pub fn apply_snapshot(&mut self, calls: Vec<CallRecord>) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for record in calls {
            if !is_active_status(record.status.as_deref()) {
                trace!(call_id = %record.id, "snapshot row not active, skipped");
                continue;
            }
            let id = record.id.clone();
            if let Some(existing) = self.active.get_mut(&id) {
                existing.merge_from(record);
                transitions.push(Transition::Updated(existing.clone()));
            } else {
                self.gate.mark_known(&id);
                self.active.insert(id, record.clone());
                transitions.push(Transition::Updated(record));
            }
        }
        transitions
    }

    /// Drop all state. Used at teardown; the caller is responsible for
    /// tearing the connection down in the same logical step.
    pub fn clear(&mut self) {
        self.active.clear();
        self.gate.clear();
    }

    pub fn get(&self, id: &str) -> Option<&CallRecord> {
        self.active.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CallRecord> {
        self.active.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn is_known_active(&self, id: &str) -> bool {
        self.gate.is_known(id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ids of every tracked call.
    pub fn active_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Clones of every tracked record.
    pub fn active_calls(&self) -> Vec<CallRecord> {
        self.active.values().cloned().collect()
    }
}
