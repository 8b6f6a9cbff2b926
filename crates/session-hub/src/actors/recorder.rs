//! Per-room attendance recorder.
//!
//! Live presence changes are applied to the roster immediately and persisted
//! here afterwards, one command at a time. The queue is FIFO per room, so a
//! user's interval open always lands before the matching close.
//!
//! Failures are logged and counted. They never feed back into the roster.
//!
//! A room collected while idle may still be draining when the next join
//! opens a new room for the same session. The new recorder is handed the
//! old room's teardown task and holds its own queue until that finishes,
//! so writes for one session stay ordered across rooms.

use crate::attendance::AttendanceLedger;
use crate::errors::HubError;
use crate::observability::metrics::record_attendance_persist_failure;
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the recorder queue.
const RECORDER_CHANNEL_BUFFER: usize = 1024;

/// Work for the recorder.
#[derive(Debug)]
pub enum AttendanceCommand {
    /// Add to the participants set and open an interval.
    Joined { user_id: String, at: DateTime<Utc> },
    /// Close the open interval.
    Left { user_id: String, at: DateTime<Utc> },
    /// Reply once every earlier command has been applied.
    Flush { respond_to: oneshot::Sender<()> },
}

/// Sending half of a recorder queue.
#[derive(Clone, Debug)]
pub struct RecorderHandle {
    session_id: String,
    sender: mpsc::Sender<AttendanceCommand>,
}

impl RecorderHandle {
    /// Enqueue without waiting. A full queue loses the write.
    pub fn record(&self, command: AttendanceCommand) {
        if let Err(e) = self.sender.try_send(command) {
            record_attendance_persist_failure("enqueue");
            warn!(
                target: "hub.actor.recorder",
                session_id = %self.session_id,
                error = %e,
                "Attendance write not enqueued"
            );
        }
    }

    /// Wait for every queued write to be applied.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AttendanceCommand::Flush { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }
}

/// The recorder task. Ends when every `RecorderHandle` is dropped.
pub struct AttendanceRecorder {
    session_id: String,
    store: Arc<dyn SessionStore>,
    ledger: AttendanceLedger,
    receiver: mpsc::Receiver<AttendanceCommand>,
    /// Teardown of the previous room for this session, if still running.
    predecessor: Option<JoinHandle<()>>,
}

impl AttendanceRecorder {
    pub fn spawn(
        session_id: String,
        store: Arc<dyn SessionStore>,
        predecessor: Option<JoinHandle<()>>,
    ) -> (RecorderHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RECORDER_CHANNEL_BUFFER);

        let recorder = Self {
            session_id: session_id.clone(),
            ledger: AttendanceLedger::new(Arc::clone(&store)),
            store,
            receiver,
            predecessor,
        };

        let task_handle = tokio::spawn(recorder.run());
        (RecorderHandle { session_id, sender }, task_handle)
    }

    #[instrument(skip_all, name = "hub.actor.recorder", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        if let Some(previous) = self.predecessor.take() {
            debug!(
                target: "hub.actor.recorder",
                session_id = %self.session_id,
                "Waiting for previous room to finish its writes"
            );
            if let Err(e) = previous.await {
                warn!(
                    target: "hub.actor.recorder",
                    session_id = %self.session_id,
                    error = ?e,
                    "Previous room teardown failed"
                );
            }
        }

        let mut applied: u64 = 0;

        while let Some(command) = self.receiver.recv().await {
            match command {
                AttendanceCommand::Joined { user_id, at } => {
                    self.joined(&user_id, at).await;
                    applied += 1;
                }
                AttendanceCommand::Left { user_id, at } => {
                    self.left(&user_id, at).await;
                    applied += 1;
                }
                AttendanceCommand::Flush { respond_to } => {
                    let _ = respond_to.send(());
                }
            }
        }

        info!(
            target: "hub.actor.recorder",
            session_id = %self.session_id,
            applied = applied,
            "AttendanceRecorder stopped"
        );
    }

    async fn joined(&self, user_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.store.add_participant(&self.session_id, user_id).await {
            self.failed("add_participant", user_id, &e);
        }
        if let Err(e) = self.ledger.record_join(&self.session_id, user_id, at).await {
            self.failed("open_interval", user_id, &e);
        }
    }

    async fn left(&self, user_id: &str, at: DateTime<Utc>) {
        match self.ledger.record_leave(&self.session_id, user_id, at).await {
            Ok(interval) => {
                debug!(
                    target: "hub.actor.recorder",
                    session_id = %self.session_id,
                    user_id = %user_id,
                    joined_at = %interval.joined_at,
                    "Attendance interval closed"
                );
            }
            Err(HubError::NoOpenInterval { .. }) => {
                // Open write was lost or never landed.
                debug!(
                    target: "hub.actor.recorder",
                    session_id = %self.session_id,
                    user_id = %user_id,
                    "No open interval to close on leave"
                );
            }
            Err(e) => self.failed("close_interval", user_id, &e),
        }
    }

    fn failed(&self, operation: &str, user_id: &str, error: &HubError) {
        record_attendance_persist_failure(operation);
        warn!(
            target: "hub.actor.recorder",
            session_id = %self.session_id,
            user_id = %user_id,
            operation = operation,
            error = %error,
            "Attendance write failed; live roster unaffected"
        );
    }
}
