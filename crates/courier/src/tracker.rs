//! Observable record of the tool call currently running inside a streaming response.
//!
//! The tracker is a two-state machine, Idle or Active(name, arguments). It is
//! backed by a `watch` channel so any number of observers can read the latest
//! state without blocking the dispatcher and without ever seeing a partially
//! written value. Each transition bumps a revision counter; observers can use
//! it to confirm they never move backwards.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallState {
    pub name: String,
    /// Serialized arguments, passed through as produced by the model
    pub arguments: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub revision: u64,
    pub active: Option<ToolCallState>,
}

#[derive(Debug, Clone)]
pub struct ToolCallTracker {
    tx: watch::Sender<Snapshot>,
}

impl Default for ToolCallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot {
            revision: 0,
            active: None,
        });
        Self { tx }
    }

    /// Idle -> Active, or Active -> Active replacing the previous call
    pub fn begin<N: Into<String>, A: Into<String>>(&self, name: N, arguments: A) {
        let state = ToolCallState {
            name: name.into(),
            arguments: arguments.into(),
            started_at: Utc::now(),
        };
        self.tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.active = Some(state);
        });
    }

    /// Active -> Idle. A no-op when already idle.
    pub fn end(&self) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.active.is_none() {
                return false;
            }
            snapshot.revision += 1;
            snapshot.active = None;
            true
        });
    }

    /// Explicit reset, e.g. when a new submission arrives for the same thread
    pub fn reset(&self) {
        self.end();
    }

    pub fn current(&self) -> Option<ToolCallState> {
        self.tx.borrow().active.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> ToolCallObserver {
        ToolCallObserver {
            rx: self.tx.subscribe(),
        }
    }
}

/// A read-only handle onto a tracker
#[derive(Debug, Clone)]
pub struct ToolCallObserver {
    rx: watch::Receiver<Snapshot>,
}

impl ToolCallObserver {
    pub fn current(&self) -> Option<ToolCallState> {
        self.rx.borrow().active.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next transition. Returns `None` once the tracker is dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
