use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Lifecycle of the coordinator as seen by the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Initializing,
    Loading,
    Ready,
    Running,
    /// The channel is unusable (load failure or crash) until a reload.
    Failed,
}

impl CoordinatorState {
    /// Whether a new run request may be accepted in this state.
    pub fn accepts_runs(self) -> bool {
        self == CoordinatorState::Ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Complete,
    Failed,
}

/// One run of the optimization, from request to terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub learning_rate: f64,
    pub status: SessionStatus,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl Session {
    /// The placeholder session held before any run was requested.
    pub fn idle() -> Self {
        Self {
            learning_rate: 0.0,
            status: SessionStatus::Idle,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            status: SessionStatus::Running,
            started_at: Some(Instant::now()),
            finished_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Settles a running session. Settled sessions are left untouched.
    pub fn settle(&mut self, success: bool) {
        if !self.is_running() {
            return;
        }

        self.status = if success {
            SessionStatus::Complete
        } else {
            SessionStatus::Failed
        };
        self.finished_at = Some(Instant::now());
    }

    /// Wall time of the session, up to now if it is still running.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}
