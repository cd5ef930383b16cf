use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `epoch` field that marks an engine's completion payload.
pub const COMPLETION_MARKER: &str = "complete";

/// One epoch's worth of streamed results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPoint {
    pub epoch: u32,
    #[serde(rename = "m")]
    pub slope: f64,
    #[serde(rename = "b")]
    pub intercept: f64,
    pub loss: f64,
}

/// Messages from the compute channel to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelEvent {
    ModuleLoading,
    ModuleLoaded {
        ready: bool,
    },
    ModuleLoadError {
        error: String,
    },
    TrainingStarted {
        #[serde(rename = "learningRate")]
        learning_rate: f64,
    },
    StreamPoint(TrainingPoint),
    /// Non-fatal: the malformed point was dropped.
    StreamParseError {
        error: String,
    },
    TrainingCompleted {
        success: bool,
    },
    /// Fatal to the current session.
    TrainingError {
        error: String,
    },
    /// The channel refused a run because its module is not ready.
    RunRejected {
        reason: String,
    },
    /// The background context died; the channel is gone.
    ChannelCrashed {
        error: String,
    },
}

impl ChannelEvent {
    /// Whether this message ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChannelEvent::TrainingCompleted { .. } | ChannelEvent::TrainingError { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::ModuleLoading => "module_loading",
            ChannelEvent::ModuleLoaded { .. } => "module_loaded",
            ChannelEvent::ModuleLoadError { .. } => "module_load_error",
            ChannelEvent::TrainingStarted { .. } => "training_started",
            ChannelEvent::StreamPoint(_) => "stream_point",
            ChannelEvent::StreamParseError { .. } => "stream_parse_error",
            ChannelEvent::TrainingCompleted { .. } => "training_completed",
            ChannelEvent::TrainingError { .. } => "training_error",
            ChannelEvent::RunRejected { .. } => "run_rejected",
            ChannelEvent::ChannelCrashed { .. } => "channel_crashed",
        }
    }
}

/// Messages from the coordinator to the compute channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelCommand {
    Load,
    RunTraining {
        #[serde(rename = "learningRate")]
        learning_rate: f64,
    },
    Terminate,
}

/// A decoded streaming-callback payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnginePayload {
    Point(TrainingPoint),
    /// `{"epoch": "complete"}`, optionally carrying `"success": false`.
    Complete { success: bool },
}

impl EnginePayload {
    /// Decodes the JSON string an engine hands to its streaming callback.
    ///
    /// # Errors
    /// Returns the underlying `serde_json` error for malformed payloads.
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;

        if value.get("epoch").and_then(Value::as_str) == Some(COMPLETION_MARKER) {
            let success = value.get("success").and_then(Value::as_bool).unwrap_or(true);
            return Ok(Self::Complete { success });
        }

        serde_json::from_value(value).map(Self::Point)
    }
}
