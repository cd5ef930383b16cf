pub mod aggregator;
pub mod channel;
pub mod communication;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;

pub use aggregator::ResultSequence;
pub use channel::{ComputeChannel, ModuleState};
pub use communication::EventSink;
pub use coordinator::{
    Coordinator, CoordinatorUpdate, GetSnapshot, Reload, RunTraining, Shutdown, Snapshot,
};
pub use engine::{
    ComputeEngine, Dataset, EngineLoader, LinearRegressionEngine, LinearRegressionLoader,
    LoadResult,
};
pub use error::{
    ChannelError, ConfigError, EngineError, ErrorKind, ErrorRecord, RequestRejected,
    SequenceError,
};
pub use protocol::{ChannelCommand, ChannelEvent, EnginePayload, TrainingPoint};
pub use session::{CoordinatorState, Session, SessionStatus};
