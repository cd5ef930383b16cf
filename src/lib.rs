pub mod config;
pub mod console;
pub mod stream;

pub use config::DemoConfig;
pub use stream::{Coordinator, CoordinatorState, CoordinatorUpdate, ResultSequence};
