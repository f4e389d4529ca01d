pub mod session;
pub mod supervisor;
pub mod task_registry;

pub use session::{BatchStatus, HistorySink, SessionCoordinator};
pub use supervisor::SupervisorEvent;
