//! Backup scheduling: the operation model, the state machine, its
//! persistence and the event loop that drives it.

pub mod history;
pub mod instance;
pub mod operation;
pub mod persist;
pub mod runner;
pub mod state;

pub use history::{Chrono, ChronoHistory};
pub use instance::InstanceLock;
pub use operation::{CompletionEvent, CompletionStatus, CurrentPhase, OperationKind};
pub use persist::{StateRecord, StateStore};
pub use runner::{BackupScheduler, SchedulerSettings};
pub use state::{SchedulerPolicy, SchedulerState};
