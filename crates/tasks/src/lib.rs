//! `pinke-tasks`: background task contract and manager.
//!
//! A [`Task`] performs one cycle of recurring work per call to `run`. The
//! [`TaskManager`] owns a fixed set of registered tasks and drives each one on its
//! own interval in an isolated tokio task:
//!
//! - at most one cycle per task is in flight; overrunning cycles skip missed ticks
//! - every cycle runs under a timeout and a panic boundary
//! - `stop` broadcasts cancellation and waits a bounded grace period

pub mod error;
pub mod manager;
pub mod task;

pub use error::{RegistrationError, TaskError};
pub use manager::{ShutdownReport, TaskManager, TaskSnapshot, TaskStats};
pub use task::{CycleReport, Task, TaskContext, TaskDescriptor, MIN_CYCLE_TIMEOUT};
