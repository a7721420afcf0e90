//! Process lifecycle management.
//!
//! A [`Manager`] holds one [`UserRegistry`] per user, and each registry maps
//! process ids to [`ProcessHandle`]s.

mod error;
mod handle;
mod manager;
mod registry;

pub use error::{ProcessError, ProcessResult};
pub use handle::{OutputBuffer, ProcessHandle, ProcessId};
pub use manager::{Manager, ManagerConfig, ProcessOutput, UserId};
pub use registry::UserRegistry;
pub use runlet_protocol::{ProcessStatus, ProcessSummary, TerminalState};
