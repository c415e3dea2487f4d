//! Local supervision of the datastore daemon
//!
//! - `process`: stop-then-start of the daemon under a service key
//! - `registry`: idempotent reboot registration

pub mod process;
pub mod registry;

pub use process::{LocalSupervisor, ProcessRecord, Supervisor};
pub use registry::{CronRegistry, RebootEntry, RebootRegistry};
