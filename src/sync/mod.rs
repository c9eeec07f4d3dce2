//! Keeping local books in sync: diff routing, snapshot resyncs and the
//! periodic collection pass.

pub mod collector;
pub mod pending;
pub mod scheduler;
pub mod shutdown;
pub mod symbols;

pub use collector::{CollectStats, Collector, CollectorOptions};
pub use pending::PendingSet;
pub use scheduler::{SchedulerOptions, SyncScheduler, SyncState, SyncTasks};
pub use shutdown::{Shutdown, ShutdownTrigger, shutdown_channel};
pub use symbols::{resolve_symbols, run_with_refresh};
