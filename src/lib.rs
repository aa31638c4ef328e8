pub mod config;
pub mod launch;
pub mod ledger;
pub mod prices;
pub mod reporter;
pub mod state;
pub mod supervisor;
pub mod types;

pub use supervisor::{ProcessSupervisor, SupervisorError};

/// Grace period for a running bot to exit after the console shuts down.
pub const SHUTDOWN_WAIT_SECS: u64 = 5;
