//! Provisioning workflow: reachability wait, certificate deployment, daemon
//! reconfiguration and restart.

pub mod error;
pub mod orchestrator;
pub mod wait;

pub use error::{ConfigWriteError, ProvisioningError, ProvisioningStep};
pub use orchestrator::{
    PROBE_COMMAND, ProvisioningOrchestrator, RunState, START_COMMAND, STOP_COMMAND, remote_mode,
};
pub use wait::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper, WaitError, wait_until_ready};
