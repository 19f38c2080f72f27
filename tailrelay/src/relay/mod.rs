// Relay module
//
// Lifecycle of socat relay processes:
// - process: spawning, signalling and identifying OS processes
// - supervisor: start/stop/status with PID bookkeeping in the relay registry
// - monitor: background sweep clearing PIDs of relays that died on their own

pub mod monitor;
pub mod process;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use monitor::RelayMonitor;
pub use process::{ProcessHandle, ProcessIdentity, ProcessLauncher, UnixProcesses};
pub use supervisor::{BatchReport, RelayStatus, StopPolicy, Supervisor};
