//! OS process capabilities used by the supervisor.
//!
//! The supervisor never touches signals or `/proc` directly; it goes through
//! [`ProcessLauncher`] and [`ProcessHandle`] so the escalation ladder stays
//! independent of the platform's process API.

use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;

/// Longest process name the kernel reports (TASK_COMM_LEN minus the NUL).
const COMM_LEN: usize = 15;

/// The fields of `/proc/<pid>/status` that identify a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub name: String,
    pub state: String,
    pub tgid: i32,
    pub pid: i32,
}

impl ProcessIdentity {
    /// Parse the text of a `/proc/<pid>/status` file.
    pub fn parse(status: &str) -> Option<Self> {
        let mut name = None;
        let mut state = None;
        let mut tgid = None;
        let mut pid = None;
        for line in status.lines() {
            let Some((key, value)) = line.split_once(':') else { continue };
            let value = value.trim();
            match key {
                "Name" => name = Some(value.to_string()),
                "State" => state = Some(value.to_string()),
                "Tgid" => tgid = value.parse().ok(),
                "Pid" => pid = value.parse().ok(),
                _ => {}
            }
        }
        Some(Self { name: name?, state: state?, tgid: tgid?, pid: pid? })
    }

    pub fn is_zombie(&self) -> bool {
        self.state.starts_with('Z')
    }

    /// Thread ids share the PID space; a thread's Tgid is its owning process.
    pub fn is_thread(&self) -> bool {
        self.tgid != self.pid
    }

    /// Why this process is not the one we expect, if it isn't.
    pub fn mismatch(&self, expected_name: &str) -> Option<String> {
        if self.is_thread() {
            return Some(format!("PID {} is a thread of {}", self.pid, self.tgid));
        }
        if self.is_zombie() {
            return Some(format!("PID {} is a zombie", self.pid));
        }
        if self.name != comm_name(expected_name) {
            return Some(format!("PID {} is '{}', not '{}'", self.pid, self.name, comm_name(expected_name)));
        }
        None
    }
}

/// The name a binary shows up under in process status: its file name, cut to the
/// kernel's comm length.
pub fn comm_name(binary: &str) -> String {
    let file_name = Path::new(binary).file_name().and_then(|n| n.to_str()).unwrap_or(binary);
    let mut end = file_name.len().min(COMM_LEN);
    while !file_name.is_char_boundary(end) {
        end -= 1;
    }
    file_name[..end].to_string()
}

/// A process (and its process group) the supervisor may inspect and signal.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> i32;

    /// Liveness probe: the process accepts signal 0.
    fn is_alive(&self) -> bool;

    fn identity(&self) -> Option<ProcessIdentity>;

    /// SIGTERM when `graceful`, SIGKILL otherwise. The process group is signalled
    /// first and the lead process alone as a fallback; the fallback's error is returned.
    fn terminate(&self, graceful: bool) -> Result<(), Errno>;

    fn matches_expected_identity(&self, expected_name: &str) -> bool {
        match self.identity() {
            Some(identity) => match identity.mismatch(expected_name) {
                Some(reason) => {
                    debug!("{}", reason);
                    false
                }
                None => true,
            },
            None => {
                trace!("No process status for PID {}", self.pid());
                false
            }
        }
    }
}

pub trait ProcessLauncher: Send + Sync {
    /// Start `program` in a new process group whose id equals the child's PID.
    fn spawn(&self, program: &str, args: &[String]) -> std::io::Result<i32>;

    fn handle(&self, pid: i32) -> Box<dyn ProcessHandle>;
}

/// Processes of the local Unix host, identified through procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcesses;

impl ProcessLauncher for UnixProcesses {
    fn spawn(&self, program: &str, args: &[String]) -> std::io::Result<i32> {
        use std::os::unix::process::CommandExt;

        let mut command = std::process::Command::new(program);
        command.args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).process_group(0);

        let mut child = tokio::process::Command::from(command).spawn()?;
        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| std::io::Error::other("spawned process has no PID"))?;

        // Reap the child as soon as it exits so it never lingers as a zombie
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Process {} exited: {}", pid, status),
                Err(e) => warn!("Failed to wait for process {}: {}", pid, e),
            }
        });
        Ok(pid)
    }

    fn handle(&self, pid: i32) -> Box<dyn ProcessHandle> {
        Box::new(UnixProcess { pid: Pid::from_raw(pid) })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnixProcess {
    pid: Pid,
}

impl ProcessHandle for UnixProcess {
    fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    fn is_alive(&self) -> bool {
        kill(self.pid, None).is_ok()
    }

    fn identity(&self) -> Option<ProcessIdentity> {
        let status = std::fs::read_to_string(format!("/proc/{}/status", self.pid)).ok()?;
        ProcessIdentity::parse(&status)
    }

    fn terminate(&self, graceful: bool) -> Result<(), Errno> {
        let signal = if graceful { Signal::SIGTERM } else { Signal::SIGKILL };
        match killpg(self.pid, signal) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("{} to process group {} failed ({}), signalling the process alone", signal, self.pid, e);
                kill(self.pid, signal)
            }
        }
    }
}
