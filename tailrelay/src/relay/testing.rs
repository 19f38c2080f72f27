//! In-memory process table for exercising the supervisor without real processes.

use crate::relay::process::{ProcessHandle, ProcessIdentity, ProcessLauncher, comm_name};
use nix::errno::Errno;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct FakeProcess {
    pub identity: ProcessIdentity,
    pub ignores_sigterm: bool,
    pub unsignalable: bool,
}

#[derive(Debug, Default)]
struct Table {
    next_pid: i32,
    processes: HashMap<i32, FakeProcess>,
    spawned: Vec<(String, Vec<String>)>,
    signals: Vec<(i32, bool)>,
    fail_spawn: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeProcesses {
    table: Arc<Mutex<Table>>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.table.lock().unwrap().next_pid = 1000;
        fake
    }

    pub fn insert(&self, pid: i32, name: &str, state: &str, tgid: i32) {
        let identity = ProcessIdentity { name: name.to_string(), state: state.to_string(), tgid, pid };
        self.table
            .lock()
            .unwrap()
            .processes
            .insert(pid, FakeProcess { identity, ignores_sigterm: false, unsignalable: false });
    }

    pub fn update(&self, pid: i32, f: impl FnOnce(&mut FakeProcess)) {
        if let Some(process) = self.table.lock().unwrap().processes.get_mut(&pid) {
            f(process);
        }
    }

    /// The process dies behind the supervisor's back.
    pub fn exit(&self, pid: i32) {
        self.table.lock().unwrap().processes.remove(&pid);
    }

    pub fn is_present(&self, pid: i32) -> bool {
        self.table.lock().unwrap().processes.contains_key(&pid)
    }

    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.table.lock().unwrap().spawned.clone()
    }

    /// `(pid, graceful)` for every terminate call, in order.
    pub fn signals(&self) -> Vec<(i32, bool)> {
        self.table.lock().unwrap().signals.clone()
    }

    pub fn fail_spawn(&self) {
        self.table.lock().unwrap().fail_spawn = true;
    }
}

impl ProcessLauncher for FakeProcesses {
    fn spawn(&self, program: &str, args: &[String]) -> std::io::Result<i32> {
        let mut table = self.table.lock().unwrap();
        if table.fail_spawn {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"));
        }
        table.next_pid += 1;
        let pid = table.next_pid;
        table.spawned.push((program.to_string(), args.to_vec()));
        let identity = ProcessIdentity { name: comm_name(program), state: "S (sleeping)".to_string(), tgid: pid, pid };
        table.processes.insert(pid, FakeProcess { identity, ignores_sigterm: false, unsignalable: false });
        Ok(pid)
    }

    fn handle(&self, pid: i32) -> Box<dyn ProcessHandle> {
        Box::new(FakeHandle { pid, table: self.table.clone() })
    }
}

struct FakeHandle {
    pid: i32,
    table: Arc<Mutex<Table>>,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.table.lock().unwrap().processes.contains_key(&self.pid)
    }

    fn identity(&self) -> Option<ProcessIdentity> {
        self.table.lock().unwrap().processes.get(&self.pid).map(|p| p.identity.clone())
    }

    fn terminate(&self, graceful: bool) -> Result<(), Errno> {
        let mut table = self.table.lock().unwrap();
        table.signals.push((self.pid, graceful));
        let Some(process) = table.processes.get(&self.pid) else {
            return Err(Errno::ESRCH);
        };
        if process.unsignalable {
            return Err(Errno::EPERM);
        }
        if graceful && process.ignores_sigterm {
            return Ok(());
        }
        table.processes.remove(&self.pid);
        Ok(())
    }
}
