//! Recording stand-ins for the host capabilities

use super::{LaunchSpec, Launcher, NamespaceExecutor, Platform};
use crate::error::{BrockerError, Result};
use crate::network::{BridgeAddress, NetworkOps};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Processes that never run; they exit when killed or told to
pub struct FakeLauncher {
    next_pid: AtomicU32,
    exits: Mutex<HashMap<u32, Option<i32>>>,
    exited: Condvar,
    /// While set, `wait` does not report exits
    held: AtomicBool,
    powered_off: AtomicBool,
    pub launched: Mutex<Vec<LaunchSpec>>,
    pub fail_launch: AtomicBool,
}

impl FakeLauncher {
    fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            exits: Mutex::new(HashMap::new()),
            exited: Condvar::new(),
            held: AtomicBool::new(false),
            powered_off: AtomicBool::new(false),
            launched: Mutex::new(Vec::new()),
            fail_launch: AtomicBool::new(false),
        }
    }

    /// Make a running process exit with `code`
    pub fn exit(&self, pid: u32, code: i32) {
        self.exits.lock().unwrap().insert(pid, Some(code));
        self.exited.notify_all();
    }

    /// Keep exited processes from being reaped until `release_exits`
    pub fn hold_exits(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_exits(&self) {
        let exits = self.exits.lock().unwrap();
        self.held.store(false, Ordering::SeqCst);
        drop(exits);
        self.exited.notify_all();
    }

    /// Kill everything, including processes launched later
    fn power_off(&self) {
        let mut exits = self.exits.lock().unwrap_or_else(|e| e.into_inner());
        self.powered_off.store(true, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
        for state in exits.values_mut() {
            state.get_or_insert(128 + 9);
        }
        drop(exits);
        self.exited.notify_all();
    }

    pub fn is_running(&self, pid: u32) -> bool {
        matches!(self.exits.lock().unwrap().get(&pid), Some(None))
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(BrockerError::Provisioning("launch refused".to_string()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.exits.lock().unwrap().insert(pid, None);
        self.launched.lock().unwrap().push(spec.clone());
        Ok(pid)
    }

    fn wait(&self, pid: u32) -> Result<i32> {
        let mut exits = self.exits.lock().unwrap();
        loop {
            if self.powered_off.load(Ordering::SeqCst) {
                if let Some(state) = exits.get_mut(&pid) {
                    return Ok(*state.get_or_insert(128 + 9));
                }
            }
            match exits.get(&pid) {
                Some(Some(code)) if !self.held.load(Ordering::SeqCst) => return Ok(*code),
                Some(_) => exits = self.exited.wait(exits).unwrap(),
                None => return Err(BrockerError::ProcessNotFound(pid)),
            }
        }
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let mut exits = self.exits.lock().unwrap();
        if let Some(state) = exits.get_mut(&pid) {
            if state.is_none() {
                *state = Some(128 + 9);
            }
        }
        drop(exits);
        self.exited.notify_all();
        Ok(())
    }
}

/// Records every network call as a line of text
#[derive(Default)]
pub struct FakeNetwork {
    pub calls: Mutex<Vec<String>>,
    pub fail_bridge: AtomicBool,
    pub fail_veth: AtomicBool,
}

impl FakeNetwork {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NetworkOps for FakeNetwork {
    fn create_bridge(&self, name: &str, address: &BridgeAddress) -> Result<()> {
        if self.fail_bridge.load(Ordering::SeqCst) {
            return Err(BrockerError::Provisioning("bridge refused".to_string()));
        }
        self.record(format!("create-bridge {} {}", name, address));
        Ok(())
    }

    fn delete_bridge(&self, name: &str) -> Result<()> {
        self.record(format!("delete-bridge {}", name));
        Ok(())
    }

    fn create_veth(&self, host_end: &str, peer_end: &str, pid: u32) -> Result<()> {
        if self.fail_veth.load(Ordering::SeqCst) {
            return Err(BrockerError::Provisioning("veth refused".to_string()));
        }
        self.record(format!("create-veth {} {} {}", host_end, peer_end, pid));
        Ok(())
    }

    fn attach_to_bridge(&self, host_end: &str, bridge: &str) -> Result<()> {
        self.record(format!("attach {} {}", host_end, bridge));
        Ok(())
    }
}

/// Records `(pid, command)` for every in-namespace exec
#[derive(Default)]
pub struct FakeExecutor {
    pub commands: Mutex<Vec<(u32, String)>>,
}

impl FakeExecutor {
    pub fn commands(&self) -> Vec<(u32, String)> {
        self.commands.lock().unwrap().clone()
    }
}

impl NamespaceExecutor for FakeExecutor {
    fn exec(&self, pid: u32, command: &str) -> Result<()> {
        self.commands.lock().unwrap().push((pid, command.to_string()));
        Ok(())
    }
}

/// A fake host whose parts stay inspectable after being handed out
pub struct FakeHost {
    pub launcher: Arc<FakeLauncher>,
    pub network: Arc<FakeNetwork>,
    pub executor: Arc<FakeExecutor>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            launcher: Arc::new(FakeLauncher::new()),
            network: Arc::new(FakeNetwork::default()),
            executor: Arc::new(FakeExecutor::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            launcher: self.launcher.clone(),
            executor: self.executor.clone(),
            network: self.network.clone(),
        }
    }
}

/// Lifecycles still waiting on their process finish once the host goes away,
/// so the test runtime can shut down.
impl Drop for FakeHost {
    fn drop(&mut self) {
        self.launcher.power_off();
    }
}
