//! A scripted remote host shared by the scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use hostexec::ssh::{
    Clock, CommandOutput, Connector, Prober, SshProvisioner, Transport, TransportConfig,
    TransportPolicy,
};
use hostexec::{CommandLog, ProvisionError, ProvisionResult};

#[derive(Debug, Default)]
pub struct Host {
    /// Incremented on every successful dial.
    pub sessions: usize,
    pub accepting: bool,
    pub probes_until_up: usize,
    pub probes: usize,
    pub outputs: HashMap<String, (String, i32)>,
    pub executed: Vec<(usize, String)>,
    pub spawned: Vec<(usize, String)>,
    pub closed: Vec<usize>,
    pub files: HashMap<String, (i32, Vec<u8>)>,
}

pub type SharedHost = Arc<Mutex<Host>>;

pub fn host() -> SharedHost {
    Arc::new(Mutex::new(Host {
        accepting: true,
        ..Default::default()
    }))
}

pub fn respond(host: &SharedHost, command: &str, output: &str, status: i32) {
    host.lock()
        .unwrap()
        .outputs
        .insert(command.to_string(), (output.to_string(), status));
}

pub struct ScriptedConnector(pub SharedHost);

pub struct ScriptedSession {
    host: SharedHost,
    session: usize,
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedSession;

    fn connect(&self, address: &str, _policy: &TransportPolicy) -> ProvisionResult<ScriptedSession> {
        let mut h = self.0.lock().unwrap();
        if !h.accepting {
            return Err(ProvisionError::dial(format!("{}: connection refused", address)));
        }
        h.sessions += 1;
        Ok(ScriptedSession {
            host: self.0.clone(),
            session: h.sessions,
        })
    }
}

impl Transport for ScriptedSession {
    fn exec(&mut self, command: &str) -> ProvisionResult<CommandOutput> {
        let mut h = self.host.lock().unwrap();
        h.executed.push((self.session, command.to_string()));
        let (output, exit_status) = h.outputs.get(command).cloned().unwrap_or_default();
        Ok(CommandOutput { output, exit_status })
    }

    fn spawn(&mut self, command: &str) -> ProvisionResult<()> {
        let mut h = self.host.lock().unwrap();
        h.spawned.push((self.session, command.to_string()));
        if command == "reboot" {
            h.accepting = false;
        }
        Ok(())
    }

    fn send_file(&mut self, path: &str, mode: i32, data: &[u8]) -> ProvisionResult<()> {
        self.host
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (mode, data.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> ProvisionResult<()> {
        self.host.lock().unwrap().closed.push(self.session);
        Ok(())
    }
}

/// Answers once the host has been probed `probes_until_up` times, and then
/// starts accepting sessions again.
pub struct ScriptedProber(pub SharedHost);

impl Prober for ScriptedProber {
    fn is_reachable(&self, _address: &str, _timeout: Duration) -> bool {
        let mut h = self.0.lock().unwrap();
        h.probes += 1;
        if h.probes > h.probes_until_up {
            h.accepting = true;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct ManualClock {
    pub slept: Mutex<Vec<Duration>>,
}

fn clock_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Time advances only by what has been slept.
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        clock_origin() + self.slept.lock().unwrap().iter().sum::<Duration>()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub fn provisioner(
    host: &SharedHost,
    clock: Arc<ManualClock>,
    log: Option<Arc<dyn CommandLog>>,
) -> SshProvisioner<ScriptedConnector> {
    let config = TransportConfig::new("esx01.lab", "root").with_password("secret");
    SshProvisioner::connect_with(ScriptedConnector(host.clone()), &config, log)
        .unwrap()
        .with_clock(clock)
        .with_prober(Arc::new(ScriptedProber(host.clone())))
}
