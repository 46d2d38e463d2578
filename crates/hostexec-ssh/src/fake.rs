//! In-memory connector and transport for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use hostexec_core::{ProvisionError, ProvisionResult};

use crate::config::TransportPolicy;
use crate::poll::Clock;
use crate::transport::{CommandOutput, Connector, Transport};

/// Everything the fakes observed, keyed by connection number (1-based).
#[derive(Debug, Default)]
pub struct FakeState {
    pub connects: usize,
    pub refuse_connects_from: Option<usize>,
    pub fail_sessions: bool,
    pub fail_transfers: bool,
    pub responses: HashMap<String, (String, i32)>,
    pub executed: Vec<(usize, String)>,
    pub spawned: Vec<(usize, String)>,
    pub files: Vec<(String, i32, Vec<u8>)>,
    pub closed: Vec<usize>,
}

impl FakeState {
    pub fn reply(&mut self, command: &str, output: &str, exit_status: i32) {
        self.responses
            .insert(command.to_string(), (output.to_string(), exit_status));
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        self.state.clone()
    }
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn connect(&self, address: &str, _policy: &TransportPolicy) -> ProvisionResult<FakeTransport> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.connects + 1;
        if matches!(state.refuse_connects_from, Some(n) if attempt >= n) {
            return Err(ProvisionError::dial(format!("connection to {} refused", address)));
        }
        state.connects = attempt;
        Ok(FakeTransport {
            state: self.state.clone(),
            generation: attempt,
        })
    }
}

pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    generation: usize,
}

impl Transport for FakeTransport {
    fn exec(&mut self, command: &str) -> ProvisionResult<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sessions {
            return Err(ProvisionError::session("channel open refused"));
        }
        state.executed.push((self.generation, command.to_string()));
        let (output, exit_status) = state
            .responses
            .get(command)
            .cloned()
            .unwrap_or_default();
        Ok(CommandOutput { output, exit_status })
    }

    fn spawn(&mut self, command: &str) -> ProvisionResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sessions {
            return Err(ProvisionError::session("channel open refused"));
        }
        state.spawned.push((self.generation, command.to_string()));
        Ok(())
    }

    fn send_file(&mut self, path: &str, mode: i32, data: &[u8]) -> ProvisionResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_transfers {
            return Err(ProvisionError::session("scp channel refused"));
        }
        state.files.push((path.to_string(), mode, data.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> ProvisionResult<()> {
        self.state.lock().unwrap().closed.push(self.generation);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingClock {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

fn clock_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Time advances only by what has been slept.
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        clock_origin() + self.slept.lock().unwrap().iter().sum::<Duration>()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
