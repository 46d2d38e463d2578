//! Reachability polling.
//!
//! Fixed-interval TCP probing, used to wait for a rebooting host to come back.
//! Time and probing are behind [`Clock`] and [`Prober`] so the loop can be
//! driven without real delays.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use hostexec_core::{ProvisionError, ProvisionResult};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Prober: Send + Sync {
    /// `true` once a TCP connection to `address` succeeds within `timeout`.
    fn is_reachable(&self, address: &str, timeout: Duration) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn is_reachable(&self, address: &str, timeout: Duration) -> bool {
        let addrs = match address.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("resolving {} failed: {}", address, e);
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
    }
}

fn default_grace() -> u64 {
    10
}
fn default_interval() -> u64 {
    10
}
fn default_ceiling() -> u64 {
    600
}
fn default_settle() -> u64 {
    10
}
fn default_probe_timeout() -> u64 {
    5
}

/// Timings for the reboot/reconnect cycle, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPolicy {
    /// Wait after issuing the reboot before the first probe.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Total polling budget.
    #[serde(default = "default_ceiling")]
    pub ceiling_secs: u64,
    /// Wait after the first successful probe before re-dialing.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
            interval_secs: default_interval(),
            ceiling_secs: default_ceiling(),
            settle_secs: default_settle(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl PollPolicy {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Number of probes that fit in the ceiling, at least one.
    pub fn attempts(&self) -> u64 {
        self.ceiling_secs
            .checked_div(self.interval_secs)
            .unwrap_or(1)
            .max(1)
    }
}

/// Block until `address` accepts TCP connections. Returns the number of
/// probes it took. Time spent in failed probes counts against the ceiling,
/// and no sleep starts that would end past it.
pub fn wait_reachable(
    address: &str,
    policy: &PollPolicy,
    clock: &dyn Clock,
    prober: &dyn Prober,
) -> ProvisionResult<u64> {
    let attempts = policy.attempts();
    let deadline = clock.now() + Duration::from_secs(policy.ceiling_secs);
    for attempt in 1..=attempts {
        if prober.is_reachable(address, policy.probe_timeout()) {
            info!("{} reachable after {} probe(s)", address, attempt);
            return Ok(attempt);
        }
        if attempt == attempts || clock.now() + policy.interval() >= deadline {
            break;
        }
        debug!(
            "{} not reachable ({}/{}), retrying in {}s",
            address, attempt, attempts, policy.interval_secs
        );
        clock.sleep(policy.interval());
    }
    Err(ProvisionError::reboot_timeout(format!(
        "{} not reachable within {}s",
        address, policy.ceiling_secs
    )))
}

/// [`wait_reachable`] with real time and real TCP probes.
pub fn ping(address: &str, policy: &PollPolicy) -> ProvisionResult<u64> {
    wait_reachable(address, policy, &SystemClock, &TcpProber)
}
