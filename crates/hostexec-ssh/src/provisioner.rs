//! SSH session provisioner.
//!
//! One logical connection to a host. The underlying transport is replaced
//! when the host reboots; the provisioner itself (address, policy) is not.

use std::sync::Arc;

use hostexec_core::{CommandLog, CommandRunner, LogSink, ProvisionError, ProvisionResult};
use log::{debug, info, warn};

use crate::config::{TransportConfig, TransportPolicy};
use crate::poll::{self, Clock, PollPolicy, Prober, SystemClock, TcpProber};
use crate::transport::{Connector, Ssh2Connector, Transport};

pub const DEFAULT_REBOOT_COMMAND: &str = "reboot";

pub struct SshProvisioner<C: Connector = Ssh2Connector> {
    address: String,
    policy: TransportPolicy,
    connector: C,
    transport: Option<C::Transport>,
    log: Arc<dyn CommandLog>,
    clock: Arc<dyn Clock>,
    prober: Arc<dyn Prober>,
    poll: PollPolicy,
    reboot_command: String,
}

impl<C: Connector> std::fmt::Debug for SshProvisioner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshProvisioner")
            .field("address", &self.address)
            .field("connected", &self.transport.is_some())
            .field("poll", &self.poll)
            .finish()
    }
}

impl SshProvisioner<Ssh2Connector> {
    /// Resolve `config`, dial and authenticate.
    pub fn connect(config: &TransportConfig, log: Option<Arc<dyn CommandLog>>) -> ProvisionResult<Self> {
        Self::connect_with(Ssh2Connector, config, log)
    }
}

impl<C: Connector> SshProvisioner<C> {
    pub fn connect_with(
        connector: C,
        config: &TransportConfig,
        log: Option<Arc<dyn CommandLog>>,
    ) -> ProvisionResult<Self> {
        let policy = config.resolve()?;
        let address = config.address();
        debug!("dialing {} as {}", address, policy.username);
        let transport = connector.connect(&address, &policy)?;

        Ok(Self {
            address,
            policy,
            connector,
            transport: Some(transport),
            log: log.unwrap_or_else(LogSink::shared),
            clock: Arc::new(SystemClock),
            prober: Arc::new(TcpProber),
            poll: PollPolicy::default(),
            reboot_command: DEFAULT_REBOOT_COMMAND.to_string(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_reboot_command(mut self, command: impl Into<String>) -> Self {
        self.reboot_command = command.into();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn policy(&self) -> &TransportPolicy {
        &self.policy
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    /// `false` only after a reboot whose reconnect failed.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub(crate) fn log(&self) -> &dyn CommandLog {
        self.log.as_ref()
    }

    pub(crate) fn transport_mut(&mut self) -> ProvisionResult<&mut C::Transport> {
        let address = &self.address;
        self.transport
            .as_mut()
            .ok_or_else(|| ProvisionError::not_connected(format!("no live transport to {}", address)))
    }

    /// Run `command` and return its combined output. A non-zero exit status
    /// is a `CommandFailed` error carrying that output.
    pub fn run(&mut self, command: &str) -> ProvisionResult<String> {
        self.log.record(log::Level::Info, &format!("running command: {}", command));

        let address = self.address.clone();
        let result = self
            .transport_mut()?
            .exec(command)
            .map_err(|e| e.context(format!("'{}' on {}", command, address)))?;

        if result.exit_status != 0 {
            return Err(ProvisionError::command(format!(
                "'{}' on {} exited with status {}",
                command, address, result.exit_status
            ))
            .with_output(result.output));
        }
        Ok(result.output)
    }

    /// `cd <dir> && <command>` as a single invocation. `dir` is passed to the
    /// remote shell as written, so `~` and variables expand there.
    pub fn run_with_directory(&mut self, dir: &str, command: &str) -> ProvisionResult<String> {
        self.run(&format!("cd {} && {}", dir, command))
    }

    /// Block until the host accepts TCP connections or the ceiling elapses.
    pub fn wait_reachable(&self) -> ProvisionResult<u64> {
        poll::wait_reachable(&self.address, &self.poll, self.clock.as_ref(), self.prober.as_ref())
    }

    /// Reboot the host and reconnect.
    ///
    /// The reboot command is started without waiting, the transport is
    /// closed, and after the grace period the host is polled until it
    /// answers. After a further settle period the transport is re-dialed
    /// with the retained policy.
    pub fn reboot(&mut self) -> ProvisionResult<()> {
        let mut transport = self.transport.take().ok_or_else(|| {
            ProvisionError::not_connected(format!("no live transport to {}", self.address))
        })?;

        self.log
            .record(log::Level::Info, &format!("running command: {}", self.reboot_command));
        if let Err(e) = transport.spawn(&self.reboot_command) {
            self.transport = Some(transport);
            return Err(e.context(format!("'{}' on {}", self.reboot_command, self.address)));
        }
        if let Err(e) = transport.close() {
            debug!("closing {} after reboot: {}", self.address, e);
        }
        drop(transport);

        info!(
            "{} rebooting, polling in {}s",
            self.address, self.poll.grace_secs
        );
        self.clock.sleep(self.poll.grace());
        self.wait_reachable()?;
        self.clock.sleep(self.poll.settle());

        let transport = self.connector.connect(&self.address, &self.policy).map_err(|e| {
            warn!("reconnect to {} failed: {}", self.address, e);
            ProvisionError::reconnect(format!(
                "{} is reachable but reconnecting failed: {}",
                self.address, e.message
            ))
        })?;
        self.transport = Some(transport);
        info!("reconnected to {}", self.address);
        Ok(())
    }

    /// Release the transport.
    pub fn close(mut self) -> ProvisionResult<()> {
        match self.transport.take() {
            Some(mut transport) => {
                debug!("closing connection to {}", self.address);
                transport.close()
            }
            None => Ok(()),
        }
    }
}

impl<C: Connector> CommandRunner for SshProvisioner<C> {
    fn run(&mut self, command: &str) -> ProvisionResult<String> {
        SshProvisioner::<C>::run(self, command)
    }
}
