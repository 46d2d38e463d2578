//! WinRM session client.
//!
//! Lifecycle: configure, [`WinRmClient::init`] to open a shell, run any
//! number of commands, then [`WinRmClient::destroy`].

use std::collections::HashMap;
use std::path::Path;

use hostexec_core::{ProvisionError, ProvisionErrorKind, ProvisionResult};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthScheme;
use crate::classify::classify_error;
use crate::config::WinRmConfig;
use crate::copy::{FileCopier, MAX_OPERATIONS_PER_SHELL};
use crate::transport::{powershell_args, ShellTransport, WinRmTransport, POWERSHELL};

/// Returned in place of empty output from a successful command.
pub const SUCCESS_MARKER: &str = "SUCCESS";
/// Attached to the error of a failed command.
pub const FAIL_MARKER: &str = "FAIL";

pub struct WinRmClient {
    config: WinRmConfig,
    transport: Option<Box<dyn ShellTransport>>,
    shell_id: Option<String>,
    errors: Vec<ProvisionError>,
}

impl std::fmt::Debug for WinRmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinRmClient")
            .field("config", &self.config)
            .field("shell_id", &self.shell_id)
            .field("errors", &self.errors.len())
            .finish()
    }
}

impl WinRmClient {
    pub fn new(config: WinRmConfig) -> Self {
        Self {
            config,
            transport: None,
            shell_id: None,
            errors: Vec::new(),
        }
    }

    /// Replace the configuration from a loosely typed context map.
    pub fn configure(mut self, context: &HashMap<String, Value>) -> Self {
        self.config = WinRmConfig::from_context(context);
        self
    }

    pub fn config(&self) -> &WinRmConfig {
        &self.config
    }

    pub fn shell_id(&self) -> Option<&str> {
        self.shell_id.as_deref()
    }

    /// Failures recorded by [`execute_command`](Self::execute_command).
    pub fn errors(&self) -> &[ProvisionError] {
        &self.errors
    }

    /// Build the HTTP transport and open a shell. A domain-qualified
    /// username (`DOMAIN\user`) selects NTLM.
    pub async fn init(&mut self) -> ProvisionResult<()> {
        if self.config.target.trim().is_empty() {
            return Err(ProvisionError::missing_credential("WinRM target is not set"));
        }
        if self.config.username.is_empty() {
            return Err(ProvisionError::missing_credential(format!(
                "no WinRM username for {}",
                self.config.target
            )));
        }
        let auth = AuthScheme::select(&self.config.username, &self.config.password);
        info!(
            "connecting to WinRM on {}:{} using {} auth",
            self.config.target,
            self.config.port,
            auth.name()
        );
        let transport = WinRmTransport::with_auth(&self.config, auth)?;
        self.init_with_transport(Box::new(transport)).await
    }

    /// Open a shell on `transport`. A shell left open by an earlier init is
    /// closed first.
    pub async fn init_with_transport(&mut self, mut transport: Box<dyn ShellTransport>) -> ProvisionResult<()> {
        if let Err(e) = self.destroy().await {
            warn!("closing previous WinRM shell on {} failed: {}", self.config.target, e);
        }
        match transport.open_shell().await {
            Ok(shell_id) => {
                debug!("WinRM shell {} open on {}", shell_id, self.config.target);
                self.shell_id = Some(shell_id);
                self.transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                let err = classify_error(&e, &self.config.target, self.config.port);
                error!("{}", err);
                Err(err)
            }
        }
    }

    pub async fn execute_command(&mut self, command: &str) -> ProvisionResult<String> {
        self.execute_command_with_cancel(command, &CancellationToken::new())
            .await
    }

    /// Run `command` through PowerShell. Any stderr output is a failure,
    /// whatever the exit code; the error then carries [`FAIL_MARKER`] as its
    /// output and is also kept in [`errors`](Self::errors).
    pub async fn execute_command_with_cancel(
        &mut self,
        command: &str,
        cancel: &CancellationToken,
    ) -> ProvisionResult<String> {
        let target = self.config.target.clone();
        let (Some(transport), Some(shell_id)) = (self.transport.as_mut(), self.shell_id.as_deref()) else {
            return Err(ProvisionError::not_connected(format!(
                "no open WinRM shell on {}",
                target
            )));
        };

        debug!("running command on {}: {}", target, command);
        let args = powershell_args(command);
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProvisionError::new(
                    ProvisionErrorKind::Cancelled,
                    format!("'{}' on {} was cancelled", command, target),
                ));
            }
            r = transport.run_command(shell_id, POWERSHELL, &args) => r,
        };

        let failure = match result {
            Ok(out) if out.stderr.trim().is_empty() => {
                if out.stdout.trim().is_empty() {
                    return Ok(SUCCESS_MARKER.to_string());
                }
                return Ok(out.stdout);
            }
            Ok(out) => ProvisionError::command(format!(
                "'{}' on {} failed: {}",
                command,
                target,
                out.stderr.trim()
            )),
            Err(e) => ProvisionError::command(format!("'{}' on {} failed: {}", command, target, e.message)),
        };
        let failure = failure.with_output(FAIL_MARKER);
        error!("{}", failure.message);
        self.errors.push(failure.clone());
        Err(failure)
    }

    /// Copy a local file to `destination` using a dedicated NTLM transport.
    pub async fn upload(&self, destination: &str, source: impl AsRef<Path>) -> ProvisionResult<u64> {
        let data = read_source(source.as_ref()).await?;
        let auth = AuthScheme::ntlm(&self.config.username, &self.config.password);
        let mut transport = WinRmTransport::with_auth(&self.config, auth)?;
        self.upload_bytes(&mut transport, destination, &data).await
    }

    pub async fn upload_with_transport(
        &self,
        transport: &mut dyn ShellTransport,
        destination: &str,
        source: impl AsRef<Path>,
    ) -> ProvisionResult<u64> {
        let data = read_source(source.as_ref()).await?;
        self.upload_bytes(transport, destination, &data).await
    }

    async fn upload_bytes(
        &self,
        transport: &mut dyn ShellTransport,
        destination: &str,
        data: &[u8],
    ) -> ProvisionResult<u64> {
        info!(
            "uploading {} bytes to {} on {}",
            data.len(),
            destination,
            self.config.target
        );
        FileCopier::new(transport)
            .with_max_operations_per_shell(MAX_OPERATIONS_PER_SHELL)
            .copy(data, destination)
            .await
    }

    /// Close the shell if one is open. Safe to call repeatedly.
    pub async fn destroy(&mut self) -> ProvisionResult<()> {
        let shell_id = self.shell_id.take();
        let transport = self.transport.take();
        if let (Some(shell_id), Some(mut transport)) = (shell_id, transport) {
            debug!("closing WinRM shell {} on {}", shell_id, self.config.target);
            transport.close_shell(&shell_id).await?;
        }
        Ok(())
    }
}

async fn read_source(path: &Path) -> ProvisionResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        ProvisionError::source_unreadable(format!("unable to read {}: {}", path.display(), e))
    })
}
