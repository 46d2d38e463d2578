//! Chunked file copy over a WinRM shell.
//!
//! The file is written with one PowerShell `AppendAllBytes` call per chunk.
//! Servers cap the number of operations a single shell may serve, so the
//! copier recycles its shell after [`MAX_OPERATIONS_PER_SHELL`] commands.

use hostexec_core::{ProvisionError, ProvisionResult};
use log::{debug, info, warn};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::transport::{powershell_args, ShellTransport, POWERSHELL};

pub const MAX_OPERATIONS_PER_SHELL: usize = 15;
/// Raw bytes per chunk; keeps the encoded command under the cmd.exe limit.
pub const CHUNK_SIZE: usize = 1536;

pub struct FileCopier<'t> {
    transport: &'t mut dyn ShellTransport,
    max_operations_per_shell: usize,
    chunk_size: usize,
    shell_id: Option<String>,
    operations: usize,
}

impl<'t> FileCopier<'t> {
    pub fn new(transport: &'t mut dyn ShellTransport) -> Self {
        Self {
            transport,
            max_operations_per_shell: MAX_OPERATIONS_PER_SHELL,
            chunk_size: CHUNK_SIZE,
            shell_id: None,
            operations: 0,
        }
    }

    pub fn with_max_operations_per_shell(mut self, max: usize) -> Self {
        self.max_operations_per_shell = max.max(1);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Write `data` to `destination`, replacing any existing file, and return
    /// the verified remote size.
    pub async fn copy(&mut self, data: &[u8], destination: &str) -> ProvisionResult<u64> {
        let result = self.copy_inner(data, destination).await;
        if let Err(e) = self.release().await {
            warn!("closing copy shell failed: {}", e);
        }
        result
    }

    async fn copy_inner(&mut self, data: &[u8], destination: &str) -> ProvisionResult<u64> {
        let remote = ps_quote(destination);
        let total = data.len() as u64;

        let init = format!(
            "$parent = Split-Path -Parent {path}; \
             if ($parent -and -not (Test-Path $parent)) {{ New-Item -ItemType Directory -Path $parent -Force | Out-Null }}; \
             if (Test-Path {path}) {{ Remove-Item {path} -Force }}; \
             New-Item -ItemType File -Path {path} -Force | Out-Null",
            path = remote
        );
        self.run_script(&init, &format!("preparing {}", destination)).await?;

        for (idx, chunk) in data.chunks(self.chunk_size).enumerate() {
            let append = format!(
                "$bytes = [System.Convert]::FromBase64String('{}'); \
                 [System.IO.File]::AppendAllBytes({}, $bytes)",
                STANDARD.encode(chunk),
                remote
            );
            self.run_script(&append, &format!("writing chunk {} of {}", idx, destination))
                .await?;
        }

        let stdout = self
            .run_script(
                &format!("(Get-Item {}).Length", remote),
                &format!("verifying {}", destination),
            )
            .await?;
        let remote_size: u64 = stdout.trim().parse().map_err(|_| {
            ProvisionError::transfer(format!(
                "unable to read size of {}: '{}'",
                destination,
                stdout.trim()
            ))
        })?;
        if remote_size != total {
            return Err(ProvisionError::transfer(format!(
                "size mismatch for {}: local={} remote={}",
                destination, total, remote_size
            )));
        }

        info!("copied {} bytes to {}", total, destination);
        Ok(remote_size)
    }

    /// Transport errors come back as the transport reported them. Output on
    /// stderr is a `TransferFailed` naming `stage`.
    async fn run_script(&mut self, script: &str, stage: &str) -> ProvisionResult<String> {
        let shell_id = self.shell().await?;
        self.operations += 1;
        let out = self
            .transport
            .run_command(&shell_id, POWERSHELL, &powershell_args(script))
            .await?;
        if !out.stderr.trim().is_empty() {
            return Err(ProvisionError::transfer(format!("{}: {}", stage, out.stderr.trim())));
        }
        Ok(out.stdout)
    }

    async fn shell(&mut self) -> ProvisionResult<String> {
        if self.operations >= self.max_operations_per_shell {
            debug!("copy shell reached {} operations, rotating", self.operations);
            self.release().await?;
        }
        match &self.shell_id {
            Some(id) => Ok(id.clone()),
            None => {
                let id = self.transport.open_shell().await?;
                self.shell_id = Some(id.clone());
                self.operations = 0;
                Ok(id)
            }
        }
    }

    async fn release(&mut self) -> ProvisionResult<()> {
        self.operations = 0;
        match self.shell_id.take() {
            Some(id) => self.transport.close_shell(&id).await,
            None => Ok(()),
        }
    }
}

fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
