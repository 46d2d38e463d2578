//! In-memory `ShellTransport` for unit tests. PowerShell scripts are decoded
//! from their `-EncodedCommand` argument and the copy scripts are simulated
//! against a single remote file buffer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hostexec_core::{ProvisionError, ProvisionResult};

use crate::transport::{ShellOutput, ShellTransport, POWERSHELL};

#[derive(Debug, Default)]
pub struct FakeShellState {
    pub opened: usize,
    pub closed: Vec<String>,
    pub open_failure: Option<String>,
    pub commands: Vec<(String, String)>,
    pub scripts: Vec<String>,
    pub file: Vec<u8>,
    pub reported_length: Option<u64>,
    /// (script substring, stderr text)
    pub stderr_rules: Vec<(String, String)>,
    /// (script substring, stdout text)
    pub stdout_rules: Vec<(String, String)>,
    pub fail_commands: Option<String>,
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<FakeShellState>>,
}

impl FakeShell {
    pub fn state(&self) -> Arc<Mutex<FakeShellState>> {
        self.state.clone()
    }
}

pub fn decode_script(args: &[String]) -> Option<String> {
    let raw = STANDARD.decode(args.last()?).ok()?;
    let units: Vec<u16> = raw.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    let script = String::from_utf16(&units).ok()?;
    Some(
        script
            .trim_start_matches("$ProgressPreference = 'SilentlyContinue'; ")
            .to_string(),
    )
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let to = text[from..].find(end)?;
    Some(&text[from..from + to])
}

#[async_trait]
impl ShellTransport for FakeShell {
    async fn open_shell(&mut self) -> ProvisionResult<String> {
        let mut s = self.state.lock().unwrap();
        if let Some(msg) = &s.open_failure {
            return Err(ProvisionError::connection(msg.clone()));
        }
        s.opened += 1;
        Ok(format!("shell-{}", s.opened))
    }

    async fn run_command(
        &mut self,
        shell_id: &str,
        command: &str,
        args: &[String],
    ) -> ProvisionResult<ShellOutput> {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.state.lock().unwrap();
        s.commands.push((shell_id.to_string(), command.to_string()));
        if let Some(msg) = &s.fail_commands {
            return Err(ProvisionError::command(msg.clone()));
        }
        let script = if command == POWERSHELL {
            decode_script(args).unwrap_or_default()
        } else {
            args.join(" ")
        };
        s.scripts.push(script.clone());

        let mut out = ShellOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        if script.contains("New-Item -ItemType File") {
            s.file.clear();
        }
        if let Some(b64) = between(&script, "FromBase64String('", "')") {
            let bytes = STANDARD.decode(b64).unwrap();
            s.file.extend_from_slice(&bytes);
        }
        if script.contains("Get-Item") {
            let len = s.reported_length.unwrap_or(s.file.len() as u64);
            out.stdout = format!("{}\r\n", len);
        }
        for (pattern, text) in &s.stdout_rules {
            if script.contains(pattern.as_str()) {
                out.stdout = text.clone();
            }
        }
        for (pattern, text) in &s.stderr_rules {
            if script.contains(pattern.as_str()) {
                out.stderr = text.clone();
                out.exit_code = Some(1);
            }
        }
        Ok(out)
    }

    async fn close_shell(&mut self, shell_id: &str) -> ProvisionResult<()> {
        self.state.lock().unwrap().closed.push(shell_id.to_string());
        Ok(())
    }
}
