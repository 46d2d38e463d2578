//! The live connection underneath a provisioner.
//!
//! [`Connector`] dials, [`Transport`] executes. The provisioner only ever
//! talks to these traits, which lets a reboot swap the transport out and lets
//! tests run without a server.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use hostexec_core::{ProvisionError, ProvisionResult};
use log::{debug, info};
use ssh2::{ExtendedData, HashType, KeyboardInteractivePrompt, Prompt, Session};

use crate::config::{AuthMethod, TransportPolicy};

/// Combined stdout/stderr and exit status of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_status: i32,
}

pub trait Transport: Send {
    /// Run `command` in a fresh session and wait for it to finish.
    fn exec(&mut self, command: &str) -> ProvisionResult<CommandOutput>;

    /// Start `command` without waiting for a result.
    fn spawn(&mut self, command: &str) -> ProvisionResult<()>;

    /// Write `data` to `path` on the remote host with permission `mode`.
    fn send_file(&mut self, path: &str, mode: i32, data: &[u8]) -> ProvisionResult<()>;

    fn close(&mut self) -> ProvisionResult<()>;
}

pub trait Connector {
    type Transport: Transport;

    fn connect(&self, address: &str, policy: &TransportPolicy) -> ProvisionResult<Self::Transport>;
}

// ─── ssh2 ───────────────────────────────────────────────────────────────────

/// Answers every keyboard-interactive prompt with the password.
pub struct PasswordResponder {
    password: String,
}

impl PasswordResponder {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl KeyboardInteractivePrompt for PasswordResponder {
    fn prompt(&mut self, _username: &str, _instructions: &str, prompts: &[Prompt]) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    fn dial(address: &str, policy: &TransportPolicy) -> ProvisionResult<TcpStream> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| ProvisionError::dial(format!("unable to resolve {}: {}", address, e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, policy.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(ProvisionError::dial(match last_err {
            Some(e) => format!("unable to connect to {}: {}", address, e),
            None => format!("{} resolved to no addresses", address),
        }))
    }

    fn authenticate(session: &Session, policy: &TransportPolicy) -> ProvisionResult<()> {
        let user = policy.username.as_str();
        match &policy.auth {
            AuthMethod::PublicKey(signer) => {
                session
                    .userauth_pubkey_memory(
                        user,
                        signer.certificate(),
                        signer.private_key(),
                        signer.passphrase(),
                    )
                    .map_err(|e| {
                        ProvisionError::dial(format!("public key authentication failed: {}", e))
                    })?;
            }
            AuthMethod::Password(password) => {
                if let Err(e) = session.userauth_password(user, password) {
                    debug!("password auth for {} rejected ({}), trying keyboard-interactive", user, e);
                    let mut responder = PasswordResponder::new(password.as_str());
                    session
                        .userauth_keyboard_interactive(user, &mut responder)
                        .map_err(|e| {
                            ProvisionError::dial(format!("password authentication failed: {}", e))
                        })?;
                }
            }
        }

        if session.authenticated() {
            Ok(())
        } else {
            Err(ProvisionError::dial(format!("server did not authenticate {}", user)))
        }
    }
}

impl Connector for Ssh2Connector {
    type Transport = Ssh2Transport;

    fn connect(&self, address: &str, policy: &TransportPolicy) -> ProvisionResult<Ssh2Transport> {
        let stream = Self::dial(address, policy)?;
        stream.set_nodelay(true).ok();

        let mut session = Session::new()
            .map_err(|e| ProvisionError::dial(format!("unable to create session: {}", e)))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| ProvisionError::dial(format!("handshake with {} failed: {}", address, e)))?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            info!("{} host key SHA256:{}", address, STANDARD_NO_PAD.encode(hash));
        }
        let (blob, _) = session
            .host_key()
            .ok_or_else(|| ProvisionError::dial(format!("{} presented no host key", address)))?;
        policy.host_key.verify(blob)?;

        Self::authenticate(&session, policy)?;
        info!("connected to {} as {}", address, policy.username);

        Ok(Ssh2Transport { session })
    }
}

pub struct Ssh2Transport {
    session: Session,
}

impl Ssh2Transport {
    fn channel(&self) -> ProvisionResult<ssh2::Channel> {
        self.session
            .channel_session()
            .map_err(|e| ProvisionError::session(format!("unable to open session: {}", e)))
    }
}

impl Transport for Ssh2Transport {
    fn exec(&mut self, command: &str) -> ProvisionResult<CommandOutput> {
        let mut channel = self.channel()?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|e| ProvisionError::session(format!("unable to merge stderr: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| ProvisionError::command(format!("unable to start command: {}", e)))?;

        let mut buf = Vec::new();
        let read = channel.read_to_end(&mut buf);
        let output = String::from_utf8_lossy(&buf).into_owned();
        if let Err(e) = read {
            return Err(ProvisionError::command(format!("reading output failed: {}", e)).with_output(output));
        }

        channel.wait_close().map_err(|e| {
            ProvisionError::command(format!("closing session failed: {}", e)).with_output(output.clone())
        })?;
        let exit_status = channel.exit_status().map_err(|e| {
            ProvisionError::command(format!("no exit status: {}", e)).with_output(output.clone())
        })?;

        Ok(CommandOutput { output, exit_status })
    }

    fn spawn(&mut self, command: &str) -> ProvisionResult<()> {
        let mut channel = self.channel()?;
        channel
            .exec(command)
            .map_err(|e| ProvisionError::command(format!("unable to start command: {}", e)))
    }

    fn send_file(&mut self, path: &str, mode: i32, data: &[u8]) -> ProvisionResult<()> {
        let mut channel = self
            .session
            .scp_send(Path::new(path), mode, data.len() as u64, None)
            .map_err(|e| ProvisionError::transfer(format!("unable to start scp: {}", e)))?;

        channel
            .write_all(data)
            .map_err(|e| ProvisionError::transfer(format!("write failed: {}", e)))?;
        channel
            .send_eof()
            .map_err(|e| ProvisionError::transfer(format!("send eof failed: {}", e)))?;
        channel
            .wait_eof()
            .map_err(|e| ProvisionError::transfer(format!("wait eof failed: {}", e)))?;
        channel
            .close()
            .map_err(|e| ProvisionError::transfer(format!("close failed: {}", e)))?;
        channel
            .wait_close()
            .map_err(|e| ProvisionError::transfer(format!("wait close failed: {}", e)))?;
        Ok(())
    }

    fn close(&mut self) -> ProvisionResult<()> {
        self.session
            .disconnect(None, "closing", None)
            .map_err(|e| ProvisionError::session(format!("disconnect failed: {}", e)))
    }
}
