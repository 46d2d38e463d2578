//! Error types shared by every hostexec transport.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionErrorKind {
    /// Neither a password nor a private key was supplied
    MissingCredential,
    /// Private key could not be decoded or parsed
    MalformedKey,
    /// Certificate could not be decoded or parsed
    MalformedCertificate,
    /// Pinned host key could not be decoded or parsed
    MalformedHostKey,
    /// TCP dial, handshake or authentication failed
    DialFailed,
    /// Execution session could not be opened on a live connection
    SessionFailed,
    /// Remote command exited non-zero or the transport broke mid-command
    CommandFailed,
    /// File upload failed
    TransferFailed,
    /// Host did not come back within the polling ceiling
    RebootTimeout,
    /// Host came back but the transport could not be re-established
    ReconnectFailed,
    /// Payload was not valid base64
    InvalidEncoding,
    /// Local source file could not be opened
    SourceUnreadable,
    /// WinRM: connection refused or bad port
    InvalidPort,
    /// WinRM: I/O timeout
    ConnectionTimeout,
    /// WinRM: HTTP 401
    InvalidCredentials,
    /// WinRM: anything else while opening the shell
    ConnectionFailed,
    /// Lookup matched nothing
    NotFound,
    /// Command output could not be parsed
    ParseFailed,
    /// Caller supplied an invalid regular expression
    InvalidPattern,
    /// Permission mode is not an octal number
    InvalidMode,
    /// No live transport or shell
    NotConnected,
    /// Operation cancelled by the caller
    Cancelled,
}

impl ProvisionErrorKind {
    /// Errors raised while resolving configuration, before any network I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::MalformedKey
                | Self::MalformedCertificate
                | Self::MalformedHostKey
        )
    }
}

/// Crate error type carrying a kind, a human-readable message and, for
/// command failures, whatever output the remote side produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionError {
    pub kind: ProvisionErrorKind,
    pub message: String,
    pub output: Option<String>,
}

impl ProvisionError {
    pub fn new(kind: ProvisionErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            output: None,
        }
    }

    /// Attach captured command output.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Prefix the message with call-site context (command, target, path).
    pub fn context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", ctx, self.message);
        self
    }

    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::MissingCredential, msg)
    }

    pub fn malformed_key(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::MalformedKey, msg)
    }

    pub fn malformed_certificate(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::MalformedCertificate, msg)
    }

    pub fn malformed_host_key(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::MalformedHostKey, msg)
    }

    pub fn dial(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::DialFailed, msg)
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::SessionFailed, msg)
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::CommandFailed, msg)
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::TransferFailed, msg)
    }

    pub fn reboot_timeout(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::RebootTimeout, msg)
    }

    pub fn reconnect(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::ReconnectFailed, msg)
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::InvalidEncoding, msg)
    }

    pub fn source_unreadable(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::SourceUnreadable, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::NotFound, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::ParseFailed, msg)
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::NotConnected, msg)
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::ConnectionFailed, msg)
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(ref output) = self.output {
            let trimmed = output.trim();
            if !trimmed.is_empty() {
                write!(f, "\noutput:\n{}", trimmed)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ProvisionError {}

impl From<ProvisionError> for String {
    fn from(e: ProvisionError) -> String {
        e.to_string()
    }
}

/// Convenience alias.
pub type ProvisionResult<T> = Result<T, ProvisionError>;
