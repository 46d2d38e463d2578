//! Maps transport error text onto a small set of connection failure causes.
//!
//! Matching is substring based on the lowercased text, so it is only as
//! stable as the wording of the underlying HTTP stack.

use hostexec_core::{ProvisionError, ProvisionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    InvalidPort,
    ConnectionTimeout,
    InvalidCredentials,
    ConnectionFailed,
}

const INVALID_PORT_PATTERNS: &[&str] = &[
    "connection refused",
    "invalid port",
    "no connection could be made",
];
const TIMEOUT_PATTERNS: &[&str] = &["i/o timeout", "timed out", "timeout"];
/// A bare "401" also turns up in host names, ports and addresses.
const CREDENTIAL_PATTERNS: &[&str] = &["http 401", "unauthorized"];

impl ConnectionFailure {
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        let any = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));
        if any(INVALID_PORT_PATTERNS) {
            Self::InvalidPort
        } else if any(TIMEOUT_PATTERNS) {
            Self::ConnectionTimeout
        } else if any(CREDENTIAL_PATTERNS) {
            Self::InvalidCredentials
        } else {
            Self::ConnectionFailed
        }
    }

    pub fn kind(self) -> ProvisionErrorKind {
        match self {
            Self::InvalidPort => ProvisionErrorKind::InvalidPort,
            Self::ConnectionTimeout => ProvisionErrorKind::ConnectionTimeout,
            Self::InvalidCredentials => ProvisionErrorKind::InvalidCredentials,
            Self::ConnectionFailed => ProvisionErrorKind::ConnectionFailed,
        }
    }
}

/// Re-kind a shell-open failure and name the target in its message.
pub fn classify_error(err: &ProvisionError, target: &str, port: u16) -> ProvisionError {
    let cause = ConnectionFailure::classify(&err.message);
    let message = match cause {
        ConnectionFailure::InvalidPort => format!(
            "unable to reach WinRM on {}:{}, check that the port is correct and the service is listening",
            target, port
        ),
        ConnectionFailure::ConnectionTimeout => {
            format!("connection to {}:{} timed out", target, port)
        }
        ConnectionFailure::InvalidCredentials => {
            format!("credentials rejected by {}:{}", target, port)
        }
        ConnectionFailure::ConnectionFailed => {
            format!("failed to connect to {}:{}", target, port)
        }
    };
    ProvisionError::new(cause.kind(), format!("{}: {}", message, err.message))
}
