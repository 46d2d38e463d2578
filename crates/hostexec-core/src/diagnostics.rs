//! Structured diagnostics handed back to the plugin runtime.
//!
//! Resource handlers never surface a raw error; they convert it into a
//! [`Diagnostic`] with a fixed summary per error kind and the full message
//! (plus any captured command output) as detail.

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Fixed, user-facing summary for each kind.
pub fn summary_for(kind: ProvisionErrorKind) -> &'static str {
    use ProvisionErrorKind::*;
    match kind {
        MissingCredential => "Missing credentials",
        MalformedKey => "Invalid private key",
        MalformedCertificate => "Invalid certificate",
        MalformedHostKey => "Invalid host key",
        DialFailed => "Unable to connect to host",
        SessionFailed => "Unable to open remote session",
        CommandFailed => "Remote command failed",
        TransferFailed => "File transfer failed",
        RebootTimeout => "Host did not come back after reboot",
        ReconnectFailed => "Unable to reconnect after reboot",
        InvalidEncoding => "Invalid base64 payload",
        SourceUnreadable => "Unable to read source file",
        InvalidPort => "Invalid WinRM port",
        ConnectionTimeout => "WinRM connection timed out",
        InvalidCredentials => "Invalid WinRM credentials",
        ConnectionFailed => "WinRM connection failed",
        NotFound => "Not found",
        ParseFailed => "Unable to parse command output",
        InvalidPattern => "Invalid pattern",
        InvalidMode => "Invalid permission mode",
        NotConnected => "Not connected",
        Cancelled => "Operation cancelled",
    }
}

impl From<&ProvisionError> for Diagnostic {
    fn from(err: &ProvisionError) -> Self {
        let mut detail = err.message.clone();
        if let Some(output) = err.output.as_deref().map(str::trim) {
            if !output.is_empty() {
                detail.push_str("\n\n");
                detail.push_str(output);
            }
        }
        Diagnostic::error(summary_for(err.kind), detail)
    }
}

impl From<ProvisionError> for Diagnostic {
    fn from(err: ProvisionError) -> Self {
        Diagnostic::from(&err)
    }
}
