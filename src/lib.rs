//! # hostexec
//!
//! Remote host command execution and provisioning.
//!
//! - [`ssh`]: SSH provisioner: run, list, untar, upload, reboot
//! - [`winrm`]: WinRM client: PowerShell execution and file copy
//! - [`esxi`]: `esxcli` helpers over any [`CommandRunner`]
//! - [`core`]: errors, diagnostics, command logging, provider settings

pub mod logging;

pub use hostexec_core as core;
pub use hostexec_esxi as esxi;
pub use hostexec_ssh as ssh;
pub use hostexec_winrm as winrm;

pub use hostexec_core::{
    CommandLog, CommandRunner, Diagnostic, ProvisionError, ProvisionErrorKind, ProvisionResult,
    Severity,
};
pub use logging::{LogFormat, LoggingConfig};
