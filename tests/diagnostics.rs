mod common;

use std::sync::Arc;

use common::{host, provisioner, respond, ManualClock};
use hostexec::ssh::{SshProvisioner, TransportConfig};
use hostexec::winrm::{classify_error, WinRmClient, WinRmConfig};
use hostexec::{Diagnostic, ProvisionError, ProvisionErrorKind, Severity};

#[test]
fn missing_credentials_become_an_error_diagnostic() {
    let config = TransportConfig::new("esx01.lab", "root");
    let err = SshProvisioner::connect(&config, None).unwrap_err();
    assert!(err.kind.is_configuration());

    let diag = Diagnostic::from(&err);
    assert_eq!(diag.severity, Severity::Error);
    assert_eq!(diag.summary, "Missing credentials");
    assert_eq!(diag.detail, err.message);
}

#[test]
fn command_output_lands_in_detail() {
    let host = host();
    respond(&host, "vmkload_mod -l", "  Module not loaded  \n", 2);
    let mut p = provisioner(&host, Arc::new(ManualClock::default()), None);

    let diag = Diagnostic::from(p.run("vmkload_mod -l").unwrap_err());
    assert_eq!(diag.summary, "Remote command failed");
    assert!(diag.detail.contains("exited with status 2"));
    assert!(diag.detail.ends_with("\n\nModule not loaded"));
}

#[test]
fn classified_winrm_failures_keep_their_summary() {
    let raw = ProvisionError::connection("error sending request: operation timed out");
    let diag = Diagnostic::from(classify_error(&raw, "win01", 5986));
    assert_eq!(diag.summary, "WinRM connection timed out");
    assert!(diag.detail.contains("win01:5986"));
}

#[tokio::test]
async fn winrm_init_without_target_is_a_configuration_error() {
    let mut client = WinRmClient::new(WinRmConfig::default());
    let err = client.init().await.unwrap_err();
    assert_eq!(err.kind, ProvisionErrorKind::MissingCredential);

    let diag: Diagnostic = err.into();
    assert!(diag.is_error());
    let json = serde_json::to_value(&diag).unwrap();
    assert_eq!(json["severity"], "error");
}
