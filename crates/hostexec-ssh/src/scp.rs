//! SCP-style upload over the provisioner's transport.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hostexec_core::{ProvisionError, ProvisionErrorKind, ProvisionResult};

use crate::provisioner::SshProvisioner;
use crate::transport::{Connector, Transport};

/// Mode applied when the caller leaves it empty.
pub const DEFAULT_UPLOAD_MODE: &str = "0655";

/// Parse an octal permission string such as `0644` or `755`.
pub fn parse_mode(mode: &str) -> ProvisionResult<i32> {
    let digits = mode.trim().trim_start_matches("0o");
    match i32::from_str_radix(digits, 8) {
        Ok(bits) if (0..=0o7777).contains(&bits) => Ok(bits),
        _ => Err(ProvisionError::new(
            ProvisionErrorKind::InvalidMode,
            format!("'{}' is not an octal permission mode", mode),
        )),
    }
}

impl<C: Connector> SshProvisioner<C> {
    /// Decode `payload` and write it to `destination` with `mode`
    /// (default [`DEFAULT_UPLOAD_MODE`]). No retries.
    pub fn upload(&mut self, payload: &str, destination: &str, mode: &str) -> ProvisionResult<()> {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let data = STANDARD.decode(compact.as_bytes()).map_err(|e| {
            ProvisionError::encoding(format!("payload for {} is not valid base64: {}", destination, e))
        })?;

        let mode = if mode.trim().is_empty() {
            self.log().record(
                log::Level::Info,
                &format!(
                    "no permission mode given for {}, using {}",
                    destination, DEFAULT_UPLOAD_MODE
                ),
            );
            DEFAULT_UPLOAD_MODE
        } else {
            mode
        };
        let bits = parse_mode(mode)?;

        log::debug!("uploading {} bytes to {} ({:o})", data.len(), destination, bits);
        self.transport_mut()?
            .send_file(destination, bits, &data)
            .map_err(|e| {
                ProvisionError::transfer(format!("upload to {} failed: {}", destination, e.message))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use std::sync::Arc;

    use crate::config::TransportConfig;
    use crate::fake::FakeConnector;
    use hostexec_core::{BufferedLog, CommandLog};

    fn connect(connector: FakeConnector, log: Arc<BufferedLog>) -> SshProvisioner<FakeConnector> {
        let cfg = TransportConfig::new("esx01", "root").with_password("pw");
        SshProvisioner::connect_with(connector, &cfg, Some(log as Arc<dyn CommandLog>)).unwrap()
    }

    #[test]
    fn parse_modes() {
        assert_eq!(parse_mode("0655").unwrap(), 0o655);
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert_eq!(parse_mode("0o600").unwrap(), 0o600);
        assert_eq!(parse_mode("rwx").unwrap_err().kind, ProvisionErrorKind::InvalidMode);
        assert_eq!(parse_mode("0899").unwrap_err().kind, ProvisionErrorKind::InvalidMode);
        assert_eq!(parse_mode("17777").unwrap_err().kind, ProvisionErrorKind::InvalidMode);
    }

    #[test]
    fn writes_decoded_bytes_with_requested_mode() {
        let connector = FakeConnector::default();
        let state = connector.state();
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        let bytes = b"#!/bin/sh\necho hi\n\x00\xff";
        p.upload(&STANDARD.encode(bytes), "/tmp/run.sh", "0755").unwrap();

        let s = state.lock().unwrap();
        assert_eq!(s.files, vec![("/tmp/run.sh".to_string(), 0o755, bytes.to_vec())]);
    }

    #[test]
    fn empty_mode_defaults_and_is_logged() {
        let connector = FakeConnector::default();
        let state = connector.state();
        let log = Arc::new(BufferedLog::new());
        let mut p = connect(connector, log.clone());

        p.upload("aGVsbG8=\n", "/tmp/hello", "").unwrap();

        assert_eq!(state.lock().unwrap().files[0].1, 0o655);
        assert_eq!(state.lock().unwrap().files[0].2, b"hello".to_vec());
        assert!(log.messages()[0].contains("using 0655"));
    }

    #[test]
    fn invalid_base64_is_invalid_encoding() {
        let connector = FakeConnector::default();
        let state = connector.state();
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        let err = p.upload("***", "/tmp/x", "0644").unwrap_err();
        assert_eq!(err.kind, ProvisionErrorKind::InvalidEncoding);
        assert!(state.lock().unwrap().files.is_empty());
    }

    #[test]
    fn transport_failure_is_transfer_failed() {
        let connector = FakeConnector::default();
        connector.state().lock().unwrap().fail_transfers = true;
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        let err = p.upload("aGVsbG8=", "/tmp/x", "0644").unwrap_err();
        assert_eq!(err.kind, ProvisionErrorKind::TransferFailed);
        assert!(err.message.contains("/tmp/x"));
    }
}
