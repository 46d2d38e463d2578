use std::borrow::Cow;

use hostexec_core::text::non_empty_lines;
use hostexec_core::ProvisionResult;

use crate::provisioner::SshProvisioner;
use crate::transport::Connector;

impl<C: Connector> SshProvisioner<C> {
    /// Entries of `path`, one per line. `log_output` additionally sends the
    /// raw listing to the command log.
    pub fn list_directory(&mut self, path: &str, log_output: bool) -> ProvisionResult<Vec<String>> {
        let path = shell_escape::unix::escape(Cow::Borrowed(path));
        let output = self.run(&format!("ls -1 {}", path))?;
        if log_output {
            self.log().record(log::Level::Info, &output);
        }
        Ok(non_empty_lines(&output))
    }

    /// Extract `archive` inside `directory` and return the files tar reports.
    pub fn untar(&mut self, archive: &str, directory: &str) -> ProvisionResult<Vec<String>> {
        let archive_arg = shell_escape::unix::escape(Cow::Borrowed(archive));
        let output = self
            .run_with_directory(directory, &format!("tar -xvf {}", archive_arg))
            .map_err(|e| e.context(format!("extracting {} into {}", archive, directory)))?;
        Ok(non_empty_lines(&output))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::TransportConfig;
    use crate::fake::FakeConnector;
    use crate::provisioner::SshProvisioner;
    use hostexec_core::{BufferedLog, CommandLog, ProvisionErrorKind};

    fn connect(connector: FakeConnector, log: Arc<BufferedLog>) -> SshProvisioner<FakeConnector> {
        let cfg = TransportConfig::new("esx01", "root").with_password("pw");
        SshProvisioner::connect_with(connector, &cfg, Some(log as Arc<dyn CommandLog>)).unwrap()
    }

    #[test]
    fn list_directory_trims_and_drops_blank_lines() {
        let connector = FakeConnector::default();
        connector
            .state()
            .lock()
            .unwrap()
            .reply("ls -1 /vmfs/volumes", "  datastore1 \r\n\r\nBOOTBANK1\n", 0);
        let log = Arc::new(BufferedLog::new());
        let mut p = connect(connector, log.clone());

        let entries = p.list_directory("/vmfs/volumes", false).unwrap();
        assert_eq!(entries, vec!["datastore1", "BOOTBANK1"]);
        assert_eq!(log.messages(), vec!["running command: ls -1 /vmfs/volumes"]);
    }

    #[test]
    fn list_directory_can_log_raw_output() {
        let connector = FakeConnector::default();
        connector.state().lock().unwrap().reply("ls -1 /tmp", "a\nb\n", 0);
        let log = Arc::new(BufferedLog::new());
        let mut p = connect(connector, log.clone());

        let entries = p.list_directory("/tmp", true).unwrap();
        assert_eq!(entries, vec!["a", "b"]);
        assert_eq!(log.messages(), vec!["running command: ls -1 /tmp", "a\nb\n"]);
    }

    #[test]
    fn untar_returns_reported_files() {
        let connector = FakeConnector::default();
        connector.state().lock().unwrap().reply(
            "cd /tmp/drivers && tar -xvf bundle.tar",
            "nvme.vib\r\n  metadata.zip  \n\n",
            0,
        );
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        let files = p.untar("bundle.tar", "/tmp/drivers").unwrap();
        assert_eq!(files, vec!["nvme.vib", "metadata.zip"]);
    }

    #[test]
    fn untar_into_home_relative_directory() {
        let connector = FakeConnector::default();
        connector
            .state()
            .lock()
            .unwrap()
            .reply("cd ~/drivers && tar -xvf 'my bundle.tar'", "nvme.vib\n", 0);
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        assert_eq!(p.untar("my bundle.tar", "~/drivers").unwrap(), vec!["nvme.vib"]);
    }

    #[test]
    fn untar_failure_keeps_output() {
        let connector = FakeConnector::default();
        connector.state().lock().unwrap().reply(
            "cd /tmp && tar -xvf missing.tar",
            "tar: missing.tar: No such file or directory\n",
            2,
        );
        let mut p = connect(connector, Arc::new(BufferedLog::new()));

        let err = p.untar("missing.tar", "/tmp").unwrap_err();
        assert_eq!(err.kind, ProvisionErrorKind::CommandFailed);
        assert!(err.message.starts_with("extracting missing.tar into /tmp: "));
        assert!(err.output.unwrap().contains("No such file"));
    }
}
