//! # hostexec – SSH
//!
//! Command execution and provisioning over SSH.
//!
//! ## Modules
//!
//! - **config**: Credential resolution into a reusable transport policy
//! - **transport**: `Connector`/`Transport` seam and the ssh2 implementation
//! - **poll**: Fixed-interval reachability polling
//! - **provisioner**: Session provisioner with reboot/reconnect
//! - **remote_fs**: Directory listing and archive extraction
//! - **scp**: Base64 payload upload

pub mod config;
pub mod poll;
pub mod provisioner;
pub mod remote_fs;
pub mod scp;
pub mod transport;

#[cfg(test)]
mod fake;

pub use config::{AuthMethod, HostKeyPolicy, Signer, TransportConfig, TransportPolicy};
pub use poll::{ping, wait_reachable, Clock, PollPolicy, Prober, SystemClock, TcpProber};
pub use provisioner::{SshProvisioner, DEFAULT_REBOOT_COMMAND};
pub use scp::DEFAULT_UPLOAD_MODE;
pub use transport::{CommandOutput, Connector, Ssh2Connector, Ssh2Transport, Transport};
