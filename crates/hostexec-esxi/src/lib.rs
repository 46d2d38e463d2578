//! # hostexec – ESXi
//!
//! `esxcli` wrappers for ESXi hosts, driven through any
//! [`CommandRunner`](hostexec_core::CommandRunner) (normally an SSH
//! provisioner).

pub mod esxcli;

pub use esxcli::{parse_software_list, EsxCli, SoftwareListing, SoftwareRecord};
