//! # hostexec – WinRM
//!
//! Remote PowerShell over WS-Management.
//!
//! ## Modules
//!
//! - **config**: Endpoint settings, builder and context-map loading
//! - **auth**: Basic and NTLMv2 HTTP authentication
//! - **transport**: `ShellTransport` seam and the SOAP/HTTP implementation
//! - **classify**: Connection failure classification
//! - **copy**: Chunked file copy with shell recycling
//! - **client**: Session client (init, execute, upload, destroy)

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod copy;
pub mod transport;

#[cfg(test)]
mod fake;

pub use auth::{AuthScheme, NtlmAuth};
pub use classify::{classify_error, ConnectionFailure};
pub use client::{WinRmClient, FAIL_MARKER, SUCCESS_MARKER};
pub use config::{WinRmConfig, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
pub use copy::{FileCopier, CHUNK_SIZE, MAX_OPERATIONS_PER_SHELL};
pub use tokio_util::sync::CancellationToken;
pub use transport::{powershell_args, ShellOutput, ShellTransport, WinRmTransport};
