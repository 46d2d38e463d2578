//! # hostexec – core
//!
//! Types shared by every remote-execution transport.
//!
//! ## Modules
//!
//! - **error**: Error taxonomy and result alias
//! - **text**: Line-splitting convention for command output
//! - **runner**: `CommandRunner` seam and command-log sinks
//! - **diagnostics**: Structured diagnostics built from errors
//! - **config**: Management-endpoint settings resolved from values or environment

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod runner;
pub mod text;

pub use config::{ProviderConfig, ProviderSettings};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{ProvisionError, ProvisionErrorKind, ProvisionResult};
pub use runner::{BufferedLog, CommandLog, CommandRunner, LogRecord, LogSink};
