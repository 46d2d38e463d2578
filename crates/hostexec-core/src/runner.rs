//! Command execution seam and the sinks command traces are written to.

use std::sync::{Arc, Mutex};

use crate::error::ProvisionResult;

/// Anything that can run a shell command on a remote host and hand back its
/// combined output.
///
/// The SSH provisioner implements this; the ESXi layer only ever talks to a
/// `CommandRunner`, so it can be driven by an in-memory fake in tests.
pub trait CommandRunner {
    fn run(&mut self, command: &str) -> ProvisionResult<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &mut T {
    fn run(&mut self, command: &str) -> ProvisionResult<String> {
        (**self).run(command)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn run(&mut self, command: &str) -> ProvisionResult<String> {
        (**self).run(command)
    }
}

/// Destination for command traces and optional raw output.
pub trait CommandLog: Send + Sync {
    fn record(&self, level: log::Level, message: &str);
}

/// Default sink: forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub const TARGET: &'static str = "hostexec::command";

    pub fn shared() -> Arc<dyn CommandLog> {
        Arc::new(LogSink)
    }
}

impl CommandLog for LogSink {
    fn record(&self, level: log::Level, message: &str) {
        log::log!(target: Self::TARGET, level, "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: log::Level,
    pub message: String,
}

/// Collects records in memory, e.g. to attach them to a diagnostic.
#[derive(Debug, Default)]
pub struct BufferedLog {
    records: Mutex<Vec<LogRecord>>,
}

impl BufferedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    pub fn clear(&self) {
        match self.records.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl CommandLog for BufferedLog {
    fn record(&self, level: log::Level, message: &str) {
        let rec = LogRecord {
            level,
            message: message.to_string(),
        };
        match self.records.lock() {
            Ok(mut guard) => guard.push(rec),
            Err(poisoned) => poisoned.into_inner().push(rec),
        }
    }
}
