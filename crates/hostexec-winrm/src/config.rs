//! WinRM connection settings.

use std::collections::HashMap;
use std::time::Duration;

use hostexec_core::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const DEFAULT_PORT: u16 = 5985;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRmConfig {
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Seconds, applied to each HTTP request and as the WS-Management
    /// operation timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub https: bool,
    /// Skip TLS certificate validation.
    #[serde(default)]
    pub insecure: bool,
}

impl Default for WinRmConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            https: false,
            insecure: false,
        }
    }
}

impl WinRmConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Build from a loosely typed map. Absent or mistyped keys keep their
    /// defaults; blank identity fields surface later when the shell is opened.
    pub fn from_context(context: &HashMap<String, Value>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = context.get("target").and_then(as_text) {
            cfg.target = v;
        }
        if let Some(v) = context.get("port").and_then(as_u64) {
            match u16::try_from(v) {
                Ok(port) => cfg.port = port,
                Err(_) => log::warn!("ignoring out of range WinRM port {}", v),
            }
        }
        if let Some(v) = context.get("username").and_then(as_text) {
            cfg.username = v;
        }
        if let Some(v) = context.get("password").and_then(as_text) {
            cfg.password = v;
        }
        if let Some(v) = context.get("timeout").and_then(as_u64) {
            cfg.timeout_secs = v;
        }
        if let Some(v) = context.get("https").and_then(as_bool) {
            cfg.https = v;
        }
        if let Some(v) = context.get("insecure").and_then(as_bool) {
            cfg.insecure = v;
        }
        cfg
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// ISO 8601 duration for the `OperationTimeout` header.
    pub fn operation_timeout(&self) -> String {
        format!("PT{}S", self.timeout_secs.max(1))
    }

    pub fn endpoint(&self) -> ProvisionResult<Url> {
        let scheme = if self.https { "https" } else { "http" };
        let host = if self.target.contains(':') && !self.target.starts_with('[') {
            format!("[{}]", self.target)
        } else {
            self.target.clone()
        };
        Url::parse(&format!("{}://{}:{}/wsman", scheme, host, self.port)).map_err(|e| {
            ProvisionError::connection(format!("invalid WinRM endpoint for '{}': {}", self.target, e))
        })
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
