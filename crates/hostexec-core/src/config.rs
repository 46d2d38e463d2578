//! Management endpoint settings.
//!
//! Explicit values win; anything left unset is read from the `STORAGE_*`
//! environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};

pub const ENV_HOST: &str = "STORAGE_HOST";
pub const ENV_USERNAME: &str = "STORAGE_USERNAME";
pub const ENV_PASSWORD: &str = "STORAGE_PASSWORD";
pub const ENV_INSECURE: &str = "STORAGE_INSECURE";
pub const ENV_USE_CERTS: &str = "STORAGE_USE_CERTS";
pub const ENV_API_VERSION: &str = "STORAGE_API_VERSION";

/// Caller-supplied values, every field optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure: Option<bool>,
    #[serde(default)]
    pub use_certs: Option<bool>,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub host: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub insecure: bool,
    pub use_certs: bool,
    pub api_version: Option<String>,
}

impl ProviderConfig {
    /// Resolve against the process environment.
    pub fn resolve(settings: &ProviderSettings) -> ProvisionResult<Self> {
        Self::resolve_with(settings, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary lookup.
    pub fn resolve_with<F>(settings: &ProviderSettings, lookup: F) -> ProvisionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |explicit: &Option<String>, key: &str| -> Option<String> {
            explicit
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(key).filter(|v| !v.is_empty()))
        };
        let flag = |explicit: Option<bool>, key: &str| -> bool {
            explicit.unwrap_or_else(|| lookup(key).map(|v| parse_flag(key, &v)).unwrap_or(false))
        };

        let host = text(&settings.host, ENV_HOST)
            .ok_or_else(|| missing("host", ENV_HOST))?;
        let username = text(&settings.username, ENV_USERNAME)
            .ok_or_else(|| missing("username", ENV_USERNAME))?;
        let password = text(&settings.password, ENV_PASSWORD)
            .ok_or_else(|| missing("password", ENV_PASSWORD))?;

        Ok(Self {
            host,
            username,
            password,
            insecure: flag(settings.insecure, ENV_INSECURE),
            use_certs: flag(settings.use_certs, ENV_USE_CERTS),
            api_version: text(&settings.api_version, ENV_API_VERSION),
        })
    }
}

fn missing(field: &str, env: &str) -> ProvisionError {
    ProvisionError::missing_credential(format!(
        "{} is not set; configure it explicitly or via {}",
        field, env
    ))
}

fn parse_flag(key: &str, value: &str) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" | "" => false,
        other => {
            log::warn!("{}: unrecognised boolean '{}', treating as false", key, other);
            false
        }
    }
}
