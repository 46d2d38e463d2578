//! `esxcli` software and module management.

use std::borrow::Cow;
use std::collections::HashMap;

use hostexec_core::{text, CommandRunner, ProvisionError, ProvisionErrorKind, ProvisionResult};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

pub const SOFTWARE_LIST_COMMAND: &str = "esxcli software vib list";
pub const NO_SIG_CHECK_FLAG: &str = "--no-sig-check";

/// Lines of column header printed before the first VIB.
const LIST_HEADER_LINES: usize = 2;
const LIST_FIELDS: usize = 5;

/// One installed VIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareRecord {
    pub name: String,
    pub version: String,
    pub vendor: String,
    /// Acceptance level column.
    pub kind: String,
    pub install_date: String,
}

/// Parsed inventory. Unparseable lines do not abort the listing; they are
/// collected in `issues` next to every record that did parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareListing {
    pub records: Vec<SoftwareRecord>,
    pub issues: Vec<String>,
}

impl SoftwareListing {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    /// All issues joined into one error, if there were any.
    pub fn error(&self) -> Option<ProvisionError> {
        if self.issues.is_empty() {
            None
        } else {
            Some(ProvisionError::parse(self.issues.join("\n")))
        }
    }
}

pub fn parse_software_list(output: &str) -> SoftwareListing {
    let mut listing = SoftwareListing::default();
    for (idx, line) in text::split_lines(output)
        .into_iter()
        .enumerate()
        .skip(LIST_HEADER_LINES)
    {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [name, version, vendor, kind, install_date] => listing.records.push(SoftwareRecord {
                name: name.to_string(),
                version: version.to_string(),
                vendor: vendor.to_string(),
                kind: kind.to_string(),
                install_date: install_date.to_string(),
            }),
            _ => listing.issues.push(format!(
                "line {}: expected {} fields, found {}: '{}'",
                idx + 1,
                LIST_FIELDS,
                fields.len(),
                line
            )),
        }
    }
    listing
}

pub fn install_command(path: &str, verify_signature: bool) -> String {
    let source_flag = if path.to_ascii_lowercase().ends_with(".zip") {
        "-d"
    } else {
        "-v"
    };
    let mut cmd = format!(
        "esxcli software vib install {} {}",
        source_flag,
        shell_escape::unix::escape(Cow::Borrowed(path))
    );
    if !verify_signature {
        cmd.push(' ');
        cmd.push_str(NO_SIG_CHECK_FLAG);
    }
    cmd
}

pub fn module_parameters_command(module: &str, params: &HashMap<String, String>) -> String {
    let mut tokens: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    tokens.sort();
    format!(
        "esxcli system module parameters set -m {} -p \"{}\"",
        shell_escape::unix::escape(Cow::Borrowed(module)),
        tokens.join(" ")
    )
}

pub fn remove_command(name: &str) -> String {
    format!(
        "esxcli software vib remove -n {}",
        shell_escape::unix::escape(Cow::Borrowed(name))
    )
}

pub fn maintenance_mode_command(enabled: bool) -> String {
    format!("esxcli system maintenanceMode set -e {}", enabled)
}

/// ESXi host operations over a command runner.
pub struct EsxCli<'a, R: CommandRunner + ?Sized> {
    runner: &'a mut R,
}

impl<'a, R: CommandRunner + ?Sized> EsxCli<'a, R> {
    pub fn new(runner: &'a mut R) -> Self {
        Self { runner }
    }

    // ── Inventory ───────────────────────────────────────────────────

    /// Installed VIBs. A failed command is an error; unparseable lines are
    /// reported through [`SoftwareListing::error`].
    pub fn software_list(&mut self) -> ProvisionResult<SoftwareListing> {
        let output = self.runner.run(SOFTWARE_LIST_COMMAND)?;
        let listing = parse_software_list(&output);
        if !listing.is_complete() {
            warn!(
                "{} of {} VIB lines could not be parsed",
                listing.issues.len(),
                listing.issues.len() + listing.records.len()
            );
        }
        Ok(listing)
    }

    /// First installed VIB whose name matches `pattern`.
    pub fn find_software_by_name_regex(&mut self, pattern: &str) -> ProvisionResult<SoftwareRecord> {
        let re = Regex::new(pattern).map_err(|e| {
            ProvisionError::new(
                ProvisionErrorKind::InvalidPattern,
                format!("invalid pattern '{}': {}", pattern, e),
            )
        })?;
        let listing = self.software_list()?;
        let found = listing.records.into_iter().find(|r| re.is_match(&r.name));
        match found {
            Some(record) => {
                debug!("'{}' matched {} {}", pattern, record.name, record.version);
                Ok(record)
            }
            None if listing.issues.is_empty() => Err(ProvisionError::not_found(format!(
                "no installed software matches '{}'",
                pattern
            ))),
            None => Err(ProvisionError::not_found(format!(
                "no installed software matches '{}' ({} unparsed lines)",
                pattern,
                listing.issues.len()
            ))),
        }
    }

    // ── Changes ─────────────────────────────────────────────────────

    pub fn install_software(&mut self, path: &str, verify_signature: bool) -> ProvisionResult<String> {
        info!("installing {} (signature check: {})", path, verify_signature);
        self.runner.run(&install_command(path, verify_signature))
    }

    pub fn set_module_parameters(
        &mut self,
        module: &str,
        params: &HashMap<String, String>,
    ) -> ProvisionResult<String> {
        self.runner.run(&module_parameters_command(module, params))
    }

    pub fn remove_software(&mut self, name: &str) -> ProvisionResult<String> {
        info!("removing {}", name);
        self.runner.run(&remove_command(name))
    }

    pub fn set_maintenance_mode(&mut self, enabled: bool) -> ProvisionResult<String> {
        self.runner.run(&maintenance_mode_command(enabled))
    }
}
