//! Output formatting for CLI results
//!
//! Three formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only
//!
//! Payloads (exported keys, envelopes, introductions, decrypted messages) are
//! written separately by the commands; this module only reports on them.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cipherchat_core::{IdentityMetadata, PublicKeyRecord};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    /// Whether the operation was successful
    pub success: bool,
    /// The response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error code (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<&'static str>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Command that was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    /// Create a successful response with command context
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            exit_code: None,
            timestamp: Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    /// Create an error response
    pub fn error(message: &str, code: ExitCode) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            exit_code: Some(code.name()),
            timestamp: Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// An own identity as shown to the user.
#[derive(Debug, Serialize)]
pub struct IdentityOutput {
    pub handle: String,
    pub fingerprint: String,
    pub algorithm: String,
    pub modulus_bits: usize,
    pub created_at: String,
}

impl From<&IdentityMetadata> for IdentityOutput {
    fn from(meta: &IdentityMetadata) -> Self {
        Self {
            handle: meta.handle.to_string(),
            fingerprint: meta.fingerprint.clone(),
            algorithm: meta.algorithm.clone(),
            modulus_bits: meta.modulus_bits,
            created_at: meta.created_at.to_rfc3339(),
        }
    }
}

/// An imported public key as shown to the user.
#[derive(Debug, Serialize)]
pub struct ImportedOutput {
    pub handle: String,
    pub fingerprint: String,
    pub imported_at: String,
}

impl From<&PublicKeyRecord> for ImportedOutput {
    fn from(record: &PublicKeyRecord) -> Self {
        Self {
            handle: record.handle.to_string(),
            fingerprint: record.fingerprint(),
            imported_at: record.imported_at.to_rfc3339(),
        }
    }
}

/// Everything `list` reports.
#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub identities: Vec<IdentityOutput>,
    pub imported: Vec<ImportedOutput>,
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Get the current output format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    /// Format a single identity
    pub fn format_identity(&self, meta: &IdentityMetadata, command: &str) -> String {
        match self.format {
            OutputFormat::Table => identity_table(meta),
            OutputFormat::Json => to_json_response(&IdentityOutput::from(meta), command),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format an imported key
    pub fn format_imported(&self, record: &PublicKeyRecord, command: &str) -> String {
        match self.format {
            OutputFormat::Table => imported_table(record),
            OutputFormat::Json => to_json_response(&ImportedOutput::from(record), command),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format identities and imported keys
    pub fn format_list(&self, identities: &[IdentityMetadata], imported: &[PublicKeyRecord]) -> String {
        match self.format {
            OutputFormat::Table => list_table(identities, imported),
            OutputFormat::Json => to_json_response(
                &ListOutput {
                    identities: identities.iter().map(IdentityOutput::from).collect(),
                    imported: imported.iter().map(ImportedOutput::from).collect(),
                },
                "list",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format a generic success result
    pub fn format_success<T: Serialize>(&self, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Table | OutputFormat::Quiet => String::new(),
            OutputFormat::Json => to_json_response(data, command),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, message: &str, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {message}"),
            OutputFormat::Json => to_json(&JsonResponse::error(message, code)),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("✓ {message}");
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("⚠ {message}");
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

fn to_json_response<T: Serialize>(value: &T, command: &str) -> String {
    to_json(&JsonResponse::success_with_command(value, command))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn identity_table(meta: &IdentityMetadata) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Handle", meta.handle.as_str()]);
    table.add_row(vec!["Fingerprint", meta.fingerprint.as_str()]);
    table.add_row(vec!["Algorithm", meta.algorithm.as_str()]);
    table.add_row(vec!["Modulus Bits", meta.modulus_bits.to_string().as_str()]);
    table.add_row(vec!["Created At", format_time(meta.created_at).as_str()]);
    table.to_string()
}

fn imported_table(record: &PublicKeyRecord) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Handle", record.handle.as_str()]);
    table.add_row(vec!["Fingerprint", record.fingerprint().as_str()]);
    table.add_row(vec!["Imported At", format_time(record.imported_at).as_str()]);
    table.to_string()
}

fn list_table(identities: &[IdentityMetadata], imported: &[PublicKeyRecord]) -> String {
    if identities.is_empty() && imported.is_empty() {
        return "No keys found.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Handle", "Kind", "Fingerprint", "Since"]);
    for meta in identities {
        table.add_row(vec![
            meta.handle.as_str(),
            "identity",
            meta.fingerprint.as_str(),
            format_time(meta.created_at).as_str(),
        ]);
    }
    for record in imported {
        table.add_row(vec![
            record.handle.as_str(),
            "imported",
            record.fingerprint().as_str(),
            format_time(record.imported_at).as_str(),
        ]);
    }
    table.to_string()
}
