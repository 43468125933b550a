//! Recorded build commands.
//!
//! A project hands relink two JSON records captured during its real build: a
//! compilation record (one entry per translation unit) and a link record
//! (one entry per produced library or executable). Entries carry either a
//! single `command` string or a pre-split `arguments` array; commands are
//! split with shell rules before ingestion.

use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use serde::Deserialize;
use std::fs;
use thiserror::Error;

/// Name of the compilation record inside the record directory.
pub const COMPILE_RECORD_NAME: &str = "compile_commands.json";
/// Name of the link record inside the record directory.
pub const LINK_RECORD_NAME: &str = "link_commands.json";

/// Errors raised while loading or interpreting a build record.
#[derive(Debug, Error, Diagnostic)]
pub enum RecordError {
    /// A record file was missing or unreadable.
    #[error("cannot read build record {path}")]
    #[diagnostic(code(relink::record::io))]
    Io {
        /// Path of the record file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record file was not valid JSON of the expected shape.
    #[error("cannot parse build record {path}")]
    #[diagnostic(code(relink::record::json))]
    Json {
        /// Path of the record file.
        path: Utf8PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An entry had neither a usable `command` string nor `arguments`.
    #[error("record entry in {directory} has an empty command line")]
    #[diagnostic(code(relink::record::empty_command))]
    EmptyCommand {
        /// Directory of the offending entry.
        directory: Utf8PathBuf,
    },
}

/// Fields shared by compile and link entries: either a shell `command`
/// string or an `arguments` array.
#[derive(Debug, Clone, Deserialize)]
struct RawCommand {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

impl RawCommand {
    fn argv(&self, directory: &Utf8Path) -> Result<Vec<String>, RecordError> {
        let argv = match (&self.arguments, &self.command) {
            (Some(arguments), _) => arguments.clone(),
            (None, Some(command)) => shlex::split(command).unwrap_or_default(),
            (None, None) => Vec::new(),
        };
        if argv.is_empty() {
            return Err(RecordError::EmptyCommand {
                directory: directory.to_path_buf(),
            });
        }
        Ok(argv)
    }
}

/// One compiled translation unit from the compilation record.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileEntry {
    /// Directory the command was executed from.
    pub directory: Utf8PathBuf,
    /// The source (or, for anomalous records, object) file being compiled.
    pub file: Utf8PathBuf,
    #[serde(flatten)]
    raw: RawCommand,
}

impl CompileEntry {
    /// The entry's argument list, splitting a `command` string when needed.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::EmptyCommand`] when the entry carries no
    /// usable arguments.
    pub fn argv(&self) -> Result<Vec<String>, RecordError> {
        self.raw.argv(&self.directory)
    }
}

/// One produced library or executable from the link record.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkEntry {
    /// Directory the command was executed from.
    pub directory: Utf8PathBuf,
    /// The object files and libraries the command consumed.
    #[serde(default)]
    pub files: Vec<Utf8PathBuf>,
    #[serde(flatten)]
    raw: RawCommand,
}

impl LinkEntry {
    /// The entry's argument list, splitting a `command` string when needed.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::EmptyCommand`] when the entry carries no
    /// usable arguments.
    pub fn argv(&self) -> Result<Vec<String>, RecordError> {
        self.raw.argv(&self.directory)
    }
}

fn load<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, RecordError> {
    let text = fs::read_to_string(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| RecordError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the compilation record from `record_dir`.
///
/// # Errors
///
/// Returns a [`RecordError`] when the file is missing or malformed.
pub fn load_compile_record(record_dir: &Utf8Path) -> Result<Vec<CompileEntry>, RecordError> {
    load(&record_dir.join(COMPILE_RECORD_NAME))
}

/// Load the link record from `record_dir`.
///
/// # Errors
///
/// Returns a [`RecordError`] when the file is missing or malformed.
pub fn load_link_record(record_dir: &Utf8Path) -> Result<Vec<LinkEntry>, RecordError> {
    load(&record_dir.join(LINK_RECORD_NAME))
}
