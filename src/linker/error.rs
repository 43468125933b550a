//! Failure taxonomy for orchestration.
//!
//! Per-target failures are values, not errors: the orchestrator always tries
//! the next candidate target before giving up on a file. [`LinkError`] is
//! reserved for conditions no candidate can recover from.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

use super::emit::EmitError;
use crate::cancel::Cancelled;
use crate::database::DatabaseError;
use crate::runner::process::RunnerError;

/// A recoverable failure of one candidate target.
#[derive(Debug, Clone)]
pub struct TargetFailure {
    /// The candidate that failed.
    pub target: Utf8PathBuf,
    /// Human-readable reason, including the failing invocation and its
    /// captured output where one exists.
    pub reason: String,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target {}: {}", self.target, self.reason)
    }
}

/// Fatal orchestration errors.
#[derive(Debug, Error, Diagnostic)]
pub enum LinkError {
    /// The build graph is inconsistent or cyclic.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    /// The build tool could not be supervised.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runner(#[from] RunnerError),

    /// The originating request was cancelled.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cancelled(#[from] Cancelled),

    /// The planner hit an internal inconsistency no candidate can recover
    /// from.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(EmitError),

    /// A generated script or artifact could not be written or removed.
    #[error("cannot write {path}")]
    #[diagnostic(code(relink::linker::io))]
    Io {
        /// The path being manipulated.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Every candidate target failed for every file in the run.
    #[error("no file could be linked against any target")]
    #[diagnostic(code(relink::linker::nothing_linked))]
    NothingLinked,

    /// The single requested file failed against every candidate.
    #[error("cannot link {file}: {reason}")]
    #[diagnostic(code(relink::linker::file_failed))]
    FileFailed {
        /// The requested source file.
        file: Utf8PathBuf,
        /// Aggregated per-target reasons.
        reason: String,
    },
}
