//! Build-graph reconstruction from recorded compile and link commands.
//!
//! The database ingests the two build records once per project and is then
//! shared read-only by the link orchestrator and the native build mirror.
//! Compilation units are built immutably during compile-record ingestion;
//! object-to-target ownership lives in side tables populated during link
//! ingestion, never by patching nodes after the fact.

mod ingest;
mod query;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;

use crate::command::{CommandError, CompileCommand, LinkCommand};
use crate::project::ProjectContext;
use crate::record::{self, RecordError};

/// Errors fatal to database construction or to graph queries.
#[derive(Debug, Error, Diagnostic)]
pub enum DatabaseError {
    /// A build record could not be loaded.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Record(#[from] RecordError),

    /// A recorded command could not be modelled.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Command(#[from] CommandError),

    /// A link entry referenced an object the compilation record never
    /// produced.
    #[error("link unit {target} references {object}, which has no compile command")]
    #[diagnostic(code(relink::database::missing_object))]
    MissingObjectCommand {
        /// The unknown object file.
        object: Utf8PathBuf,
        /// The link unit referencing it.
        target: Utf8PathBuf,
    },

    /// A target referenced a project library with no build command.
    #[error("link unit {target} references library {library}, which has no link command")]
    #[diagnostic(code(relink::database::missing_library))]
    MissingLibraryCommand {
        /// The unknown library.
        library: Utf8PathBuf,
        /// The link unit referencing it.
        target: Utf8PathBuf,
    },

    /// A path resolves to neither a compilation unit nor an object file.
    #[error("{path} is not a known compilation unit")]
    #[diagnostic(code(relink::database::unknown_unit))]
    UnknownUnit {
        /// The unresolved path.
        path: Utf8PathBuf,
    },

    /// A path does not name a known link unit.
    #[error("{path} is not a known link unit")]
    #[diagnostic(code(relink::database::unknown_target))]
    UnknownTarget {
        /// The unresolved path.
        path: Utf8PathBuf,
    },

    /// An object file is never consumed by any link unit.
    #[error("object {object} is not referenced by any link unit")]
    #[diagnostic(code(relink::database::unlinked_object))]
    UnlinkedObject {
        /// The orphaned object file.
        object: Utf8PathBuf,
    },

    /// The reconstructed graph contains a dependency cycle.
    #[error("dependency cycle through link unit {unit}")]
    #[diagnostic(code(relink::database::cycle))]
    DependencyCycle {
        /// The unit that closed the cycle.
        unit: Utf8PathBuf,
    },
}

/// One compilation unit reconstructed from the compile record.
#[derive(Debug, Clone)]
pub struct ObjectFileInfo {
    /// The recorded compile command, normalized.
    pub command: CompileCommand,
    /// Absolute path of the compiled source file.
    pub source: Utf8PathBuf,
    /// Absolute path of the produced object file.
    pub output: Utf8PathBuf,
    /// Output-tree directory for this unit's generated artifacts.
    pub unit_dir: Utf8PathBuf,
}

/// One link unit (library or executable) reconstructed from the link record.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Absolute path of the produced artifact.
    pub output: Utf8PathBuf,
    /// Recorded link commands. Normally one; extras indicate an anomalous
    /// record and the first stays authoritative.
    pub commands: Vec<LinkCommand>,
    /// Direct dependency files, in record order.
    pub files: IndexSet<Utf8PathBuf>,
    /// Subset of `files` not produced by this project.
    pub installed: IndexSet<Utf8PathBuf>,
    /// Link units that consume this one as a library. Empty means root.
    pub parents: Vec<Utf8PathBuf>,
}

impl TargetInfo {
    /// Whether no other link unit consumes this one.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// The authoritative link command.
    #[must_use]
    pub fn command(&self) -> Option<&LinkCommand> {
        self.commands.first()
    }
}

/// The reconstructed build graph of one project.
#[derive(Debug)]
pub struct BuildDatabase {
    project: ProjectContext,
    /// Compilation units keyed by object output path.
    objects: IndexMap<Utf8PathBuf, ObjectFileInfo>,
    /// Object outputs per source, in record order; the first is
    /// authoritative.
    sources: IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    /// Link units keyed by artifact path.
    targets: IndexMap<Utf8PathBuf, TargetInfo>,
    /// Object path to the first link unit referencing it.
    link_units: HashMap<Utf8PathBuf, Utf8PathBuf>,
    /// Object path to every link unit referencing it, in record order.
    object_parents: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
}

impl BuildDatabase {
    /// Load the records from the project's record directory and build the
    /// database.
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] when a record cannot be loaded or the
    /// graph is inconsistent.
    pub fn load(project: ProjectContext) -> Result<Self, DatabaseError> {
        let compile = record::load_compile_record(&project.record_dir)?;
        let link = record::load_link_record(&project.record_dir)?;
        Self::from_records(project, compile, link)
    }

    /// Build the database from already-loaded record entries.
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] when an entry cannot be modelled or the
    /// graph is inconsistent.
    pub fn from_records(
        project: ProjectContext,
        compile: Vec<record::CompileEntry>,
        link: Vec<record::LinkEntry>,
    ) -> Result<Self, DatabaseError> {
        let mut db = Self {
            project,
            objects: IndexMap::new(),
            sources: IndexMap::new(),
            targets: IndexMap::new(),
            link_units: HashMap::new(),
            object_parents: HashMap::new(),
        };
        ingest::ingest_compile_entries(&mut db, compile)?;
        ingest::ingest_link_entries(&mut db, link)?;
        ingest::partition_installed(&mut db);
        ingest::resolve_shared_libraries(&mut db);
        ingest::fill_parents(&mut db)?;
        tracing::info!(
            objects = db.objects.len(),
            targets = db.targets.len(),
            "build database constructed"
        );
        Ok(db)
    }

    /// The project layout this database was built for.
    #[must_use]
    pub fn project(&self) -> &ProjectContext {
        &self.project
    }

    /// Output-tree path of the intermediate bitcode for `file`.
    #[must_use]
    pub fn bitcode_path(&self, file: &Utf8Path) -> Utf8PathBuf {
        self.project.bitcode_path(file)
    }
}
