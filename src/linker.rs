//! Link orchestration.
//!
//! For a requested source file (or the whole project) the orchestrator
//! selects candidate top-level targets, plans the intermediate-module link
//! bottom-up through the variant algebra, executes the plan with Ninja, and
//! discovers which stand-in symbols the produced module still needs. Failed
//! candidates are recorded and the next one is tried; a file is only marked
//! broken once every candidate has failed.

mod emit;
mod error;
mod symbols;
#[cfg(test)]
mod tests;

pub use emit::{BuildResult, EmitError, LinkPlan};
pub use error::{LinkError, TargetFailure};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::fs;

use crate::cancel::CancelToken;
use crate::database::BuildDatabase;
use crate::paths;
use crate::project::Toolchain;
use crate::runner::process::NinjaRunner;
use crate::stubs::StubSource;
use crate::variant::Variant;

/// Per-compilation-unit intermediate artifacts produced by the separate
/// compilation pass, keyed by source path.
#[derive(Debug, Clone, Default)]
pub struct BitcodeIndex {
    units: IndexMap<Utf8PathBuf, Utf8PathBuf>,
    stubs: IndexMap<Utf8PathBuf, Utf8PathBuf>,
}

impl BitcodeIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every recorded source at its conventional bitcode path, with
    /// the stand-in flavour next to it.
    #[must_use]
    pub fn from_database(db: &BuildDatabase) -> Self {
        let mut index = Self::new();
        for source in db.source_files() {
            let unit = db.bitcode_path(source);
            let stub = paths::add_suffix(&unit, "_stub");
            index.units.insert(source.to_path_buf(), unit);
            index.stubs.insert(source.to_path_buf(), stub);
        }
        index
    }

    /// Register the real bitcode for `source`.
    pub fn insert_unit(&mut self, source: &Utf8Path, bitcode: &Utf8Path) {
        self.units
            .insert(source.to_path_buf(), bitcode.to_path_buf());
    }

    /// Register the stand-in bitcode for `source`.
    pub fn insert_stub(&mut self, source: &Utf8Path, bitcode: &Utf8Path) {
        self.stubs
            .insert(source.to_path_buf(), bitcode.to_path_buf());
    }

    /// The real bitcode for `source`, when recorded.
    #[must_use]
    pub fn unit_for(&self, source: &Utf8Path) -> Option<&Utf8Path> {
        self.units.get(source).map(Utf8PathBuf::as_path)
    }

    /// The stand-in bitcode for `source`, when recorded.
    #[must_use]
    pub fn stub_for(&self, source: &Utf8Path) -> Option<&Utf8Path> {
        self.stubs.get(source).map(Utf8PathBuf::as_path)
    }
}

/// Successful link of one source file through one target.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    /// The target that linked.
    pub target: Utf8PathBuf,
    /// The produced intermediate module.
    pub module: Utf8PathBuf,
    /// Stub composition of the module.
    pub variant: Variant,
    /// The stand-in files actually linked in.
    pub stub_files: IndexSet<Utf8PathBuf>,
}

/// Final status of one source file for this run.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// The file's module was produced.
    Linked(LinkOutcome),
    /// Every candidate target failed; tests for this file are skipped.
    Broken {
        /// Aggregated per-target failure reasons.
        reason: String,
    },
}

/// One generation request's link orchestration state.
pub struct Orchestrator<'a, S: StubSource> {
    db: &'a BuildDatabase,
    stub_source: &'a S,
    bitcode: BitcodeIndex,
    toolchain: Toolchain,
    runner: NinjaRunner,
    cancel: CancelToken,
    resolved: IndexMap<Utf8PathBuf, FileOutcome>,
    tried: IndexSet<Utf8PathBuf>,
    selected_stubs: IndexMap<Utf8PathBuf, IndexSet<Utf8PathBuf>>,
}

impl<'a, S: StubSource> Orchestrator<'a, S> {
    /// Create an orchestrator for one generation request.
    pub fn new(
        db: &'a BuildDatabase,
        stub_source: &'a S,
        bitcode: BitcodeIndex,
        toolchain: Toolchain,
        runner: NinjaRunner,
        cancel: CancelToken,
    ) -> Self {
        Self {
            db,
            stub_source,
            bitcode,
            toolchain,
            runner,
            cancel,
            resolved: IndexMap::new(),
            tried: IndexSet::new(),
            selected_stubs: IndexMap::new(),
        }
    }

    /// Link one source file, trying each candidate target until one
    /// succeeds. All-candidates failure marks the file broken; it is not an
    /// error here.
    ///
    /// # Errors
    ///
    /// Fails on fatal conditions only: graph inconsistency, runner I/O,
    /// cancellation.
    pub fn link_file(
        &mut self,
        source: &Utf8Path,
        target: Option<&Utf8Path>,
    ) -> Result<FileOutcome, LinkError> {
        self.cancel.check()?;
        if !self.resolved.contains_key(source) {
            let candidates = match target {
                Some(explicit) => vec![explicit.to_path_buf()],
                None => self.db.candidate_targets(source)?,
            };
            self.attempt(source, &candidates, false)?;
        }
        Ok(self
            .resolved
            .get(source)
            .cloned()
            .unwrap_or(FileOutcome::Broken {
                reason: "no candidate target links this file".into(),
            }))
    }

    /// Link one source file for a single-file request, where failure is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Additionally fails with [`LinkError::FileFailed`] when every
    /// candidate target failed.
    pub fn run_for_file(
        &mut self,
        source: &Utf8Path,
        target: Option<&Utf8Path>,
    ) -> Result<LinkOutcome, LinkError> {
        match self.link_file(source, target)? {
            FileOutcome::Linked(outcome) => Ok(outcome),
            FileOutcome::Broken { reason } => Err(LinkError::FileFailed {
                file: source.to_path_buf(),
                reason,
            }),
        }
    }

    /// Link every source file in the project, skipping targets already
    /// attempted this run and propagating each success to the sources the
    /// target covers.
    ///
    /// # Errors
    ///
    /// Fails fatally as [`Orchestrator::link_file`] does, and with
    /// [`LinkError::NothingLinked`] when no file linked against any target.
    pub fn link_project(&mut self) -> Result<(), LinkError> {
        let sources: Vec<Utf8PathBuf> = self
            .db
            .source_files()
            .map(Utf8Path::to_path_buf)
            .collect();
        for source in &sources {
            self.cancel.check()?;
            if self.resolved.contains_key(source) {
                continue;
            }
            let candidates = self.db.candidate_targets(source)?;
            self.attempt(source, &candidates, true)?;
        }
        let any_linked = self
            .resolved
            .values()
            .any(|outcome| matches!(outcome, FileOutcome::Linked(_)));
        if any_linked {
            Ok(())
        } else {
            Err(LinkError::NothingLinked)
        }
    }

    /// Per-file outcomes accumulated so far, in resolution order.
    #[must_use]
    pub fn outcomes(&self) -> &IndexMap<Utf8PathBuf, FileOutcome> {
        &self.resolved
    }

    /// The stand-in files selected per target this run.
    #[must_use]
    pub fn selected_stubs(&self) -> &IndexMap<Utf8PathBuf, IndexSet<Utf8PathBuf>> {
        &self.selected_stubs
    }

    fn attempt(
        &mut self,
        source: &Utf8Path,
        candidates: &[Utf8PathBuf],
        skip_tried: bool,
    ) -> Result<(), LinkError> {
        let mut reasons = Vec::new();
        for target in candidates {
            self.cancel.check()?;
            if skip_tried && self.tried.contains(target) {
                continue;
            }
            self.tried.insert(target.clone());
            match self.try_target(target, source)? {
                Ok(outcome) => {
                    self.record_success(source, outcome)?;
                    return Ok(());
                }
                Err(failure) => {
                    tracing::warn!(%failure, "candidate target failed");
                    reasons.push(failure.to_string());
                }
            }
        }
        let reason = if reasons.is_empty() {
            "no candidate target links this file".to_string()
        } else {
            reasons.join("; ")
        };
        tracing::warn!(source = %source, reason, "file marked broken for this run");
        self.resolved
            .insert(source.to_path_buf(), FileOutcome::Broken { reason });
        Ok(())
    }

    fn record_success(
        &mut self,
        source: &Utf8Path,
        outcome: LinkOutcome,
    ) -> Result<(), LinkError> {
        let covered = self.db.source_files_for_target(&outcome.target)?;
        self.resolved
            .insert(source.to_path_buf(), FileOutcome::Linked(outcome.clone()));
        for covered_source in covered {
            self.resolved
                .entry(covered_source)
                .or_insert_with(|| FileOutcome::Linked(outcome.clone()));
        }
        Ok(())
    }

    /// Attempt one candidate target for `source`.
    fn try_target(
        &mut self,
        target: &Utf8Path,
        source: &Utf8Path,
    ) -> Result<Result<LinkOutcome, TargetFailure>, LinkError> {
        let stub_sources = self.stub_source.stub_sources_for(target);
        let mixed_suffix = format!("___{}", paths::mangle(source.file_name().unwrap_or("file")));
        let mut module = match self.plan_and_run(target, &stub_sources, &mixed_suffix, &[])? {
            Ok(module) => module,
            Err(failure) => return Ok(Err(failure)),
        };

        let mut stub_files = IndexSet::new();
        if paths::is_static_library(target) {
            let symbols = symbols::undefined_symbols(&self.toolchain.nm, &module.output)
                .map_err(|err| LinkError::Io {
                    path: module.output.clone(),
                    source: err,
                })?;
            if !symbols.is_empty() {
                stub_files = self.stub_source.stub_files_for_symbols(&symbols);
            }
            if !stub_files.is_empty() {
                let extra: Vec<Utf8PathBuf> = stub_files
                    .iter()
                    .map(|file| {
                        self.bitcode
                            .stub_for(file)
                            .map_or_else(|| self.db.bitcode_path(file), Utf8Path::to_path_buf)
                    })
                    .collect();
                // The module's content must change although no dependency
                // timestamp did.
                if let Err(err) = fs::remove_file(module.output.as_std_path()) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        return Err(LinkError::Io {
                            path: module.output.clone(),
                            source: err,
                        });
                    }
                }
                tracing::info!(
                    target = %target,
                    stubs = stub_files.len(),
                    "re-linking with discovered stand-ins"
                );
                module = match self.plan_and_run(target, &stub_sources, &mixed_suffix, &extra)? {
                    Ok(module) => module,
                    Err(failure) => return Ok(Err(failure)),
                };
            }
        }

        self.selected_stubs
            .insert(target.to_path_buf(), stub_files.clone());
        Ok(Ok(LinkOutcome {
            target: target.to_path_buf(),
            module: module.output,
            variant: module.variant,
            stub_files,
        }))
    }

    /// Plan the module for `target`, write the script, and run it.
    fn plan_and_run(
        &mut self,
        target: &Utf8Path,
        stub_sources: &IndexSet<Utf8PathBuf>,
        mixed_suffix: &str,
        extra_bitcode: &[Utf8PathBuf],
    ) -> Result<Result<BuildResult, TargetFailure>, LinkError> {
        let mut plan = LinkPlan::new(
            self.db,
            &self.bitcode,
            &self.toolchain,
            stub_sources,
            mixed_suffix.to_string(),
            &self.cancel,
        );
        let module = match plan.emit_module(target, extra_bitcode) {
            Ok(module) => module,
            Err(err) => return err.into_failure(target).map(Err),
        };
        let mut graph = plan.into_graph();
        graph.add_default(module.output.clone());

        let out_dir = &self.db.project().out_dir;
        let script = out_dir
            .join("link")
            .join(format!("{}.ninja", paths::mangle(target.file_name().unwrap_or("target"))));
        graph.write_to(&script).map_err(|source| LinkError::Io {
            path: script.clone(),
            source,
        })?;
        let run = self.runner.run(&script, out_dir, &[])?;
        if run.success() {
            Ok(Ok(module))
        } else {
            Ok(Err(TargetFailure {
                target: target.to_path_buf(),
                reason: format!("{}\n{}", run.command, run.output),
            }))
        }
    }
}
