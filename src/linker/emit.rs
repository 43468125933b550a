//! Recursive build-step emission for intermediate modules.
//!
//! A [`LinkPlan`] walks a target's dependency graph bottom-up, resolving
//! object files to already-produced bitcode, merging variants, applying the
//! suffix policy, and appending archive or relocatable-link edges to a Ninja
//! script graph. Nothing runs here; the caller executes the finished graph.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use miette::Diagnostic;
use thiserror::Error;

use super::error::{LinkError, TargetFailure};
use super::BitcodeIndex;
use crate::cancel::{CancelToken, Cancelled};
use crate::command::RunCommand;
use crate::database::{BuildDatabase, DatabaseError, TargetInfo};
use crate::ninja_gen::{BuildEdge, ScriptGraph};
use crate::paths;
use crate::project::Toolchain;
use crate::variant::Variant;

/// Output path and variant of one recursive build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Path of the produced (or planned) artifact.
    pub output: Utf8PathBuf,
    /// Stub composition of the artifact.
    pub variant: Variant,
}

/// Errors raised while planning one candidate target.
#[derive(Debug, Error, Diagnostic)]
pub enum EmitError {
    /// A compilation unit has no recorded intermediate artifact.
    #[error("no intermediate artifact recorded for {file}")]
    #[diagnostic(code(relink::linker::missing_bitcode))]
    MissingBitcode {
        /// The source file lacking bitcode.
        file: Utf8PathBuf,
    },

    /// A link unit aggregated no buildable inputs, so no variant exists.
    /// A traversal bug, not a data condition.
    #[error("link unit {target} has no buildable inputs")]
    #[diagnostic(code(relink::linker::empty_target))]
    EmptyTarget {
        /// The link unit whose dependency walk produced nothing.
        target: Utf8PathBuf,
    },

    /// The underlying graph query failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    /// The originating request was cancelled.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cancelled(#[from] Cancelled),
}

impl EmitError {
    /// Split into a recoverable per-target failure or a fatal error.
    pub(super) fn into_failure(self, target: &Utf8Path) -> Result<TargetFailure, LinkError> {
        match self {
            Self::MissingBitcode { .. }
            | Self::Database(
                DatabaseError::UnknownUnit { .. }
                | DatabaseError::UnknownTarget { .. }
                | DatabaseError::UnlinkedObject { .. },
            ) => Ok(TargetFailure {
                target: target.to_path_buf(),
                reason: self.to_string(),
            }),
            Self::EmptyTarget { .. } => Err(LinkError::Plan(self)),
            Self::Database(fatal) => Err(LinkError::Database(fatal)),
            Self::Cancelled(cancelled) => Err(LinkError::Cancelled(cancelled)),
        }
    }
}

/// One planning pass over a candidate target.
pub struct LinkPlan<'a> {
    db: &'a BuildDatabase,
    bitcode: &'a BitcodeIndex,
    toolchain: &'a Toolchain,
    stub_sources: &'a IndexSet<Utf8PathBuf>,
    mixed_suffix: String,
    cancel: &'a CancelToken,
    graph: ScriptGraph,
    memo: IndexMap<Utf8PathBuf, BuildResult>,
    in_progress: IndexSet<Utf8PathBuf>,
}

impl<'a> LinkPlan<'a> {
    pub(super) fn new(
        db: &'a BuildDatabase,
        bitcode: &'a BitcodeIndex,
        toolchain: &'a Toolchain,
        stub_sources: &'a IndexSet<Utf8PathBuf>,
        mixed_suffix: String,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            db,
            bitcode,
            toolchain,
            stub_sources,
            mixed_suffix,
            cancel,
            graph: ScriptGraph::new(),
            memo: IndexMap::new(),
            in_progress: IndexSet::new(),
        }
    }

    /// Plan the full intermediate module for `target`, including the extra
    /// whole-archive relocatable link for static-library targets.
    /// `extra_bitcode` is appended to that final link (the stand-in pass).
    pub(super) fn emit_module(
        &mut self,
        target: &Utf8Path,
        extra_bitcode: &[Utf8PathBuf],
    ) -> Result<BuildResult, EmitError> {
        let base = self.build(target)?;
        if !paths::is_static_library(target) {
            return Ok(base);
        }
        let module = paths::add_suffix(&paths::replace_extension(&base.output, "bc"), "_root");
        let mut argv = vec![self.toolchain.linker.clone()];
        argv.extend(self.toolchain.gold_options());
        argv.extend([
            "--relocatable".into(),
            "-o".into(),
            module.to_string(),
            "--whole-archive".into(),
            base.output.to_string(),
            "--no-whole-archive".into(),
        ]);
        argv.extend(extra_bitcode.iter().map(ToString::to_string));
        let mut inputs = vec![base.output.clone()];
        inputs.extend(extra_bitcode.iter().cloned());
        self.graph.add_edge(BuildEdge::command(
            module.clone(),
            inputs,
            vec![RunCommand::new(argv).to_shell()],
        ));
        Ok(BuildResult {
            output: module,
            variant: base.variant,
        })
    }

    /// The planned script graph.
    pub(super) fn into_graph(self) -> ScriptGraph {
        self.graph
    }

    /// Memoized recursive build step.
    pub(super) fn build(&mut self, file: &Utf8Path) -> Result<BuildResult, EmitError> {
        if let Some(hit) = self.memo.get(file) {
            return Ok(hit.clone());
        }
        self.cancel.check()?;
        let result = if self.db.has_target(file) {
            self.build_target(file)?
        } else {
            self.build_object(file)?
        };
        self.memo.insert(file.to_path_buf(), result.clone());
        Ok(result)
    }

    /// Leaf step: an object resolves to already-available bitcode, real or
    /// stand-in depending on the substitution set.
    fn build_object(&self, file: &Utf8Path) -> Result<BuildResult, EmitError> {
        let info = self.db.unit_info(file)?;
        let (lookup, variant) = if self.stub_sources.contains(&info.source) {
            (self.bitcode.stub_for(&info.source), Variant::AllStubs)
        } else {
            (self.bitcode.unit_for(&info.source), Variant::NoStubs)
        };
        let output = lookup.ok_or_else(|| EmitError::MissingBitcode {
            file: info.source.clone(),
        })?;
        Ok(BuildResult {
            output: output.to_path_buf(),
            variant,
        })
    }

    fn build_target(&mut self, target: &Utf8Path) -> Result<BuildResult, EmitError> {
        if !self.in_progress.insert(target.to_path_buf()) {
            return Err(DatabaseError::DependencyCycle {
                unit: target.to_path_buf(),
            }
            .into());
        }
        let info = self.db.target_info(target)?.clone();
        let mut resolved: Vec<(Utf8PathBuf, BuildResult)> = Vec::new();
        let mut variant: Option<Variant> = None;
        for file in &info.files {
            if info.installed.contains(file) || file == target {
                continue;
            }
            let result = self.build(file)?;
            variant = Some(Variant::merge(variant, result.variant));
            resolved.push((file.clone(), result));
        }
        let Some(variant) = variant else {
            self.in_progress.shift_remove(target);
            return Err(EmitError::EmptyTarget {
                target: target.to_path_buf(),
            });
        };
        let result = if paths::is_static_library(target) {
            self.emit_archive(&info, &resolved, variant)
        } else {
            self.emit_link(&info, &resolved, variant)
        };
        self.in_progress.shift_remove(target);
        Ok(result)
    }

    /// Library step: archive the resolved member bitcode, translating the
    /// recorded command's dependency arguments to their resolved paths.
    fn emit_archive(
        &mut self,
        info: &TargetInfo,
        resolved: &[(Utf8PathBuf, BuildResult)],
        variant: Variant,
    ) -> BuildResult {
        let output = variant.apply_suffix(
            &self.db.project().out_path(&info.output),
            &self.mixed_suffix,
        );
        let command = info.command().cloned().map_or_else(
            || {
                let mut argv = vec![self.toolchain.archiver.clone()];
                argv.extend(self.toolchain.archiver_plugin());
                argv.extend(["qc".into(), output.to_string()]);
                argv.extend(resolved.iter().map(|(_, r)| r.output.to_string()));
                RunCommand::new(argv).to_shell()
            },
            |mut command| {
                command.set_tool(&self.toolchain.archiver);
                if let Some(plugin) = self.toolchain.archiver_plugin() {
                    command.insert_flags_front([plugin]);
                }
                for (original, result) in resolved {
                    command.replace_argument(original, &result.output);
                }
                command.set_output(&output);
                command.to_shell()
            },
        );
        if !self.graph.has_output(&output) {
            let inputs = resolved.iter().map(|(_, r)| r.output.clone()).collect();
            self.graph.add_edge(BuildEdge::command(
                output.clone(),
                inputs,
                vec![RunCommand::force_remove(&output).to_shell(), command],
            ));
        }
        BuildResult { output, variant }
    }

    /// Executable / shared-object step: a relocatable whole-program link of
    /// the resolved dependencies into an intermediate module.
    fn emit_link(
        &mut self,
        info: &TargetInfo,
        resolved: &[(Utf8PathBuf, BuildResult)],
        variant: Variant,
    ) -> BuildResult {
        let base = paths::replace_extension(&self.db.project().out_path(&info.output), "bc");
        let output = variant.apply_suffix(&base, &self.mixed_suffix);
        // Objects first, then libraries whole-archive, so archive members
        // never shadow the requested object code.
        let (libraries, objects): (Vec<_>, Vec<_>) = resolved
            .iter()
            .partition(|(_, r)| paths::is_static_library(&r.output));
        let mut argv = vec![self.toolchain.linker.clone()];
        argv.extend(self.toolchain.gold_options());
        argv.extend(["--relocatable".into(), "-o".into(), output.to_string()]);
        argv.extend(objects.iter().map(|(_, r)| r.output.to_string()));
        for (_, result) in &libraries {
            argv.extend([
                "--whole-archive".into(),
                result.output.to_string(),
                "--no-whole-archive".into(),
            ]);
        }
        if !self.graph.has_output(&output) {
            let inputs = resolved.iter().map(|(_, r)| r.output.clone()).collect();
            self.graph.add_edge(BuildEdge::command(
                output.clone(),
                inputs,
                vec![RunCommand::new(argv).to_shell()],
            ));
        }
        BuildResult { output, variant }
    }
}
