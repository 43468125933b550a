//! Native build mirror.
//!
//! Replays the same recursive link-graph traversal as the orchestrator, but
//! produces real, instrumented, runnable artifacts: objects recompile with
//! debug, coverage and sanitizer instrumentation; link steps use the system
//! toolchain; an executable's entry point is renamed so a test harness can
//! drive it. Every step is emitted as a Ninja rule with named `build`,
//! `bin`, `run` and `clean` goals; nothing runs eagerly.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use miette::Diagnostic;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::command::RunCommand;
use crate::database::{BuildDatabase, DatabaseError};
use crate::ninja_gen::{BuildEdge, ScriptGraph};
use crate::paths;
use crate::project::Toolchain;

/// Compile flags forced onto every recompiled unit.
const COMPILE_FLAGS: &[&str] = &["-g", "-fPIC", "-fno-omit-frame-pointer"];
/// Coverage instrumentation, applied to compiles and links.
const COVERAGE_FLAG: &str = "--coverage";
/// Sanitizer instrumentation, applied to compiles and links.
const SANITIZER_FLAGS: &[&str] = &["-fsanitize=address,undefined", "-fno-sanitize-recover=all"];

/// Errors raised while planning the native build.
#[derive(Debug, Error, Diagnostic)]
pub enum NativeError {
    /// The underlying graph query failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    /// The originating request was cancelled.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Planner for one instrumented native build.
pub struct NativeBuilder<'a> {
    db: &'a BuildDatabase,
    toolchain: &'a Toolchain,
    cancel: &'a CancelToken,
    /// Stand-in source replacing the real one, per project source.
    replacements: IndexMap<Utf8PathBuf, Utf8PathBuf>,
    graph: ScriptGraph,
    memo: IndexMap<Utf8PathBuf, Utf8PathBuf>,
    in_progress: IndexSet<Utf8PathBuf>,
    artifacts: Vec<Utf8PathBuf>,
}

impl<'a> NativeBuilder<'a> {
    /// Create a planner over the shared database.
    #[must_use]
    pub fn new(db: &'a BuildDatabase, toolchain: &'a Toolchain, cancel: &'a CancelToken) -> Self {
        Self {
            db,
            toolchain,
            cancel,
            replacements: IndexMap::new(),
            graph: ScriptGraph::new(),
            memo: IndexMap::new(),
            in_progress: IndexSet::new(),
            artifacts: Vec::new(),
        }
    }

    /// Compile `stub_file` in place of `source` wherever the graph needs it.
    pub fn replace_source(&mut self, source: &Utf8Path, stub_file: &Utf8Path) {
        self.replacements
            .insert(source.to_path_buf(), stub_file.to_path_buf());
    }

    /// Plan the instrumented build of `target` and everything below it.
    ///
    /// # Errors
    ///
    /// Fails on graph inconsistency, dependency cycles, or cancellation.
    pub fn emit_target(&mut self, target: &Utf8Path) -> Result<Utf8PathBuf, NativeError> {
        self.build(target)
    }

    /// Plan a runnable instrumented test binary for `source`: its root
    /// target is rebuilt instrumented and exposed as a shared object, the
    /// generated test translation unit is compiled, and both are linked.
    /// Returns the binary path; goals are added on [`NativeBuilder::finish`].
    ///
    /// # Errors
    ///
    /// Fails on graph inconsistency, dependency cycles, or cancellation.
    pub fn emit_test_harness(
        &mut self,
        source: &Utf8Path,
        test_source: &Utf8Path,
    ) -> Result<Utf8PathBuf, NativeError> {
        let root = self.db.root_for_source(source)?;
        let artifact = self.build(&root)?;
        let shared = if paths::is_static_library(&artifact) {
            self.emit_shared_wrapper(&artifact)
        } else {
            artifact
        };

        let project = self.db.project();
        let test_object = paths::replace_extension(&project.out_path(test_source), "o");
        let mut compile = vec![self.toolchain.compiler.clone()];
        compile.extend(instrumented_flags());
        compile.extend([
            "-c".into(),
            test_source.to_string(),
            "-o".into(),
            test_object.to_string(),
        ]);
        self.add_artifact_edge(
            test_object.clone(),
            vec![test_source.to_path_buf()],
            vec![RunCommand::new(compile).to_shell()],
        );

        let binary = project.out_dir.join("tests").join(format!(
            "{}_test",
            paths::mangle(source.file_name().unwrap_or("file"))
        ));
        let mut link = vec![self.toolchain.native_cc.clone()];
        link.extend(instrumented_link_flags());
        link.extend([
            "-o".into(),
            binary.to_string(),
            test_object.to_string(),
            shared.to_string(),
        ]);
        self.add_artifact_edge(
            binary.clone(),
            vec![test_object, shared],
            vec![RunCommand::new(link).to_shell()],
        );
        Ok(binary)
    }

    /// Close the plan: add the `build`, `bin`, `run` and `clean` goals and
    /// return the finished graph. `binary` is the harness to run.
    #[must_use]
    pub fn finish(mut self, binary: Option<&Utf8Path>) -> ScriptGraph {
        self.graph
            .add_edge(BuildEdge::phony("build", self.artifacts.clone()));
        if let Some(binary) = binary {
            self.graph
                .add_edge(BuildEdge::phony("bin", vec![binary.to_path_buf()]));
            let mut run = RunCommand::new(vec![binary.to_string()]);
            run.add_env("ASAN_OPTIONS", "halt_on_error=0:detect_leaks=0");
            run.add_env("UBSAN_OPTIONS", "print_stacktrace=1");
            // "run" is never created on disk, so the goal re-runs each time.
            self.graph.add_edge(BuildEdge::command(
                "run".into(),
                vec![binary.to_path_buf()],
                vec![run.to_shell()],
            ));
        }
        let mut clean = vec!["rm".to_string(), "-rf".to_string()];
        clean.extend(self.artifacts.iter().map(ToString::to_string));
        self.graph.add_edge(BuildEdge::command(
            "clean".into(),
            Vec::new(),
            vec![RunCommand::new(clean).to_shell()],
        ));
        self.graph
    }

    fn add_artifact_edge(
        &mut self,
        output: Utf8PathBuf,
        inputs: Vec<Utf8PathBuf>,
        commands: Vec<String>,
    ) {
        if !self.graph.has_output(&output) {
            self.graph
                .add_edge(BuildEdge::command(output.clone(), inputs, commands));
            self.artifacts.push(output);
        }
    }

    fn build(&mut self, file: &Utf8Path) -> Result<Utf8PathBuf, NativeError> {
        if let Some(hit) = self.memo.get(file) {
            return Ok(hit.clone());
        }
        self.cancel.check()?;
        let artifact = if self.db.has_target(file) {
            self.build_target(file)?
        } else {
            self.build_object(file)?
        };
        self.memo.insert(file.to_path_buf(), artifact.clone());
        Ok(artifact)
    }

    /// Recompile one unit instrumented, substituting its stand-in source
    /// when one is registered.
    fn build_object(&mut self, file: &Utf8Path) -> Result<Utf8PathBuf, NativeError> {
        let info = self.db.unit_info(file)?;
        let mut command = info.command.clone();
        let source = self
            .replacements
            .get(&info.source)
            .cloned()
            .unwrap_or_else(|| info.source.clone());
        command.set_source_path(&source);
        let output = self.db.project().out_path(&info.output);
        command.set_output(&output);
        command.set_opt_level("-O0");
        command.insert_flags_front(instrumented_flags());
        self.add_artifact_edge(
            output.clone(),
            vec![source],
            vec![command.to_shell()],
        );
        Ok(output)
    }

    fn build_target(&mut self, target: &Utf8Path) -> Result<Utf8PathBuf, NativeError> {
        if !self.in_progress.insert(target.to_path_buf()) {
            return Err(DatabaseError::DependencyCycle {
                unit: target.to_path_buf(),
            }
            .into());
        }
        let info = self.db.target_info(target)?.clone();
        let mut deps = Vec::new();
        for file in &info.files {
            if info.installed.contains(file) || file == target {
                continue;
            }
            deps.push(self.build(file)?);
        }
        let output = self.db.project().out_path(target);
        if paths::is_static_library(target) {
            let mut argv = vec![self.toolchain.archiver.clone(), "qc".into(), output.to_string()];
            argv.extend(deps.iter().map(ToString::to_string));
            self.add_artifact_edge(
                output.clone(),
                deps,
                vec![
                    RunCommand::force_remove(&output).to_shell(),
                    RunCommand::new(argv).to_shell(),
                ],
            );
        } else if paths::is_shared_library(target) {
            let mut argv = vec![self.toolchain.native_cc.clone()];
            argv.extend(instrumented_link_flags());
            argv.extend(["-shared".into(), "-o".into(), output.to_string()]);
            argv.extend(deps.iter().map(ToString::to_string));
            self.add_artifact_edge(output.clone(), deps, vec![RunCommand::new(argv).to_shell()]);
        } else {
            // Executables link relocatably and get their entry point renamed
            // so the harness's own main can drive them.
            let mut argv = vec![
                self.toolchain.native_linker.clone(),
                "-r".into(),
                "-o".into(),
                output.to_string(),
            ];
            argv.extend(deps.iter().map(ToString::to_string));
            let redefine = RunCommand::new(vec![
                self.toolchain.objcopy.clone(),
                "--redefine-sym".into(),
                "main=main__".into(),
                output.to_string(),
            ]);
            self.add_artifact_edge(
                output.clone(),
                deps,
                vec![RunCommand::new(argv).to_shell(), redefine.to_shell()],
            );
        }
        self.in_progress.shift_remove(target);
        Ok(output)
    }

    /// Expose an instrumented static library through a synthesized shared
    /// object, so one test binary links once and is reused across many
    /// generated test translation units.
    fn emit_shared_wrapper(&mut self, archive: &Utf8Path) -> Utf8PathBuf {
        let shared = paths::replace_extension(archive, "so");
        let mut argv = vec![self.toolchain.native_cc.clone()];
        argv.extend(instrumented_link_flags());
        argv.extend([
            "-shared".into(),
            "-o".into(),
            shared.to_string(),
            "-Wl,--whole-archive".into(),
            archive.to_string(),
            "-Wl,--no-whole-archive".into(),
        ]);
        self.add_artifact_edge(
            shared.clone(),
            vec![archive.to_path_buf()],
            vec![RunCommand::new(argv).to_shell()],
        );
        shared
    }
}

fn instrumented_flags() -> Vec<String> {
    let mut flags: Vec<String> = COMPILE_FLAGS.iter().map(ToString::to_string).collect();
    flags.push(COVERAGE_FLAG.into());
    flags.extend(SANITIZER_FLAGS.iter().map(ToString::to_string));
    flags
}

fn instrumented_link_flags() -> Vec<String> {
    let mut flags = vec![COVERAGE_FLAG.to_string()];
    flags.extend(SANITIZER_FLAGS.iter().map(ToString::to_string));
    flags
}
