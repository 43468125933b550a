//! CLI execution and command dispatch logic.
//!
//! Keeps [`main`] minimal by providing a single entry point that loads the
//! build database and hands each subcommand to the link orchestrator or the
//! native build mirror.

pub mod process;

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::cli::{Cli, Commands};
use crate::database::BuildDatabase;
use crate::linker::{BitcodeIndex, FileOutcome, Orchestrator};
use crate::native::NativeBuilder;
use crate::paths;
use crate::project::{ProjectContext, Toolchain};
use crate::runner::process::NinjaRunner;
use crate::stubs::StubRegistry;

/// Execute the parsed [`Cli`] commands.
///
/// # Errors
///
/// Returns an error when the records cannot be loaded or the requested
/// operation fails.
#[expect(
    clippy::print_stdout,
    reason = "the target listing is this command's user-facing output"
)]
pub fn run(cli: &Cli) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Commands::Link {
        file: None,
        target: None,
    });
    let project = ProjectContext::new(cli.project.clone(), cli.record_dir(), cli.out_dir());
    let db = BuildDatabase::load(project).context("loading build records")?;
    match command {
        Commands::Link { file, target } => run_link(cli, &db, file.as_deref(), target.as_deref()),
        Commands::Native { file, test, emit } => {
            run_native(cli, &db, &file, test.as_deref(), emit.as_deref())
        }
        Commands::Targets => {
            for target in db.all_targets() {
                let marker = if target.is_root() { "  (root)" } else { "" };
                println!("{}{marker}", target.output);
            }
            Ok(())
        }
    }
}

fn make_runner(cli: &Cli) -> NinjaRunner {
    let timeout = cli.timeout.map(Duration::from_secs);
    cli.ninja.clone().map_or_else(
        || NinjaRunner::from_env(cli.jobs, timeout),
        |program| NinjaRunner::new(program, cli.jobs, timeout),
    )
}

fn make_stub_registry(db: &BuildDatabase) -> StubRegistry {
    let mut registry = StubRegistry::new();
    let stub_dir = db.project().out_dir.join("stubs");
    if stub_dir.as_std_path().is_dir() {
        registry.scan_directory(&stub_dir);
    }
    registry
}

#[expect(
    clippy::print_stdout,
    reason = "per-file outcomes are this command's user-facing output"
)]
fn run_link(
    cli: &Cli,
    db: &BuildDatabase,
    file: Option<&Utf8Path>,
    target: Option<&Utf8Path>,
) -> Result<()> {
    let registry = make_stub_registry(db);
    let bitcode = BitcodeIndex::from_database(db);
    let mut orchestrator = Orchestrator::new(
        db,
        &registry,
        bitcode,
        Toolchain::default(),
        make_runner(cli),
        CancelToken::new(),
    );
    match file {
        Some(requested) => {
            let requested = paths::absolutize(requested, &db.project().project_dir);
            let outcome = orchestrator
                .run_for_file(&requested, target)
                .with_context(|| format!("linking {requested}"))?;
            println!("{} {} ({})", requested, outcome.module, outcome.variant);
        }
        None => {
            orchestrator.link_project().context("linking project")?;
            for (source, outcome) in orchestrator.outcomes() {
                match outcome {
                    FileOutcome::Linked(linked) => {
                        println!("{source} {} ({})", linked.module, linked.variant);
                    }
                    FileOutcome::Broken { reason } => {
                        println!("{source} broken: {reason}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "the emitted script path is this command's user-facing output"
)]
fn run_native(
    cli: &Cli,
    db: &BuildDatabase,
    file: &Utf8Path,
    test: Option<&Utf8Path>,
    emit: Option<&Utf8Path>,
) -> Result<()> {
    let toolchain = Toolchain::default();
    let cancel = CancelToken::new();
    let mut builder = NativeBuilder::new(db, &toolchain, &cancel);
    let source = paths::absolutize(file, &db.project().project_dir);
    let binary = match test {
        Some(test_source) => {
            let test_source = paths::absolutize(test_source, &db.project().project_dir);
            Some(
                builder
                    .emit_test_harness(&source, &test_source)
                    .with_context(|| format!("planning test harness for {source}"))?,
            )
        }
        None => {
            let root = db
                .root_for_source(&source)
                .with_context(|| format!("resolving root target of {source}"))?;
            builder
                .emit_target(&root)
                .with_context(|| format!("planning native build of {root}"))?;
            None
        }
    };
    let graph = builder.finish(binary.as_deref());
    let script = emit.map_or_else(
        || cli.out_dir().join("native").join("build.ninja"),
        Utf8Path::to_path_buf,
    );
    graph
        .write_to(&script)
        .with_context(|| format!("writing {script}"))?;
    println!("{script}");
    Ok(())
}
