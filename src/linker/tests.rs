use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use rstest::rstest;
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use super::{BitcodeIndex, FileOutcome, LinkError, LinkPlan, Orchestrator};
use crate::cancel::CancelToken;
use crate::database::BuildDatabase;
use crate::project::{ProjectContext, Toolchain};
use crate::record::{CompileEntry, LinkEntry};
use crate::runner::process::NinjaRunner;
use crate::stubs::StubRegistry;
use crate::variant::Variant;

fn compile_entry(file: &str, args: &[&str]) -> CompileEntry {
    serde_json::from_value(json!({"directory": "/p", "file": file, "arguments": args}))
        .expect("compile entry")
}

fn link_entry(args: &[&str], files: &[&str]) -> LinkEntry {
    serde_json::from_value(json!({"directory": "/p", "arguments": args, "files": files}))
        .expect("link entry")
}

fn libfoo_database(out_dir: &Utf8Path) -> BuildDatabase {
    BuildDatabase::from_records(
        ProjectContext::new("/p".into(), "/p/build".into(), out_dir.to_path_buf()),
        vec![
            compile_entry("a.c", &["cc", "-c", "a.c", "-o", "a.o"]),
            compile_entry("b.c", &["cc", "-c", "b.c", "-o", "b.o"]),
        ],
        vec![link_entry(&["ar", "r", "libfoo.a", "a.o", "b.o"], &["a.o", "b.o"])],
    )
    .expect("database")
}

fn fake_tool(dir: &Utf8Path, name: &str, script: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn tempdir_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path()).expect("utf8").to_path_buf()
}

#[rstest]
fn object_resolves_to_real_bitcode_without_stubs() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let bitcode = BitcodeIndex::from_database(&db);
    let toolchain = Toolchain::default();
    let stub_sources = IndexSet::new();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, "___a_c".into(), &cancel);

    let result = plan.build(Utf8Path::new("/p/a.o")).expect("build");
    assert_eq!(result.variant, Variant::NoStubs);
    assert_eq!(result.output, Utf8PathBuf::from("/out/a.bc"));
}

#[rstest]
fn stubbed_member_makes_the_archive_mixed() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let bitcode = BitcodeIndex::from_database(&db);
    let toolchain = Toolchain::default();
    let stub_sources: IndexSet<Utf8PathBuf> = [Utf8PathBuf::from("/p/b.c")].into_iter().collect();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, "___a_c".into(), &cancel);

    let result = plan.build(Utf8Path::new("/p/libfoo.a")).expect("build");
    assert_eq!(result.variant, Variant::AnyStubs);
    assert_eq!(result.output, Utf8PathBuf::from("/out/libfoo___a_c.a"));
    let ninja = plan.into_graph().generate();
    assert!(ninja.contains("/out/b_stub.bc"));
    assert!(ninja.contains("llvm-ar"));
}

#[rstest]
fn all_stub_members_take_the_fixed_suffix() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let bitcode = BitcodeIndex::from_database(&db);
    let toolchain = Toolchain::default();
    let stub_sources: IndexSet<Utf8PathBuf> =
        [Utf8PathBuf::from("/p/a.c"), Utf8PathBuf::from("/p/b.c")]
            .into_iter()
            .collect();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, "___a_c".into(), &cancel);

    let result = plan.build(Utf8Path::new("/p/libfoo.a")).expect("build");
    assert_eq!(result.variant, Variant::AllStubs);
    assert_eq!(result.output, Utf8PathBuf::from("/out/libfoo_stub.a"));
}

#[rstest]
fn library_module_is_a_whole_archive_relocatable_link() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let bitcode = BitcodeIndex::from_database(&db);
    let toolchain = Toolchain::default();
    let stub_sources = IndexSet::new();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, String::new(), &cancel);

    let module = plan
        .emit_module(Utf8Path::new("/p/libfoo.a"), &[])
        .expect("module");
    assert_eq!(module.output, Utf8PathBuf::from("/out/libfoo_root.bc"));
    let ninja = plan.into_graph().generate();
    assert!(ninja.contains("--whole-archive /out/libfoo.a --no-whole-archive"));
    assert!(ninja.contains("--relocatable"));
}

#[rstest]
fn missing_bitcode_is_a_recoverable_failure() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let bitcode = BitcodeIndex::new();
    let toolchain = Toolchain::default();
    let stub_sources = IndexSet::new();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, String::new(), &cancel);

    let err = plan
        .build(Utf8Path::new("/p/libfoo.a"))
        .expect_err("missing bitcode");
    let failure = err
        .into_failure(Utf8Path::new("/p/libfoo.a"))
        .expect("recoverable");
    assert!(failure.reason.contains("/p/a.c"));
}

#[rstest]
fn target_without_buildable_inputs_is_an_internal_error() {
    let db = BuildDatabase::from_records(
        ProjectContext::new("/p".into(), "/p/build".into(), "/out".into()),
        vec![compile_entry("a.c", &["cc", "-c", "a.c", "-o", "a.o"])],
        vec![
            link_entry(&["ar", "r", "libfoo.a", "a.o"], &["a.o"]),
            link_entry(&["cc", "-o", "app", "/usr/lib/libz.a"], &["/usr/lib/libz.a"]),
        ],
    )
    .expect("database");
    let bitcode = BitcodeIndex::from_database(&db);
    let toolchain = Toolchain::default();
    let stub_sources = IndexSet::new();
    let cancel = CancelToken::new();
    let mut plan = LinkPlan::new(&db, &bitcode, &toolchain, &stub_sources, String::new(), &cancel);

    let err = plan
        .build(Utf8Path::new("/p/app"))
        .expect_err("nothing to aggregate");
    let fatal = err
        .into_failure(Utf8Path::new("/p/app"))
        .expect_err("not recoverable");
    assert!(matches!(fatal, LinkError::Plan(_)));
}

/// Two root executables share `a.c`; the first candidate references a source
/// with no recorded bitcode and must fail, leaving the second candidate's
/// module as the file's result.
#[rstest]
fn later_candidate_wins_after_earlier_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = tempdir_path(&dir);
    let db = BuildDatabase::from_records(
        ProjectContext::new("/p".into(), "/p/build".into(), out.clone()),
        vec![
            compile_entry("a.c", &["cc", "-c", "a.c", "-o", "a.o"]),
            compile_entry("c.c", &["cc", "-c", "c.c", "-o", "c.o"]),
        ],
        vec![
            link_entry(&["cc", "-o", "first", "a.o", "c.o"], &["a.o", "c.o"]),
            link_entry(&["cc", "-o", "second", "a.o"], &["a.o"]),
        ],
    )
    .expect("database");

    // Only a.c has bitcode, so "first" fails on c.c.
    let mut bitcode = BitcodeIndex::new();
    bitcode.insert_unit(Utf8Path::new("/p/a.c"), Utf8Path::new("/out/a.bc"));

    let ninja = fake_tool(&out, "fake-ninja", "exit 0");
    let runner = NinjaRunner::new(ninja, None, None);
    let registry = StubRegistry::new();
    let mut orchestrator = Orchestrator::new(
        &db,
        &registry,
        bitcode,
        Toolchain::default(),
        runner,
        CancelToken::new(),
    );

    let outcome = orchestrator
        .run_for_file(Utf8Path::new("/p/a.c"), None)
        .expect("second candidate links");
    assert_eq!(outcome.target, Utf8PathBuf::from("/p/second"));
    assert_eq!(outcome.variant, Variant::NoStubs);
    assert!(outcome.module.as_str().contains("second"));
    assert!(!outcome.module.as_str().contains("first"));
}

#[rstest]
fn failing_build_tool_marks_the_file_broken() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = tempdir_path(&dir);
    let db = BuildDatabase::from_records(
        ProjectContext::new("/p".into(), "/p/build".into(), out.clone()),
        vec![compile_entry("a.c", &["cc", "-c", "a.c", "-o", "a.o"])],
        vec![link_entry(&["cc", "-o", "app", "a.o"], &["a.o"])],
    )
    .expect("database");

    let ninja = fake_tool(&out, "fake-ninja", "echo boom >&2\nexit 1");
    let runner = NinjaRunner::new(ninja, None, None);
    let registry = StubRegistry::new();
    let mut orchestrator = Orchestrator::new(
        &db,
        &registry,
        BitcodeIndex::from_database(&db),
        Toolchain::default(),
        runner,
        CancelToken::new(),
    );

    let outcome = orchestrator
        .link_file(Utf8Path::new("/p/a.c"), None)
        .expect("broken is not fatal");
    match outcome {
        FileOutcome::Broken { reason } => assert!(reason.contains("boom")),
        FileOutcome::Linked(_) => panic!("expected a broken file"),
    }
    let err = orchestrator
        .run_for_file(Utf8Path::new("/p/a.c"), None)
        .expect_err("single-file mode escalates");
    assert!(matches!(err, LinkError::FileFailed { .. }));
}

#[rstest]
fn project_mode_propagates_success_to_covered_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = tempdir_path(&dir);
    let db = BuildDatabase::from_records(
        ProjectContext::new("/p".into(), "/p/build".into(), out.clone()),
        vec![
            compile_entry("a.c", &["cc", "-c", "a.c", "-o", "a.o"]),
            compile_entry("b.c", &["cc", "-c", "b.c", "-o", "b.o"]),
        ],
        vec![link_entry(&["cc", "-o", "app", "a.o", "b.o"], &["a.o", "b.o"])],
    )
    .expect("database");

    let ninja = fake_tool(&out, "fake-ninja", "exit 0");
    let runner = NinjaRunner::new(ninja, None, None);
    let registry = StubRegistry::new();
    let mut orchestrator = Orchestrator::new(
        &db,
        &registry,
        BitcodeIndex::from_database(&db),
        Toolchain::default(),
        runner,
        CancelToken::new(),
    );

    orchestrator.link_project().expect("project links");
    let outcomes = orchestrator.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .values()
            .all(|outcome| matches!(outcome, FileOutcome::Linked(_)))
    );
}

#[rstest]
fn cancelled_token_aborts_the_run() {
    let db = libfoo_database(Utf8Path::new("/out"));
    let registry = StubRegistry::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut orchestrator = Orchestrator::new(
        &db,
        &registry,
        BitcodeIndex::from_database(&db),
        Toolchain::default(),
        NinjaRunner::new("ninja".into(), None, None),
        cancel,
    );
    let err = orchestrator.link_project().expect_err("cancelled");
    assert!(matches!(err, LinkError::Cancelled(_)));
}
