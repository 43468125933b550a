//! End-to-end CLI tests against generated record fixtures.

mod support;

use assert_cmd::Command;
use predicates::prelude::*;

fn relink() -> Command {
    Command::cargo_bin("relink").expect("relink binary")
}

#[test]
fn targets_lists_reconstructed_link_units() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_archive_records(&root);

    relink()
        .args(["--project", root.as_str(), "targets"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("libfoo.a")
                .and(predicate::str::contains("(root)")),
        );
}

#[test]
fn missing_records_fail_with_nonzero_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);

    relink()
        .args(["--project", root.as_str(), "targets"])
        .assert()
        .failure();
}

#[test]
fn link_file_reports_the_produced_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_executable_records(&root);
    let ninja = support::fake_ninja(&root, "exit 0");

    relink()
        .args([
            "--project",
            root.as_str(),
            "--ninja",
            ninja.as_str(),
            "link",
            "--file",
            "a.c",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("app.bc").and(predicate::str::contains("no-stubs")),
        );
}

#[test]
fn failing_build_tool_fails_a_single_file_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_executable_records(&root);
    let ninja = support::fake_ninja(&root, "echo boom >&2\nexit 1");

    relink()
        .args([
            "--project",
            root.as_str(),
            "--ninja",
            ninja.as_str(),
            "link",
            "--file",
            "a.c",
        ])
        .assert()
        .failure();
}

#[test]
fn project_link_prints_a_line_per_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_executable_records(&root);
    let ninja = support::fake_ninja(&root, "exit 0");

    relink()
        .args(["--project", root.as_str(), "--ninja", ninja.as_str(), "link"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.c"));
}
