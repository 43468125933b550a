//! CLI tests for the native build-script emission path.

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn relink() -> Command {
    Command::cargo_bin("relink").expect("relink binary")
}

#[test]
fn native_emits_an_instrumented_script_for_the_root_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_archive_records(&root);
    let script = root.join("native.ninja");

    relink()
        .args([
            "--project",
            root.as_str(),
            "native",
            "--file",
            "a.c",
            "--emit",
            script.as_str(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("native.ninja"));

    let ninja = fs::read_to_string(&script).expect("script written");
    assert!(ninja.contains("rule sh"));
    assert!(ninja.contains("--coverage"));
    assert!(ninja.contains("-fsanitize=address,undefined"));
    assert!(ninja.contains("build build: phony"));
    assert!(ninja.contains("build clean: sh"));
}

#[test]
fn native_with_a_test_unit_plans_a_runnable_harness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_archive_records(&root);
    let script = root.join("native.ninja");

    relink()
        .args([
            "--project",
            root.as_str(),
            "native",
            "--file",
            "a.c",
            "--test",
            "tests/a_test.cpp",
            "--emit",
            script.as_str(),
        ])
        .assert()
        .success();

    let ninja = fs::read_to_string(&script).expect("script written");
    assert!(ninja.contains("libfoo.so"));
    assert!(ninja.contains("a_c_test"));
    assert!(ninja.contains("build run: sh"));
    assert!(ninja.contains("ASAN_OPTIONS="));
}

#[test]
fn executables_get_a_redefined_entry_point() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = support::utf8_root(&dir);
    support::write_executable_records(&root);
    let script = root.join("native.ninja");

    relink()
        .args([
            "--project",
            root.as_str(),
            "native",
            "--file",
            "a.c",
            "--emit",
            script.as_str(),
        ])
        .assert()
        .success();

    let ninja = fs::read_to_string(&script).expect("script written");
    assert!(ninja.contains("--redefine-sym main=main__"));
}
