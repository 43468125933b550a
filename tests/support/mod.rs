//! Shared fixtures for the CLI integration tests.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// The fixture root as a UTF-8 path.
pub fn utf8_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path())
        .expect("utf8 tempdir")
        .to_path_buf()
}

/// Write a two-unit archive project: `a.c`/`b.c` into `libfoo.a`.
pub fn write_archive_records(root: &Utf8Path) {
    write_records(
        root,
        &json!([
            {"directory": root, "file": "a.c", "arguments": ["cc", "-c", "a.c", "-o", "a.o"]},
            {"directory": root, "file": "b.c", "arguments": ["cc", "-c", "b.c", "-o", "b.o"]},
        ]),
        &json!([
            {"directory": root, "arguments": ["ar", "r", "libfoo.a", "a.o", "b.o"],
             "files": ["a.o", "b.o"]},
        ]),
    );
}

/// Write a single-unit executable project: `a.c` into `app`.
pub fn write_executable_records(root: &Utf8Path) {
    write_records(
        root,
        &json!([
            {"directory": root, "file": "a.c", "arguments": ["cc", "-c", "a.c", "-o", "a.o"]},
        ]),
        &json!([
            {"directory": root, "arguments": ["cc", "-o", "app", "a.o"], "files": ["a.o"]},
        ]),
    );
}

fn write_records(root: &Utf8Path, compile: &serde_json::Value, link: &serde_json::Value) {
    let record_dir = root.join("build");
    fs::create_dir_all(&record_dir).expect("create record dir");
    fs::write(
        record_dir.join("compile_commands.json"),
        serde_json::to_string_pretty(compile).expect("serialize"),
    )
    .expect("write compile record");
    fs::write(
        record_dir.join("link_commands.json"),
        serde_json::to_string_pretty(link).expect("serialize"),
    )
    .expect("write link record");
}

/// Install an executable fake Ninja at `<root>/fake-ninja`.
pub fn fake_ninja(root: &Utf8Path, script: &str) -> Utf8PathBuf {
    let path = root.join("fake-ninja");
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write fake ninja");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake ninja");
    path
}
