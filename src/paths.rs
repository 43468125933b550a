//! Path classification and manipulation helpers.
//!
//! The build database reasons about files purely by their paths: whether a
//! token in a recorded command line names a source file, an object file or a
//! library decides which graph node it becomes. Everything here is lexical;
//! nothing touches the filesystem.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// File extensions treated as C/C++ translation units.
const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++"];

/// Return true when `path` names a C/C++ source file.
#[must_use]
pub fn is_source_file(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Return true when `path` names an object file.
#[must_use]
pub fn is_object_file(path: &Utf8Path) -> bool {
    matches!(path.extension(), Some("o" | "obj"))
}

/// Return true when `path` names a static archive.
#[must_use]
pub fn is_static_library(path: &Utf8Path) -> bool {
    path.extension() == Some("a")
}

/// Return true when `path` names a shared object, including versioned names
/// such as `libfoo.so.1.2`.
#[must_use]
pub fn is_shared_library(path: &Utf8Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.ends_with(".so") || name.contains(".so."))
}

/// Return true when `path` names a static or shared library.
#[must_use]
pub fn is_library(path: &Utf8Path) -> bool {
    is_static_library(path) || is_shared_library(path)
}

/// Strip a trailing version from a shared-object name:
/// `libfoo.so.1.2` becomes `libfoo.so`.
#[must_use]
pub fn remove_shared_library_version(path: &Utf8Path) -> Utf8PathBuf {
    let Some(name) = path.file_name() else {
        return path.to_path_buf();
    };
    name.find(".so.").map_or_else(
        || path.to_path_buf(),
        |idx| {
            let (stem, _) = name.split_at(idx);
            path.with_file_name(format!("{stem}.so"))
        },
    )
}

/// Append `suffix` to the file stem, keeping the extension:
/// `libfoo.a` + `_stub` becomes `libfoo_stub.a`.
#[must_use]
pub fn add_suffix(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    if suffix.is_empty() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().unwrap_or_default();
    let name = path.extension().map_or_else(
        || format!("{stem}{suffix}"),
        |ext| format!("{stem}{suffix}.{ext}"),
    );
    path.with_file_name(name)
}

/// Append `extension` after the existing one: `a.cc` + `o` becomes `a.cc.o`.
#[must_use]
pub fn add_extension(path: &Utf8Path, extension: &str) -> Utf8PathBuf {
    path.file_name().map_or_else(
        || path.to_path_buf(),
        |name| path.with_file_name(format!("{name}.{extension}")),
    )
}

/// Replace the extension, or append one when the path has none.
#[must_use]
pub fn replace_extension(path: &Utf8Path, extension: &str) -> Utf8PathBuf {
    path.with_extension(extension)
}

/// Replace every non-alphanumeric character with `_`, for embedding a file
/// name inside another artifact name.
#[must_use]
pub fn mangle(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// consulting the filesystem.
#[must_use]
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve `path` against `directory` when relative, then normalize.
#[must_use]
pub fn absolutize(path: &Utf8Path, directory: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&directory.join(path))
    }
}

/// Decide whether a command-line token should be treated as a file path.
///
/// Flags are never paths. Everything else counts when it carries a known
/// source/object/library extension or contains a path separator.
#[must_use]
pub fn looks_like_file(token: &str) -> bool {
    if token.starts_with('-') {
        return false;
    }
    let path = Utf8Path::new(token);
    token.contains('/')
        || is_source_file(path)
        || is_object_file(path)
        || is_library(path)
}

/// Unique replacement name for an object whose recorded output collided with
/// another producer: `dir/out` compiled from `src/a.c` becomes
/// `dir/out_from_a_c.o`.
#[must_use]
pub fn temporary_object_path(output: &Utf8Path, source: &Utf8Path) -> Utf8PathBuf {
    let source_name = mangle(source.file_name().unwrap_or("source"));
    add_extension(&add_suffix(output, &format!("_from_{source_name}")), "o")
}

/// Longest common prefix of two paths, component-wise.
#[must_use]
pub fn longest_common_prefix(left: &Utf8Path, right: &Utf8Path) -> Utf8PathBuf {
    left.components()
        .zip(right.components())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.c", true)]
    #[case("a.CPP", true)]
    #[case("a.cxx", true)]
    #[case("a.o", false)]
    #[case("a.h", false)]
    fn source_classification(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_source_file(Utf8Path::new(path)), expected);
    }

    #[rstest]
    #[case("libfoo.so", true)]
    #[case("libfoo.so.1.2", true)]
    #[case("libfoo.a", false)]
    fn shared_library_classification(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_shared_library(Utf8Path::new(path)), expected);
    }

    #[rstest]
    fn shared_library_version_is_stripped() {
        let stripped = remove_shared_library_version(Utf8Path::new("/lib/libfoo.so.1.2"));
        assert_eq!(stripped, Utf8PathBuf::from("/lib/libfoo.so"));
    }

    #[rstest]
    #[case("/out/libfoo.a", "_stub", "/out/libfoo_stub.a")]
    #[case("/out/module", "_root", "/out/module_root")]
    #[case("/out/libfoo.a", "", "/out/libfoo.a")]
    fn suffix_is_inserted_before_extension(
        #[case] path: &str,
        #[case] suffix: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(add_suffix(Utf8Path::new(path), suffix), Utf8PathBuf::from(expected));
    }

    #[rstest]
    fn absolutize_resolves_relative_components() {
        let resolved = absolutize(Utf8Path::new("../a.c"), Utf8Path::new("/proj/build"));
        assert_eq!(resolved, Utf8PathBuf::from("/proj/a.c"));
    }

    #[rstest]
    #[case("-O2", false)]
    #[case("a.c", true)]
    #[case("src/util", true)]
    #[case("libfoo.a", true)]
    #[case("r", false)]
    fn file_token_detection(#[case] token: &str, #[case] expected: bool) {
        assert_eq!(looks_like_file(token), expected);
    }

    #[rstest]
    fn temporary_object_name_embeds_source() {
        let tmp = temporary_object_path(Utf8Path::new("/b/app"), Utf8Path::new("/p/a.c"));
        assert_eq!(tmp, Utf8PathBuf::from("/b/app_from_a_c.o"));
    }

    #[rstest]
    fn common_prefix_stops_at_divergence() {
        let prefix =
            longest_common_prefix(Utf8Path::new("/p/build/x"), Utf8Path::new("/p/src/y"));
        assert_eq!(prefix, Utf8PathBuf::from("/p"));
    }
}
