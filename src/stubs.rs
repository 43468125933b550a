//! Stand-in ("stub") source collaborator.
//!
//! The orchestrator never generates stand-in code itself; it asks a
//! [`StubSource`] which project sources should be replaced for a target and
//! which recorded stand-in files provide a set of unresolved symbols. The
//! default implementation is a registry filled either programmatically or by
//! scanning a directory of previously generated stand-in sources.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use walkdir::WalkDir;

use crate::paths;

/// Supplier of stand-in sources and symbol-to-source lookups.
pub trait StubSource {
    /// Project sources whose compiled output should be substituted when
    /// linking `target`.
    fn stub_sources_for(&self, target: &Utf8Path) -> IndexSet<Utf8PathBuf>;

    /// Recorded stand-in files providing the given unresolved symbols.
    fn stub_files_for_symbols(&self, symbols: &BTreeSet<String>) -> IndexSet<Utf8PathBuf>;
}

/// In-memory stand-in registry.
#[derive(Debug, Clone, Default)]
pub struct StubRegistry {
    per_target: IndexMap<Utf8PathBuf, IndexSet<Utf8PathBuf>>,
    per_symbol: IndexMap<String, Utf8PathBuf>,
}

impl StubRegistry {
    /// An empty registry: nothing is ever substituted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source to substitute when linking `target`.
    pub fn add_target_stub(&mut self, target: &Utf8Path, source: &Utf8Path) {
        self.per_target
            .entry(target.to_path_buf())
            .or_default()
            .insert(source.to_path_buf());
    }

    /// Register a stand-in file as the provider of `symbol`.
    pub fn add_symbol_provider(&mut self, symbol: &str, file: &Utf8Path) {
        self.per_symbol.insert(symbol.to_string(), file.to_path_buf());
    }

    /// Scan a directory of generated stand-in sources, registering each file
    /// as the provider of the symbols encoded in its name. Stand-in files
    /// are named `<mangled original>_<symbol>.c` by the generator; the
    /// trailing component past the last `_` is the symbol.
    pub fn scan_directory(&mut self, dir: &Utf8Path) {
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            if !entry.file_type().is_file() || !paths::is_source_file(path) {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            if let Some((_, symbol)) = stem.rsplit_once('_') {
                self.per_symbol.insert(symbol.to_string(), path.to_path_buf());
            }
        }
        tracing::debug!(dir = %dir, symbols = self.per_symbol.len(), "scanned stand-in directory");
    }
}

impl StubSource for StubRegistry {
    fn stub_sources_for(&self, target: &Utf8Path) -> IndexSet<Utf8PathBuf> {
        self.per_target.get(target).cloned().unwrap_or_default()
    }

    fn stub_files_for_symbols(&self, symbols: &BTreeSet<String>) -> IndexSet<Utf8PathBuf> {
        symbols
            .iter()
            .filter_map(|symbol| self.per_symbol.get(symbol))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn registry_answers_per_target_and_per_symbol() {
        let mut registry = StubRegistry::new();
        registry.add_target_stub(Utf8Path::new("/p/libfoo.a"), Utf8Path::new("/p/b.c"));
        registry.add_symbol_provider("helper", Utf8Path::new("/out/stubs/b_helper.c"));

        let sources = registry.stub_sources_for(Utf8Path::new("/p/libfoo.a"));
        assert!(sources.contains(Utf8Path::new("/p/b.c")));
        assert!(registry.stub_sources_for(Utf8Path::new("/p/other.a")).is_empty());

        let symbols: BTreeSet<String> = ["helper".to_string(), "unknown".to_string()].into();
        let files = registry.stub_files_for_symbols(&symbols);
        assert_eq!(files.len(), 1);
        assert!(files.contains(Utf8Path::new("/out/stubs/b_helper.c")));
    }

    #[rstest]
    fn directory_scan_registers_symbol_providers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8Path::from_path(dir.path()).expect("utf8");
        std::fs::write(root.join("a_helper.c"), "int helper(void);").expect("write");
        std::fs::write(root.join("notes.txt"), "ignored").expect("write");

        let mut registry = StubRegistry::new();
        registry.scan_directory(root);
        let symbols: BTreeSet<String> = ["helper".to_string()].into();
        assert_eq!(registry.stub_files_for_symbols(&symbols).len(), 1);
    }
}
