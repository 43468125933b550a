//! Project layout and tool selection.

use camino::{Utf8Path, Utf8PathBuf};

use crate::paths;

/// Where a project lives and where relink keeps its artifacts.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Root of the project's source tree.
    pub project_dir: Utf8PathBuf,
    /// Directory holding the recorded compile and link commands.
    pub record_dir: Utf8PathBuf,
    /// Directory all produced artifacts are rooted under.
    pub out_dir: Utf8PathBuf,
}

impl ProjectContext {
    /// Create a context with every directory resolved to an absolute,
    /// normalized path.
    #[must_use]
    pub fn new(project_dir: Utf8PathBuf, record_dir: Utf8PathBuf, out_dir: Utf8PathBuf) -> Self {
        Self {
            project_dir: paths::normalize(&project_dir),
            record_dir: paths::normalize(&record_dir),
            out_dir: paths::normalize(&out_dir),
        }
    }

    /// Map a path from the project or build tree into the output tree.
    ///
    /// The path is re-rooted under `out_dir`, keeping everything below the
    /// common prefix of the project and record directories so that build-tree
    /// and source-tree siblings stay distinguishable. Paths outside both
    /// trees keep only their file name.
    #[must_use]
    pub fn out_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        let base = paths::longest_common_prefix(&self.project_dir, &self.record_dir);
        path.strip_prefix(&base).map_or_else(
            |_| self.out_dir.join(path.file_name().unwrap_or_default()),
            |relative| self.out_dir.join(relative),
        )
    }

    /// Output-tree path of the intermediate bitcode for `file`.
    #[must_use]
    pub fn bitcode_path(&self, file: &Utf8Path) -> Utf8PathBuf {
        paths::replace_extension(&self.out_path(file), "bc")
    }
}

/// External tools the generated build scripts invoke.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Compiler used for bitcode and instrumented compilation.
    pub compiler: String,
    /// Archiver understanding bitcode members.
    pub archiver: String,
    /// Linker with the LTO plugin interface.
    pub linker: String,
    /// Symbol lister used for stub discovery.
    pub nm: String,
    /// Object editor used to rename `main` in test binaries.
    pub objcopy: String,
    /// Native compiler driver used for final test-binary links.
    pub native_cc: String,
    /// Native linker used for relocatable executable links.
    pub native_linker: String,
    /// Optional path of the gold LTO plugin, forwarded to archiver and
    /// linker when set.
    pub gold_plugin: Option<Utf8PathBuf>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compiler: "clang".into(),
            archiver: "llvm-ar".into(),
            linker: "ld.gold".into(),
            nm: "llvm-nm".into(),
            objcopy: "objcopy".into(),
            native_cc: "cc".into(),
            native_linker: "ld".into(),
            gold_plugin: None,
        }
    }
}

impl Toolchain {
    /// Gold options enabling bitcode-aware linking, prepended to every
    /// intermediate link.
    #[must_use]
    pub fn gold_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if let Some(plugin) = &self.gold_plugin {
            options.push(format!("--plugin={plugin}"));
        }
        options.extend([
            "-plugin-opt=emit-llvm".into(),
            "--allow-multiple-definition".into(),
        ]);
        options
    }

    /// Archiver plugin flag, when a gold plugin is configured.
    #[must_use]
    pub fn archiver_plugin(&self) -> Option<String> {
        self.gold_plugin
            .as_ref()
            .map(|plugin| format!("--plugin={plugin}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context() -> ProjectContext {
        ProjectContext::new(
            "/work/proj".into(),
            "/work/proj/build".into(),
            "/work/out".into(),
        )
    }

    #[rstest]
    #[case("/work/proj/src/a.c", "/work/out/src/a.c")]
    #[case("/work/proj/build/libfoo.a", "/work/out/build/libfoo.a")]
    #[case("/usr/lib/libz.a", "/work/out/libz.a")]
    fn paths_are_rerooted_under_out(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(
            context().out_path(Utf8Path::new(input)),
            Utf8PathBuf::from(expected)
        );
    }

    #[rstest]
    fn bitcode_path_swaps_extension() {
        assert_eq!(
            context().bitcode_path(Utf8Path::new("/work/proj/src/a.c")),
            Utf8PathBuf::from("/work/out/src/a.bc")
        );
    }

    #[rstest]
    fn gold_options_include_plugin_when_configured() {
        let mut toolchain = Toolchain::default();
        assert_eq!(toolchain.gold_options().len(), 2);
        toolchain.gold_plugin = Some("/usr/lib/LLVMgold.so".into());
        let options = toolchain.gold_options();
        assert_eq!(options.first().map(String::as_str), Some("--plugin=/usr/lib/LLVMgold.so"));
    }
}
