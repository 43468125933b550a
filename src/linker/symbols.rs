//! Unresolved-symbol listing for stand-in discovery.

use camino::Utf8Path;
use std::collections::BTreeSet;
use std::process::Command;

/// Prefixes of symbols belonging to the analysis and runtime infrastructure
/// rather than the project under test.
const INFRASTRUCTURE_PREFIXES: &[&str] = &[
    "klee_",
    "__klee",
    "llvm.",
    "__ubsan",
    "__asan",
    "__msan",
    "__sanitizer",
    "__gcov",
];

/// List the unresolved external symbols of `module` that the project must
/// provide stand-ins for.
///
/// # Errors
///
/// Returns the underlying I/O error when the symbol lister cannot run.
pub fn undefined_symbols(nm: &str, module: &Utf8Path) -> std::io::Result<BTreeSet<String>> {
    let output = Command::new(nm)
        .arg("--undefined-only")
        .arg(module.as_std_path())
        .output()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let symbols = parse_nm_output(&text);
    tracing::debug!(module = %module, count = symbols.len(), "collected unresolved symbols");
    Ok(symbols)
}

/// Parse `nm --undefined-only` output, dropping infrastructure symbols.
fn parse_nm_output(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace().rev();
            let symbol = tokens.next()?;
            (tokens.next() == Some("U")).then(|| symbol.to_string())
        })
        .filter(|symbol| {
            !INFRASTRUCTURE_PREFIXES
                .iter()
                .any(|prefix| symbol.starts_with(prefix))
        })
        .collect()
}
