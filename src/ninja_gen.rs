//! Ninja build-script generator.
//!
//! Planned artifacts are collected as build edges and rendered into the
//! textual representation expected by the Ninja build system, which then
//! owns incrementality and scheduling. Every edge runs its shell steps
//! through a single generic rule; edges are emitted in insertion order so
//! the script is deterministic for a given plan.

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use std::fmt::{self, Display, Formatter};
use std::fs;

/// One planned build step: shell commands producing `outputs` from `inputs`.
#[derive(Debug, Clone)]
pub struct BuildEdge {
    /// Files the step produces. A command edge whose output is never
    /// actually created re-runs on every invocation, which is how "run"
    /// goals stay fresh.
    pub outputs: Vec<Utf8PathBuf>,
    /// Files the step depends on.
    pub inputs: Vec<Utf8PathBuf>,
    /// Shell lines executed in order; the edge fails on the first failure.
    pub commands: Vec<String>,
    /// Phony edges only group their inputs under a goal name.
    pub phony: bool,
}

impl BuildEdge {
    /// A command edge with a single output.
    #[must_use]
    pub fn command(
        output: Utf8PathBuf,
        inputs: Vec<Utf8PathBuf>,
        commands: Vec<String>,
    ) -> Self {
        Self {
            outputs: vec![output],
            inputs,
            commands,
            phony: false,
        }
    }

    /// A phony edge aliasing `goal` to `deps`.
    #[must_use]
    pub fn phony(goal: impl Into<Utf8PathBuf>, deps: Vec<Utf8PathBuf>) -> Self {
        Self {
            outputs: vec![goal.into()],
            inputs: deps,
            commands: Vec::new(),
            phony: true,
        }
    }
}

/// An ordered collection of build edges plus default goals.
#[derive(Debug, Clone, Default)]
pub struct ScriptGraph {
    edges: Vec<BuildEdge>,
    defaults: Vec<Utf8PathBuf>,
}

impl ScriptGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one edge.
    pub fn add_edge(&mut self, edge: BuildEdge) {
        self.edges.push(edge);
    }

    /// Whether any edge already produces `output`.
    #[must_use]
    pub fn has_output(&self, output: &Utf8Path) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.outputs.iter().any(|o| o == output))
    }

    /// Mark `goal` as built when Ninja is invoked without arguments.
    pub fn add_default(&mut self, goal: Utf8PathBuf) {
        self.defaults.push(goal);
    }

    /// Render the graph as Ninja build-script text.
    #[must_use]
    pub fn generate(&self) -> String {
        self.to_string()
    }

    /// Render the graph and write it to `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the parent directory cannot be
    /// created or the file cannot be written.
    pub fn write_to(&self, path: &Utf8Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.generate())
    }
}

impl Display for ScriptGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "rule sh")?;
        writeln!(f, "  command = $cmd\n")?;
        for edge in &self.edges {
            write!(f, "{}", DisplayEdge { edge })?;
        }
        if !self.defaults.is_empty() {
            writeln!(f, "default {}", join(&self.defaults))?;
        }
        Ok(())
    }
}

/// Escape a path for use on a `build` line.
fn escape_path(path: &Utf8Path) -> String {
    path.as_str()
        .replace('$', "$$")
        .replace(' ', "$ ")
        .replace(':', "$:")
}

/// Escape a shell line for embedding in a Ninja variable.
fn escape_command(command: &str) -> String {
    command.replace('$', "$$")
}

fn join(paths: &[Utf8PathBuf]) -> String {
    paths.iter().map(|p| escape_path(p)).join(" ")
}

struct DisplayEdge<'a> {
    edge: &'a BuildEdge,
}

impl Display for DisplayEdge<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rule = if self.edge.phony { "phony" } else { "sh" };
        write!(f, "build {}: {rule}", join(&self.edge.outputs))?;
        if !self.edge.inputs.is_empty() {
            write!(f, " {}", join(&self.edge.inputs))?;
        }
        writeln!(f)?;
        if !self.edge.phony {
            let cmd = self
                .edge
                .commands
                .iter()
                .map(|c| escape_command(c))
                .join(" && ");
            writeln!(f, "  cmd = {cmd}")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn generates_command_edges_and_defaults() {
        let mut graph = ScriptGraph::new();
        graph.add_edge(BuildEdge::command(
            "/out/a.bc".into(),
            vec!["/proj/a.c".into()],
            vec!["clang -emit-llvm -c /proj/a.c -o /out/a.bc".into()],
        ));
        graph.add_default("/out/a.bc".into());

        let ninja = graph.generate();
        let expected = concat!(
            "rule sh\n",
            "  command = $cmd\n\n",
            "build /out/a.bc: sh /proj/a.c\n",
            "  cmd = clang -emit-llvm -c /proj/a.c -o /out/a.bc\n\n",
            "default /out/a.bc\n"
        );
        assert_eq!(ninja, expected);
    }

    #[rstest]
    fn commands_are_chained_with_and() {
        let mut graph = ScriptGraph::new();
        graph.add_edge(BuildEdge::command(
            "/out/lib.a".into(),
            vec!["/out/a.bc".into()],
            vec!["rm -f /out/lib.a".into(), "llvm-ar r /out/lib.a /out/a.bc".into()],
        ));
        assert!(
            graph
                .generate()
                .contains("cmd = rm -f /out/lib.a && llvm-ar r /out/lib.a /out/a.bc")
        );
    }

    #[rstest]
    fn phony_edges_carry_no_command() {
        let mut graph = ScriptGraph::new();
        graph.add_edge(BuildEdge::phony("build", vec!["/out/a".into(), "/out/b".into()]));
        let ninja = graph.generate();
        assert!(ninja.contains("build build: phony /out/a /out/b\n"));
        assert!(!ninja.contains("cmd ="));
    }

    #[rstest]
    fn special_characters_are_escaped() {
        let mut graph = ScriptGraph::new();
        graph.add_edge(BuildEdge::command(
            "/out/a b.o".into(),
            Vec::new(),
            vec!["echo $HOME".into()],
        ));
        let ninja = graph.generate();
        assert!(ninja.contains("build /out/a$ b.o: sh\n"));
        assert!(ninja.contains("cmd = echo $$HOME"));
    }

    #[rstest]
    fn has_output_reports_planned_artifacts() {
        let mut graph = ScriptGraph::new();
        graph.add_edge(BuildEdge::command("/out/a.bc".into(), Vec::new(), Vec::new()));
        assert!(graph.has_output(Utf8Path::new("/out/a.bc")));
        assert!(!graph.has_output(Utf8Path::new("/out/b.bc")));
    }
}
