//! Command model for recorded compiler, linker and shell invocations.
//!
//! A command is an ordered, mutable argument list with stable references to
//! its semantically important tokens: the tool path, the compile source, the
//! output path and the optimisation-level flag. The original records often
//! omit `-o`; constructors synthesise a default so that every command has a
//! resolvable output once built. Tokens are tagged with a role rather than
//! tracked by position, so edits never invalidate the references.

use crate::paths;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use miette::Diagnostic;
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while constructing a command from a recorded argument list.
#[derive(Debug, Error, Diagnostic)]
pub enum CommandError {
    /// The recorded argument list was empty.
    #[error("recorded command in {directory} has no arguments")]
    #[diagnostic(code(relink::command::empty))]
    Empty {
        /// Directory of the offending record entry.
        directory: Utf8PathBuf,
    },

    /// A compile command did not mention its own source file.
    #[error("compile command for {file} does not reference the source file")]
    #[diagnostic(code(relink::command::missing_source))]
    MissingSource {
        /// The source file named by the record entry.
        file: Utf8PathBuf,
    },
}

/// Characters besides alphanumerics that never need shell quoting. Wider
/// than shlex's conservative set so flags like `--redefine-sym main=main__`
/// and `-Wl,--whole-archive` render verbatim.
const SHELL_SAFE: &str = "=,+:@%/._-";

fn quote_token(text: &str) -> Cow<'_, str> {
    let safe = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SHELL_SAFE.contains(c));
    if safe {
        Cow::Borrowed(text)
    } else {
        shlex::try_quote(text).unwrap_or(Cow::Borrowed(text))
    }
}

/// Semantic tag attached to one argument token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Tool,
    Source,
    OutputFlag,
    Output,
    OptLevel,
    Plain,
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    role: Role,
}

impl Token {
    fn plain(text: String) -> Self {
        Self {
            text,
            role: Role::Plain,
        }
    }
}

/// Ordered token list shared by the command specialisations.
#[derive(Debug, Clone)]
struct Argv {
    tokens: Vec<Token>,
}

impl Argv {
    fn new(argv: Vec<String>, directory: &Utf8Path) -> Result<Self, CommandError> {
        let mut tokens: Vec<Token> = argv.into_iter().map(Token::plain).collect();
        match tokens.first_mut() {
            Some(tool) => tool.role = Role::Tool,
            None => {
                return Err(CommandError::Empty {
                    directory: directory.to_path_buf(),
                });
            }
        }
        Ok(Self { tokens })
    }

    fn find(&self, role: Role) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.role == role)
            .map(|t| t.text.as_str())
    }

    fn set(&mut self, role: Role, text: String) {
        if let Some(token) = self.tokens.iter_mut().find(|t| t.role == role) {
            token.text = text;
        }
    }

    /// Tag the `-o` flag and its argument, absolutising the output path.
    /// Returns false when no `-o` pair exists.
    fn mark_output_pair(&mut self, directory: &Utf8Path) -> bool {
        let Some(flag_idx) = self.tokens.iter().position(|t| t.text == "-o") else {
            return false;
        };
        let Some(value) = self.tokens.get(flag_idx + 1) else {
            return false;
        };
        let absolute = paths::absolutize(Utf8Path::new(&value.text), directory);
        if let Some(flag) = self.tokens.get_mut(flag_idx) {
            flag.role = Role::OutputFlag;
        }
        if let Some(value_token) = self.tokens.get_mut(flag_idx + 1) {
            value_token.role = Role::Output;
            value_token.text = absolute.into_string();
        }
        true
    }

    /// Insert `-o <output>` right after the tool token.
    fn insert_output_pair(&mut self, output: Utf8PathBuf) {
        self.tokens.insert(
            1,
            Token {
                text: output.into_string(),
                role: Role::Output,
            },
        );
        self.tokens.insert(
            1,
            Token {
                text: "-o".into(),
                role: Role::OutputFlag,
            },
        );
    }

    fn insert_front(&mut self, flags: impl IntoIterator<Item = String>) {
        let mut at = 1;
        for flag in flags {
            self.tokens.insert(at, Token::plain(flag));
            at += 1;
        }
    }

    fn push(&mut self, flag: String) {
        self.tokens.push(Token::plain(flag));
    }

    /// Remove plain tokens matching the predicate; tagged tokens survive.
    fn erase_plain_if(&mut self, mut predicate: impl FnMut(&str) -> bool) -> usize {
        let before = self.tokens.len();
        self.tokens
            .retain(|t| t.role != Role::Plain || !predicate(&t.text));
        before - self.tokens.len()
    }

    /// Rewrite plain tokens equal to `from` into `to`. Returns whether any
    /// token changed.
    fn replace_plain(&mut self, from: &str, to: &str) -> bool {
        let mut changed = false;
        for token in &mut self.tokens {
            if token.role == Role::Plain && token.text == from {
                token.text = to.into();
                changed = true;
            }
        }
        changed
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| t.text.as_str())
    }

    fn render(&self, env: &IndexMap<String, String>) -> String {
        let mut parts: Vec<Cow<'_, str>> = env
            .iter()
            .map(|(k, v)| Cow::Owned(format!("{k}={v}")))
            .collect();
        parts.extend(
            self.tokens
                .iter()
                .filter(|t| !t.text.is_empty())
                .map(|t| quote_token(&t.text)),
        );
        parts.join(" ")
    }
}

/// One recorded compilation of a translation unit.
#[derive(Debug, Clone)]
pub struct CompileCommand {
    directory: Utf8PathBuf,
    argv: Argv,
    env: IndexMap<String, String>,
}

impl CompileCommand {
    /// Build a compile command from a recorded argument list.
    ///
    /// The token matching `source`'s file name is tagged as the source and
    /// rewritten to the absolute path; a `-o` pair is synthesised next to
    /// the source when the record omitted one.
    ///
    /// # Errors
    ///
    /// Fails when the argument list is empty or never references the source.
    pub fn new(
        argv: Vec<String>,
        directory: Utf8PathBuf,
        source: Utf8PathBuf,
    ) -> Result<Self, CommandError> {
        let mut argv = Argv::new(argv, &directory)?;
        let absolute_source = paths::absolutize(&source, &directory);
        let source_name = absolute_source.file_name().unwrap_or_default();
        let found = argv
            .tokens
            .iter_mut()
            .find(|t| {
                t.role == Role::Plain
                    && Utf8Path::new(&t.text).file_name() == Some(source_name)
            })
            .map(|token| {
                token.role = Role::Source;
                token.text = absolute_source.clone().into_string();
            });
        if found.is_none() {
            return Err(CommandError::MissingSource {
                file: absolute_source,
            });
        }
        if !argv.mark_output_pair(&directory) {
            argv.insert_output_pair(paths::replace_extension(&absolute_source, "o"));
        }
        if let Some(opt) = argv
            .tokens
            .iter_mut()
            .find(|t| t.role == Role::Plain && t.text.starts_with("-O"))
        {
            opt.role = Role::OptLevel;
        }
        Ok(Self {
            directory,
            argv,
            env: IndexMap::new(),
        })
    }

    /// The compiler being invoked.
    #[must_use]
    pub fn tool(&self) -> &str {
        self.argv.find(Role::Tool).unwrap_or_default()
    }

    /// Point the command at a different compiler.
    pub fn set_tool(&mut self, tool: &str) {
        self.argv.set(Role::Tool, tool.into());
    }

    /// The translation unit being compiled.
    #[must_use]
    pub fn source_path(&self) -> &Utf8Path {
        Utf8Path::new(self.argv.find(Role::Source).unwrap_or_default())
    }

    /// Compile a different file with the same flags.
    pub fn set_source_path(&mut self, source: &Utf8Path) {
        self.argv.set(Role::Source, source.as_str().into());
    }

    /// The object file this command produces.
    #[must_use]
    pub fn output(&self) -> &Utf8Path {
        Utf8Path::new(self.argv.find(Role::Output).unwrap_or_default())
    }

    /// Redirect the command's output.
    pub fn set_output(&mut self, output: &Utf8Path) {
        self.argv.set(Role::Output, output.as_str().into());
    }

    /// Directory the command runs from.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Replace the optimisation level, inserting the flag when absent.
    pub fn set_opt_level(&mut self, flag: &str) {
        if self.argv.find(Role::OptLevel).is_some() {
            self.argv.set(Role::OptLevel, flag.into());
        } else {
            self.argv.tokens.insert(
                1,
                Token {
                    text: flag.into(),
                    role: Role::OptLevel,
                },
            );
        }
    }

    /// Drop every `-Werror*` flag; warnings must not break re-compilation.
    pub fn remove_werror(&mut self) {
        let erased = self.argv.erase_plain_if(|arg| arg.starts_with("-Werror"));
        if erased > 0 {
            tracing::debug!(erased, "stripped -Werror flags from compile command");
        }
    }

    /// Remove flags from `switches`, matching `flag` and `flag=value` forms.
    pub fn remove_flags(&mut self, switches: &[&str]) {
        self.argv.erase_plain_if(|arg| {
            let name = arg.split('=').next().unwrap_or(arg);
            switches.contains(&name)
        });
    }

    /// Remove plain arguments matching the predicate.
    pub fn erase_if(&mut self, predicate: impl FnMut(&str) -> bool) {
        self.argv.erase_plain_if(predicate);
    }

    /// Insert flags immediately after the tool, preserving their order.
    pub fn insert_flags_front(&mut self, flags: impl IntoIterator<Item = String>) {
        self.argv.insert_front(flags);
    }

    /// Append one flag at the end of the argument list.
    pub fn push_flag(&mut self, flag: &str) {
        self.argv.push(flag.into());
    }

    /// Rewrite plain arguments equal to `from` into `to`.
    pub fn replace_argument(&mut self, from: &Utf8Path, to: &Utf8Path) -> bool {
        self.argv.replace_plain(from.as_str(), to.as_str())
    }

    /// Overlay one environment variable onto the invocation.
    pub fn add_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.into(), value.into());
    }

    /// Iterate over the raw argument tokens.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.argv.iter()
    }

    /// Render the invocation as a single shell line.
    #[must_use]
    pub fn to_shell(&self) -> String {
        self.argv.render(&self.env)
    }
}

/// One recorded archive or link step.
#[derive(Debug, Clone)]
pub struct LinkCommand {
    directory: Utf8PathBuf,
    argv: Argv,
    env: IndexMap<String, String>,
}

impl LinkCommand {
    /// Build a link command from a recorded argument list.
    ///
    /// Output synthesis follows the tool: `-o` is honoured when present;
    /// archive commands treat their first static-archive token as the
    /// (positional) output; anything else defaults to `a.out` in the
    /// command's directory.
    ///
    /// # Errors
    ///
    /// Fails when the argument list is empty.
    pub fn new(argv: Vec<String>, directory: Utf8PathBuf) -> Result<Self, CommandError> {
        let mut argv = Argv::new(argv, &directory)?;
        if !argv.mark_output_pair(&directory) {
            let is_archive = Utf8Path::new(argv.find(Role::Tool).unwrap_or_default())
                .file_name()
                .is_some_and(|name| name.contains("ar"));
            let archive_idx = if is_archive {
                argv.tokens.iter().position(|t| {
                    t.role == Role::Plain && paths::is_static_library(Utf8Path::new(&t.text))
                })
            } else {
                None
            };
            match archive_idx.and_then(|idx| argv.tokens.get_mut(idx)) {
                Some(token) => {
                    // `ar`-style commands name their output positionally.
                    token.role = Role::Output;
                    token.text =
                        paths::absolutize(Utf8Path::new(&token.text), &directory).into_string();
                }
                None => argv.insert_output_pair(directory.join("a.out")),
            }
        }
        Ok(Self {
            directory,
            argv,
            env: IndexMap::new(),
        })
    }

    /// The linker or archiver being invoked.
    #[must_use]
    pub fn tool(&self) -> &str {
        self.argv.find(Role::Tool).unwrap_or_default()
    }

    /// Point the command at a different tool.
    pub fn set_tool(&mut self, tool: &str) {
        self.argv.set(Role::Tool, tool.into());
    }

    /// The library or executable this command produces.
    #[must_use]
    pub fn output(&self) -> &Utf8Path {
        Utf8Path::new(self.argv.find(Role::Output).unwrap_or_default())
    }

    /// Redirect the command's output.
    pub fn set_output(&mut self, output: &Utf8Path) {
        self.argv.set(Role::Output, output.as_str().into());
    }

    /// Directory the command runs from.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Whether this is an `ar`-style archive command.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        Utf8Path::new(self.tool())
            .file_name()
            .is_some_and(|name| name.contains("ar"))
    }

    /// Whether this command produces a shared object.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.argv.iter().any(|arg| arg == "-shared")
    }

    /// Remove plain arguments matching the predicate.
    pub fn erase_if(&mut self, predicate: impl FnMut(&str) -> bool) {
        self.argv.erase_plain_if(predicate);
    }

    /// Insert flags immediately after the tool, preserving their order.
    pub fn insert_flags_front(&mut self, flags: impl IntoIterator<Item = String>) {
        self.argv.insert_front(flags);
    }

    /// Append one flag at the end of the argument list.
    pub fn push_flag(&mut self, flag: &str) {
        self.argv.push(flag.into());
    }

    /// Rewrite plain arguments equal to `from` into `to`.
    pub fn replace_argument(&mut self, from: &Utf8Path, to: &Utf8Path) -> bool {
        self.argv.replace_plain(from.as_str(), to.as_str())
    }

    /// Overlay one environment variable onto the invocation.
    pub fn add_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.into(), value.into());
    }

    /// Iterate over the raw argument tokens.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.argv.iter()
    }

    /// Render the invocation as a single shell line.
    #[must_use]
    pub fn to_shell(&self) -> String {
        self.argv.render(&self.env)
    }
}

/// A plain shell step inside a generated build script.
#[derive(Debug, Clone)]
pub struct RunCommand {
    argv: Vec<String>,
    env: IndexMap<String, String>,
}

impl RunCommand {
    /// Wrap an argument list as a runnable step.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: IndexMap::new(),
        }
    }

    /// The `rm -f` step used when an output's content must change even
    /// though no dependency timestamp did.
    #[must_use]
    pub fn force_remove(path: &Utf8Path) -> Self {
        Self::new(vec!["rm".into(), "-f".into(), path.as_str().into()])
    }

    /// Overlay one environment variable onto the invocation.
    pub fn add_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.into(), value.into());
    }

    /// Render the invocation as a single shell line.
    #[must_use]
    pub fn to_shell(&self) -> String {
        let mut parts: Vec<Cow<'_, str>> = self
            .env
            .iter()
            .map(|(k, v)| Cow::Owned(format!("{k}={v}")))
            .collect();
        parts.extend(self.argv.iter().map(|arg| quote_token(arg)));
        parts.join(" ")
    }
}
