//! Ninja subprocess invocation.
//!
//! The orchestrator hands every generated build script to an external Ninja
//! process and blocks on its completion. Output is captured line by line on
//! reader threads; a nonzero exit is a normal result for the caller to
//! classify, not an error of the runner itself.

use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Default Ninja executable name, resolved through `PATH`.
pub const NINJA_PROGRAM: &str = "ninja";
/// Environment variable overriding the Ninja executable.
pub const NINJA_ENV: &str = "RELINK_NINJA";

/// Errors from spawning or supervising the Ninja process.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// The process could not be started.
    #[error("cannot spawn build tool: {command}")]
    #[diagnostic(code(relink::runner::spawn))]
    Spawn {
        /// The full invocation.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed.
    #[error("cannot wait for build tool: {command}")]
    #[diagnostic(code(relink::runner::wait))]
    Wait {
        /// The full invocation.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process outlived the caller-side deadline and was killed.
    #[error("build tool exceeded {limit:?}: {command}")]
    #[diagnostic(code(relink::runner::timeout))]
    Timeout {
        /// The full invocation.
        command: String,
        /// The elapsed deadline.
        limit: Duration,
    },
}

/// Outcome of one completed Ninja invocation.
#[derive(Debug, Clone)]
pub struct NinjaRun {
    /// The full invocation, for diagnostics.
    pub command: String,
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Captured stdout followed by stderr.
    pub output: String,
}

impl NinjaRun {
    /// Whether the invocation exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Configured Ninja invoker.
#[derive(Debug, Clone)]
pub struct NinjaRunner {
    program: Utf8PathBuf,
    jobs: Option<usize>,
    timeout: Option<Duration>,
}

impl NinjaRunner {
    /// Create a runner for an explicit program path.
    #[must_use]
    pub fn new(program: Utf8PathBuf, jobs: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            program,
            jobs,
            timeout,
        }
    }

    /// Create a runner resolving the program from [`NINJA_ENV`], falling
    /// back to [`NINJA_PROGRAM`] on `PATH`.
    #[must_use]
    pub fn from_env(jobs: Option<usize>, timeout: Option<Duration>) -> Self {
        let program = std::env::var(NINJA_ENV)
            .map_or_else(|_| Utf8PathBuf::from(NINJA_PROGRAM), Utf8PathBuf::from);
        Self::new(program, jobs, timeout)
    }

    /// Run `build_file` from `working_dir`, building `goals` (or the
    /// defaults when empty), and capture the combined output.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot be spawned or waited on, or when it
    /// exceeds the configured deadline. A nonzero exit is returned as a
    /// successful [`NinjaRun`] with `success() == false`.
    pub fn run(
        &self,
        build_file: &Utf8Path,
        working_dir: &Utf8Path,
        goals: &[String],
    ) -> Result<NinjaRun, RunnerError> {
        let mut args: Vec<String> = Vec::new();
        if let Some(jobs) = self.jobs {
            args.extend(["-j".into(), jobs.to_string()]);
        }
        args.extend(["-f".into(), build_file.to_string()]);
        args.extend(goals.iter().cloned());
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::info!(%command, dir = %working_dir, "running build tool");

        let mut child = Command::new(self.program.as_std_path())
            .args(&args)
            .current_dir(working_dir.as_std_path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => match child.wait_timeout(limit) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RunnerError::Timeout { command, limit });
                }
                Err(source) => return Err(RunnerError::Wait { command, source }),
            },
            None => child
                .wait()
                .map_err(|source| RunnerError::Wait {
                    command: command.clone(),
                    source,
                })?,
        };

        let mut output = String::new();
        for handle in [stdout, stderr].into_iter().flatten() {
            if let Ok(text) = handle.join() {
                output.push_str(&text);
            }
        }
        let code = status.code();
        tracing::debug!(?code, "build tool finished");
        Ok(NinjaRun {
            command,
            code,
            output,
        })
    }
}

/// Drain a child stream on its own thread, echoing lines to the log.
fn capture<R>(stream: Option<R>) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    stream.map(|stream| {
        thread::spawn(move || {
            let mut text = String::new();
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                tracing::debug!("{line}");
                text.push_str(&line);
                text.push('\n');
            }
            text
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_ninja(dir: &Utf8Path, script: &str) -> Utf8PathBuf {
        let path = dir.join("fake-ninja");
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn tempdir_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8Path::from_path(dir.path()).expect("utf8").to_path_buf()
    }

    #[rstest]
    fn nonzero_exit_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = tempdir_path(&dir);
        let program = fake_ninja(&root, "echo building\necho broken >&2\nexit 3");
        let runner = NinjaRunner::new(program, None, None);
        let run = runner
            .run(Utf8Path::new("build.ninja"), &root, &[])
            .expect("run completes");
        assert!(!run.success());
        assert_eq!(run.code, Some(3));
        assert!(run.output.contains("building"));
        assert!(run.output.contains("broken"));
    }

    #[rstest]
    fn goals_and_jobs_are_forwarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = tempdir_path(&dir);
        let program = fake_ninja(&root, "echo \"$@\"");
        let runner = NinjaRunner::new(program, Some(2), None);
        let run = runner
            .run(Utf8Path::new("x.ninja"), &root, &["bin".into()])
            .expect("run completes");
        assert!(run.success());
        assert!(run.output.contains("-j 2 -f x.ninja bin"));
    }

    #[rstest]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = tempdir_path(&dir);
        let runner = NinjaRunner::new(root.join("absent"), None, None);
        let err = runner
            .run(Utf8Path::new("build.ninja"), &root, &[])
            .expect_err("spawn fails");
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[rstest]
    fn deadline_kills_the_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = tempdir_path(&dir);
        let program = fake_ninja(&root, "sleep 5");
        let runner = NinjaRunner::new(program, None, Some(Duration::from_millis(100)));
        let err = runner
            .run(Utf8Path::new("build.ninja"), &root, &[])
            .expect_err("deadline");
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }
}
