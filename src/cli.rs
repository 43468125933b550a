//! Command line interface definition using clap.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Maximum number of jobs accepted by the CLI.
const MAX_JOBS: usize = 64;

/// Rebuild a recorded C/C++ build graph and re-play it to produce stubbed
/// intermediate modules and instrumented native test binaries.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root of the project's source tree.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub project: Utf8PathBuf,

    /// Directory holding the recorded build commands.
    ///
    /// Defaults to `<project>/build`.
    #[arg(short, long, value_name = "DIR")]
    pub records: Option<Utf8PathBuf>,

    /// Directory produced artifacts are rooted under.
    ///
    /// Defaults to `<project>/.relink`.
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<Utf8PathBuf>,

    /// Set the number of parallel build jobs.
    ///
    /// Values must be between 1 and 64.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Ninja executable to invoke.
    ///
    /// Overrides the `RELINK_NINJA` environment variable.
    #[arg(long, value_name = "PROGRAM")]
    pub ninja: Option<Utf8PathBuf>,

    /// Deadline in seconds around each build-tool invocation.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Optional subcommand to execute; defaults to `link` when omitted.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands supported by relink.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Link intermediate modules for one file or the whole project.
    Link {
        /// Source file to link; the whole project when omitted.
        #[arg(long, value_name = "FILE")]
        file: Option<Utf8PathBuf>,

        /// Explicit top-level target to link against.
        #[arg(long, value_name = "TARGET")]
        target: Option<Utf8PathBuf>,
    },

    /// Emit the instrumented native build script for a file's root target.
    Native {
        /// Source file whose root target is mirrored.
        #[arg(long, value_name = "FILE")]
        file: Utf8PathBuf,

        /// Generated test translation unit to compile and link runnable.
        #[arg(long, value_name = "FILE")]
        test: Option<Utf8PathBuf>,

        /// Write the script here instead of under the output directory.
        #[arg(long, value_name = "FILE")]
        emit: Option<Utf8PathBuf>,
    },

    /// List the reconstructed link units.
    Targets,
}

impl Cli {
    /// The record directory, applying the default when unset.
    #[must_use]
    pub fn record_dir(&self) -> Utf8PathBuf {
        self.records
            .clone()
            .unwrap_or_else(|| self.project.join("build"))
    }

    /// The output directory, applying the default when unset.
    #[must_use]
    pub fn out_dir(&self) -> Utf8PathBuf {
        self.out
            .clone()
            .unwrap_or_else(|| self.project.join(".relink"))
    }
}

fn parse_jobs(value: &str) -> Result<usize, String> {
    let jobs: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (1..=MAX_JOBS).contains(&jobs) {
        Ok(jobs)
    } else {
        Err(format!("jobs must be between 1 and {MAX_JOBS}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_derive_from_the_project_directory() {
        let cli = Cli::parse_from(["relink", "--project", "/p"]);
        assert_eq!(cli.record_dir(), Utf8PathBuf::from("/p/build"));
        assert_eq!(cli.out_dir(), Utf8PathBuf::from("/p/.relink"));
        assert!(cli.command.is_none());
    }

    #[rstest]
    fn link_subcommand_accepts_file_and_target() {
        let cli = Cli::parse_from([
            "relink", "link", "--file", "src/a.c", "--target", "bin/app",
        ]);
        match cli.command {
            Some(Commands::Link { file, target }) => {
                assert_eq!(file, Some(Utf8PathBuf::from("src/a.c")));
                assert_eq!(target, Some(Utf8PathBuf::from("bin/app")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[rstest]
    #[case("0")]
    #[case("65")]
    #[case("many")]
    fn out_of_range_jobs_are_rejected(#[case] jobs: &str) {
        assert!(Cli::try_parse_from(["relink", "--jobs", jobs]).is_err());
    }

    #[rstest]
    fn jobs_within_range_parse() {
        let cli = Cli::parse_from(["relink", "--jobs", "8"]);
        assert_eq!(cli.jobs, Some(8));
    }
}
