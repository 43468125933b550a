//! Relink core library.
//!
//! Relink reconstructs the build graph of an already-built C/C++ project
//! from its recorded compile and link commands, then re-plays that graph to
//! produce alternate artifacts: whole-program intermediate modules (with
//! selected sources replaced by stand-in implementations) for symbolic
//! execution, and instrumented native binaries for running generated tests.
//! All heavy lifting is delegated to Ninja via generated build scripts.

pub mod cancel;
pub mod cli;
pub mod command;
pub mod database;
pub mod linker;
pub mod native;
pub mod ninja_gen;
pub mod paths;
pub mod project;
pub mod record;
pub mod runner;
pub mod stubs;
pub mod variant;
