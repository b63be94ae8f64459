//! Build system integration
//!
//! This module turns resolved build orders into child processes:
//! - Build kind detection (package script, CMake, Make)
//! - Command synthesis from toolchain profiles
//! - Supervised execution with logging, cancellation and progress display

pub mod command;
pub mod command_logger;
pub mod executor;
pub mod probe;
pub mod progress;
pub mod session;

pub use command::{BuildCommand, Stage, SynthesisOptions, synthesize};
pub use command_logger::{CommandOutcome, LogCallback, run_command_with_logging};
pub use executor::{CleanMode, ExecuteOptions, Executor, RunReport, RunStatus};
pub use probe::{BuildKind, FsProbe, PackageProbe};
pub use progress::BuildProgress;
pub use session::{BuildSession, CancelHandle, InFlight, Step};
