//! Error types for buildcentral

// This warning is a false positive from thiserror macro expansion
#![allow(unused_assignments)]

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for buildcentral operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for buildcentral
#[derive(Debug, Error, Diagnostic)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a configuration or rc file
    #[error("{path} is not valid JSON: {error}")]
    #[diagnostic(help("Fix the syntax error in the file"))]
    Json {
        path: Utf8PathBuf,
        error: serde_json::Error,
    },

    /// Unknown `$name` placeholder in configuration text
    #[error("{path}: unknown placeholder ${name}")]
    #[diagnostic(help("Only the PROOT placeholder is substituted; write $$ for a literal dollar"))]
    Placeholder { path: Utf8PathBuf, name: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String, help: String },

    /// A declared architecture lacks a required toolchain field
    #[error("Toolchain error for {arch}: {message}")]
    #[diagnostic(help("Set the field in one of the buildcentralrc files"))]
    Toolchain { arch: String, message: String },

    /// A package referenced from a variant, dependency or tool list does not exist
    #[error("{arch}/{variant}: package '{package}' referenced by '{referenced_by}' is not defined")]
    #[diagnostic(help("Declare the package in PACKAGES or PACKAGES-PER-ARCH"))]
    UndefinedPackage {
        arch: String,
        variant: String,
        package: String,
        referenced_by: String,
    },

    /// A group referenced through BASE does not exist
    #[error("{arch}: group '{group}' referenced by '{referenced_by}' is not defined")]
    #[diagnostic(help("Declare the group in the BUILD section of the architecture"))]
    UndefinedGroup {
        arch: String,
        group: String,
        referenced_by: String,
    },

    /// BASE references form a loop
    #[error("{arch}: group BASE references form a loop: {}", groups.join(" -> "))]
    #[diagnostic(help("Remove one of the BASE references"))]
    GroupCycle { arch: String, groups: Vec<String> },

    /// Circular dependency detected
    #[error("{arch}/{variant}: loop dependency found: {}", format_cycles(cycles))]
    #[diagnostic(help("Check the Dependency lists of the packages involved"))]
    CircularDependency {
        arch: String,
        variant: String,
        /// Each entry is one cycle, listed in edge order
        cycles: Vec<Vec<String>>,
    },

    /// Other graph lookup error
    #[error("Graph error: {message}")]
    Graph { message: String, help: String },

    /// A child process exited unsuccessfully
    #[error("{operation} failed for {package}{}", format_code(*code))]
    #[diagnostic(help("Check the build output and the run log for errors"))]
    Process {
        package: String,
        operation: String,
        code: Option<i32>,
    },

    /// Filesystem problem tied to a package (missing source, bad archive, ...)
    #[error("Package {package}: {message}")]
    PackageIo { package: String, message: String },

    /// Build infrastructure error
    #[error("Build error: {message}")]
    Build { message: String, help: String },
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| format!("[{}]", c.join(" -> ")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => " (terminated by signal)".to_string(),
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: help.into(),
        }
    }

    /// Create a toolchain error
    pub fn toolchain(arch: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Toolchain {
            arch: arch.into(),
            message: message.into(),
        }
    }

    /// Create a graph error
    pub fn graph(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
            help: help.into(),
        }
    }

    /// Create a package filesystem error
    pub fn package_io(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PackageIo {
            package: package.into(),
            message: message.into(),
        }
    }

    /// Create a build error
    pub fn build(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            help: help.into(),
        }
    }

    /// Whether this error was raised while validating configuration,
    /// i.e. before any child process could have been spawned
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::Json { .. }
                | Self::Placeholder { .. }
                | Self::Config { .. }
                | Self::Toolchain { .. }
                | Self::UndefinedPackage { .. }
                | Self::UndefinedGroup { .. }
                | Self::GroupCycle { .. }
                | Self::CircularDependency { .. }
        )
    }
}
