//! buildcentral - cross-architecture build orchestrator
//!
//! This crate provides both a library and CLI for buildcentral, including:
//! - Project and toolchain configuration loading with layered rc files
//! - Dependency graph construction with cycle detection
//! - Build order resolution, including host tools for cross builds
//! - Build command synthesis for script, CMake and Make packages
//! - Supervised, cancellable execution with logging

pub mod build;
pub mod commands;
pub mod config;
pub mod error;
pub mod graph;
pub mod order;
pub mod project;
pub mod toolchain;

pub use error::{Error, Result};
