//! Helpers shared by the buildcentral end-to-end tests

pub mod fixture;
pub mod process_monitor;
