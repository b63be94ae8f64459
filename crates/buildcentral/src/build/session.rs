//! Per-run build state shared with outside observers
//!
//! The cancellation flag and the description of the in-flight child process
//! are the only state another thread (a UI, a signal handler) may touch while
//! a run is executing; both live behind [`CancelHandle`] and a mutex.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Notify;

use crate::Result;

use super::command::Stage;

/// Cloneable handle used to cancel a running build from any thread
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight process is killed promptly
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the session can run again
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// The child process currently being supervised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub package: String,
    pub stage: Stage,
    pub pid: Option<u32>,
}

/// Something the executor did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A child process was started
    Command {
        package: String,
        stage: Stage,
        argv: Vec<String>,
        cwd: Utf8PathBuf,
    },
    /// A working directory was removed
    RemoveDir { package: String, path: Utf8PathBuf },
}

/// State of one execution; created before a run and discarded after it
#[derive(Debug, Default)]
pub struct BuildSession {
    cancel: CancelHandle,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    current_package: Option<String>,
    log: Option<File>,
    log_path: Option<Utf8PathBuf>,
    /// Working directory -> package that used it earlier in this run
    work_dirs: HashMap<Utf8PathBuf, String>,
    steps: Vec<Step>,
}

impl BuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session cancelled through an existing handle
    pub fn with_cancel_handle(cancel: CancelHandle) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shared view of the in-flight process, readable from other threads
    pub fn in_flight_handle(&self) -> Arc<Mutex<Option<InFlight>>> {
        Arc::clone(&self.in_flight)
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_in_flight(&self, in_flight: Option<InFlight>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = in_flight;
    }

    pub fn current_package(&self) -> Option<&str> {
        self.current_package.as_deref()
    }

    pub(crate) fn set_current_package(&mut self, package: &str) {
        self.current_package = Some(package.to_string());
    }

    /// Open the run log in append mode, creating its directory
    pub(crate) fn open_log(&mut self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.log = Some(file);
        self.log_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn log_path(&self) -> Option<&Utf8Path> {
        self.log_path.as_deref()
    }

    /// Append one output line to the run log
    pub(crate) fn log_line(&mut self, line: &str) {
        if let Some(log) = &mut self.log {
            if let Err(e) = writeln!(log, "{}", line) {
                tracing::warn!("Failed to write run log: {}", e);
                self.log = None;
            }
        }
    }

    /// Make `package` the owner of `dir`, returning the previous owner if it
    /// was another package
    pub(crate) fn claim_work_dir(&mut self, dir: &Utf8Path, package: &str) -> Option<String> {
        self.work_dirs
            .insert(dir.to_path_buf(), package.to_string())
            .filter(|owner| owner != package)
    }

    pub(crate) fn record(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn take_steps(&mut self) -> Vec<Step> {
        std::mem::take(&mut self.steps)
    }

    /// Close the log and forget the per-run state
    pub(crate) fn finish(&mut self) {
        self.log = None;
        self.current_package = None;
        self.work_dirs.clear();
        self.set_in_flight(None);
    }
}
