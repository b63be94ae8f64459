//! Watching for child processes left behind by a build

use std::process::Command;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Monitor sampling how many processes match a pattern
pub struct ProcessMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<usize>>>,
}

impl ProcessMonitor {
    /// Start sampling processes whose command line matches `pattern`
    pub fn start(pattern: &str) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = Arc::clone(&stop_flag);
        let pattern = pattern.to_string();

        let handle = thread::spawn(move || {
            let mut samples = Vec::new();

            while !stop_flag_clone.load(Ordering::Relaxed) {
                if let Ok(count) = count_processes_matching(&pattern) {
                    samples.push(count);
                }

                thread::sleep(Duration::from_millis(50));
            }

            samples
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stop sampling and return the highest count observed
    pub fn stop(mut self) -> usize {
        self.stop_flag.store(true, Ordering::Relaxed);

        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .and_then(|samples| samples.into_iter().max())
            .unwrap_or(0)
    }
}

/// Count the processes whose command line matches `pattern`
///
/// Uses `pgrep -c -f`; no match is a count of zero.
pub fn count_processes_matching(pattern: &str) -> Result<usize, String> {
    let output = Command::new("pgrep")
        .args(["-c", "-f", pattern])
        .output()
        .map_err(|e| format!("Failed to run pgrep: {}", e))?;

    // pgrep exits with 1 when nothing matches
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("Failed to parse pgrep output: {}", e))
    } else {
        Ok(0)
    }
}

/// Wait up to `timeout` for every process matching `pattern` to exit
pub fn wait_until_gone(pattern: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if count_processes_matching(pattern) == Ok(0) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}
