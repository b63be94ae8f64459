//! Progress display for package builds
//!
//! One overall bar for the run plus a spinner for the package currently
//! being processed, drawn through indicatif so tracing output stays readable.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

/// Progress manager for a build run
pub struct BuildProgress {
    /// Multi-progress container for all progress bars
    multi: MultiProgress,
    /// Active progress bars indexed by package name
    bars: HashMap<String, ProgressBar>,
    /// Completed packages count
    completed: usize,
    /// Total packages count
    total: usize,
    /// Main progress bar showing overall progress
    main_bar: ProgressBar,
}

impl BuildProgress {
    /// Create a new build progress manager drawing to stderr
    pub fn new(total: usize) -> Self {
        Self::with_multi(MultiProgress::new(), total)
    }

    /// Progress manager that draws nothing
    pub fn hidden(total: usize) -> Self {
        Self::with_multi(
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            total,
        )
    }

    fn with_multi(multi: MultiProgress, total: usize) -> Self {
        let main_bar = multi.add(ProgressBar::new(total as u64));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} packages ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        main_bar.set_style(style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: HashMap::new(),
            completed: 0,
            total,
            main_bar,
        }
    }

    /// Start processing a package
    pub fn start_package(&mut self, package_name: &str, build_kind: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.yellow} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("{} ({})", package_name, build_kind));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Some(previous) = self.bars.insert(package_name.to_string(), bar) {
            previous.finish_and_clear();
        }
    }

    /// Update the message for a package's progress bar
    pub fn update_package(&self, package_name: &str, message: &str) {
        if let Some(bar) = self.bars.get(package_name) {
            bar.set_message(format!("{}: {}", package_name, message));
        }
    }

    /// Mark a package as completed successfully
    pub fn finish_package(&mut self, package_name: &str) {
        if let Some(bar) = self.bars.remove(package_name) {
            bar.finish_and_clear();
        }
        self.completed += 1;
        self.main_bar.set_position(self.completed as u64);
    }

    /// Mark a package as failed
    pub fn fail_package(&mut self, package_name: &str, error: &str) {
        if let Some(bar) = self.bars.remove(package_name) {
            bar.abandon_with_message(format!("{}: FAILED - {}", package_name, error));
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Finish all progress bars
    pub fn finish(&self) {
        self.main_bar
            .finish_with_message(format!("Built {}/{} packages", self.completed, self.total));
    }
}

impl Drop for BuildProgress {
    fn drop(&mut self) {
        // Clear any remaining progress bars
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
    }
}
