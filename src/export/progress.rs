//! Progress display for file exports
//!
//! The HTTP path never shows progress; the CLI `export` command attaches a
//! tracker to the writer so long exports give feedback on the terminal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Row counter with an optional terminal progress bar
pub struct ProgressTracker {
    processed: AtomicU64,
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a tracker
    ///
    /// # Arguments
    /// * `total` - Expected row count, usually the export cap
    /// * `enable_bar` - Whether to draw a bar on stderr
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
                {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {pos} rows {msg}") {
                    bar.set_style(style);
                }
                bar
            }
        });

        Self {
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Record the number of rows written so far
    pub fn update(&self, count: u64) {
        self.processed.store(count, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(count);
            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("({:.0} rows/sec)", count as f64 / elapsed));
            }
        }
    }

    /// Rows recorded so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Clear the bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_without_bar() {
        let tracker = ProgressTracker::new(Some(100), false);
        tracker.update(40);
        assert_eq!(tracker.processed(), 40);
        tracker.finish();
    }
}
