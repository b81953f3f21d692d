// progress.rs - Scan options, progress reporting and cooperative cancellation

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Knobs shared by every scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Split rows over the rayon pool (full, cross and tally scans)
    pub parallel: bool,
    /// Show a progress bar
    pub progress: bool,
    /// Print start/finish lines
    pub verbose: bool,
    /// Polled between pairs; set it to stop the scan early
    pub cancel: Option<Arc<AtomicBool>>,
    /// Raise the cancel flag once this many pairs are done
    #[cfg(test)]
    pub(crate) cancel_after: Option<u64>,
}

impl ScanOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    #[inline]
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Pair counter feeding an optional progress bar
///
/// With progress disabled no bar is allocated and `tick` is a counter bump.
pub(crate) struct Progress {
    bar: Option<ProgressBar>,
    done: AtomicU64,
    interval: u64,
    #[cfg(test)]
    trip: Option<(u64, Arc<AtomicBool>)>,
}

impl Progress {
    pub(crate) fn new(total: u64, options: &ScanOptions) -> Self {
        let bar = options.progress.then(|| {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA: {eta}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        });
        Self {
            bar,
            done: AtomicU64::new(0),
            // Update every 1%
            interval: std::cmp::max(1, total / 100),
            #[cfg(test)]
            trip: options.cancel_after.zip(options.cancel.clone()),
        }
    }

    #[inline]
    pub(crate) fn tick(&self) {
        let count = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(test)]
        if let Some((after, flag)) = &self.trip {
            if count >= *after {
                flag.store(true, Ordering::Relaxed);
            }
        }
        if let Some(pb) = &self.bar {
            if count % self.interval == 0 {
                pb.set_position(count);
            }
        }
    }

    pub(crate) fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub(crate) fn finish(&self, complete: bool) {
        if let Some(pb) = &self.bar {
            pb.set_position(self.done());
            if complete {
                pb.finish_with_message("✅ Scan completed!");
            } else {
                pb.abandon_with_message("⚠️  Scan cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let options = ScanOptions::sequential().with_cancel(flag.clone());
        assert!(!options.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(options.cancelled());
        assert!(!ScanOptions::default().cancelled());
    }

    #[test]
    fn test_disabled_progress_counts() {
        let progress = Progress::new(10, &ScanOptions::sequential());
        assert!(progress.bar.is_none());
        for _ in 0..7 {
            progress.tick();
        }
        assert_eq!(progress.done(), 7);
        progress.finish(true);
    }

    #[test]
    fn test_cancel_after_raises_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut options = ScanOptions::sequential().with_cancel(flag.clone());
        options.cancel_after = Some(3);
        let progress = Progress::new(10, &options);
        progress.tick();
        progress.tick();
        assert!(!options.cancelled());
        progress.tick();
        assert!(options.cancelled());
    }
}
