use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use log::info;

/// Receives progress updates of long-running operations and may request their cancellation. Implementations are
/// called concurrently from the worker threads of a parallel loop
pub trait ProgressMonitor: Sync {
    /// Called when a new stage of an operation starts
    fn start_stage(&self, _description: &str) {}

    /// Called after each processed item. Returning `false` cancels the running operation
    fn update(&self, processed: usize, total: usize) -> bool;
}

/// A monitor that ignores all updates and never cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn update(&self, _processed: usize, _total: usize) -> bool {
        true
    }
}

/// A cloneable cancellation flag. All clones share the same flag, so one clone can be handed to a running
/// operation while another one is used to cancel it
/// ```
/// # use masc_algorithms::progress::*;
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// assert!(token.update(1, 10));
/// handle.cancel();
/// assert!(!token.update(2, 10));
/// ```
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ProgressMonitor for CancellationToken {
    fn update(&self, _processed: usize, _total: usize) -> bool {
        !self.is_cancelled()
    }
}

/// A monitor that logs every started stage and every completed tenth of a stage
#[derive(Debug, Default)]
pub struct LogProgress {
    last_reported: AtomicUsize,
}

impl ProgressMonitor for LogProgress {
    fn start_stage(&self, description: &str) {
        self.last_reported.store(0, Ordering::Relaxed);
        info!("{}", description);
    }

    fn update(&self, processed: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        let tenth = processed * 10 / total;
        if self.last_reported.fetch_max(tenth, Ordering::Relaxed) < tenth {
            info!("{}% ({}/{})", tenth * 10, processed, total);
        }
        true
    }
}

/// Shared state of one parallel loop: a progress counter and a sticky cancellation flag
pub(crate) struct Progress<'a> {
    monitor: &'a dyn ProgressMonitor,
    total: usize,
    processed: AtomicUsize,
    cancelled: AtomicBool,
}

impl<'a> Progress<'a> {
    pub fn new(monitor: &'a dyn ProgressMonitor, description: &str, total: usize) -> Self {
        monitor.start_stage(description);
        Self {
            monitor,
            total,
            processed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Counts one processed item. Returns `false` once the operation was cancelled
    pub fn tick(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.monitor.update(processed, self.total) {
            self.cancelled.store(true, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CancelAfter(usize);

    impl ProgressMonitor for CancelAfter {
        fn update(&self, processed: usize, _total: usize) -> bool {
            processed < self.0
        }
    }

    #[test]
    fn test_cancellation_is_sticky() {
        let monitor = CancelAfter(3);
        let progress = Progress::new(&monitor, "test", 10);
        assert!(progress.tick());
        assert!(progress.tick());
        assert!(!progress.tick());
        assert!(progress.is_cancelled());
        assert!(!progress.tick());
        assert_eq!(3, progress.processed());
    }

    #[test]
    fn test_no_progress_never_cancels() {
        let progress = Progress::new(&NoProgress, "test", 2);
        for _ in 0..5 {
            assert!(progress.tick());
        }
    }
}
