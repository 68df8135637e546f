//! Periodic memory sampling of a running engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::adapter::EngineAdapter;
use crate::ticker::Ticker;

#[derive(Debug, Default)]
struct Stats {
    peak: AtomicU64,
    samples: AtomicUsize,
    breaches: AtomicUsize,
}

/// Samples an adapter's resident memory on a [`Ticker`], keeping the peak and
/// counting samples above an optional limit.
#[derive(Debug)]
pub struct MemoryMonitor {
    ticker: Ticker,
    stats: Arc<Stats>,
}

impl MemoryMonitor {
    pub fn new(adapter: Arc<dyn EngineAdapter>, interval: Duration, limit: Option<u64>) -> Self {
        let stats = Arc::new(Stats::default());
        let sampled = Arc::clone(&stats);

        let ticker = Ticker::new(interval, move || {
            let bytes = match adapter.memory_usage() {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(engine = adapter.display_name(), error = %e, "memory sample failed");
                    return;
                }
            };
            sampled.samples.fetch_add(1, Ordering::Relaxed);
            sampled.peak.fetch_max(bytes, Ordering::Relaxed);

            if let Some(limit) = limit.filter(|limit| bytes > *limit) {
                sampled.breaches.fetch_add(1, Ordering::Relaxed);
                warn!(engine = adapter.display_name(), bytes, limit, "engine exceeds memory limit");
            }
        });

        Self { ticker, stats }
    }

    /// # Errors
    ///
    /// Returns an I/O error if the sampling thread cannot be spawned.
    pub fn start(&mut self) -> std::io::Result<()> {
        self.ticker.start()
    }

    pub fn stop(&mut self) {
        self.ticker.stop();
    }

    /// Highest sample seen so far, in bytes.
    pub fn peak(&self) -> u64 {
        self.stats.peak.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> usize {
        self.stats.samples.load(Ordering::Relaxed)
    }

    /// Number of samples above the limit.
    pub fn breaches(&self) -> usize {
        self.stats.breaches.load(Ordering::Relaxed)
    }
}
