//! Transfer statistics for throughput monitoring
//!
//! Tracks cumulative bytes received on the streaming path. The counter is
//! purely diagnostic: nothing in the driver makes correctness decisions
//! from it. It is shared between the streaming worker (writer) and
//! foreground readers, so all access is atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Thread-safe byte counter with an explicit reset
#[derive(Debug)]
pub struct TransferStats {
    bytes_received: AtomicU64,
    started: Instant,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            bytes_received: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record `n` received bytes
    pub fn record_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Bytes received since construction or the last reset
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Reset the byte counter to zero
    pub fn reset(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
    }

    /// Average receive throughput in bytes per second since construction
    pub fn throughput_bps(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.bytes_received() as f64 / elapsed
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_and_resets() {
        let stats = TransferStats::new();
        assert_eq!(stats.bytes_received(), 0);

        stats.record_received(4096);
        stats.record_received(1024);
        assert_eq!(stats.bytes_received(), 5120);

        stats.reset();
        assert_eq!(stats.bytes_received(), 0);

        stats.record_received(7);
        assert_eq!(stats.bytes_received(), 7);
    }

    #[test]
    fn test_counter_is_shared_across_threads() {
        use std::sync::Arc;

        let stats = Arc::new(TransferStats::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_received(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.bytes_received(), 4000);
    }
}
