use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared transfer accounting: an add-only atomic byte counter plus the
/// wall-clock start of the transfer.
///
/// Workers add completed chunk lengths concurrently; the progress printer
/// reads snapshots. A retried chunk may be counted more than once, which is
/// a display-only artifact.
pub struct TransferStats {
    transferred: AtomicU64,
    total_bytes: u64,
    started: Instant,
}

impl TransferStats {
    /// Creates stats for a transfer of `total_bytes`, seeded with
    /// `resumed_bytes` already present in the staging file.
    pub fn new(total_bytes: u64, resumed_bytes: u64) -> Self {
        Self {
            transferred: AtomicU64::new(resumed_bytes),
            total_bytes,
            started: Instant::now(),
        }
    }

    /// Records `bytes` transferred.
    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes transferred so far (including resumed bytes).
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Total bytes of the archive.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Whole-number percentage complete.
    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            return 100;
        }
        self.transferred() * 100 / self.total_bytes
    }

    /// Average speed in KB/s since the transfer started.
    pub fn kb_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.transferred() as f64 / elapsed / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_seed() {
        let stats = TransferStats::new(100, 40);
        assert_eq!(stats.transferred(), 40);
        assert_eq!(stats.percent(), 40);
    }

    #[test]
    fn add_accumulates() {
        let stats = TransferStats::new(100, 0);
        stats.add(30);
        stats.add(20);
        assert_eq!(stats.transferred(), 50);
        assert_eq!(stats.percent(), 50);
    }

    #[test]
    fn percent_empty_archive_is_complete() {
        let stats = TransferStats::new(0, 0);
        assert_eq!(stats.percent(), 100);
    }

    #[test]
    fn speed_is_finite() {
        let stats = TransferStats::new(1024, 0);
        stats.add(1024);
        std::thread::sleep(std::time::Duration::from_millis(10));
        let speed = stats.kb_per_sec();
        assert!(speed.is_finite());
        assert!(speed > 0.0);
    }

    #[test]
    fn concurrent_adds() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(TransferStats::new(100_000, 0));
        let mut handles = vec![];
        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.add(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.transferred(), 1000);
    }
}
