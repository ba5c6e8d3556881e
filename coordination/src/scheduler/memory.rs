//! Host memory gate for admission

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Source of available host memory
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently available, or `None` when unknown.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from `/proc/meminfo`
#[derive(Debug, Clone, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        match std::fs::read_to_string("/proc/meminfo") {
            Ok(content) => parse_mem_available(&content),
            Err(e) => {
                debug!(error = %e, "Memory probe unavailable; admission not gated");
                None
            }
        }
    }
}

/// `MemAvailable` in bytes from meminfo text
pub fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Adjustable probe for tests and embedding
#[derive(Debug, Clone)]
pub struct FixedMemory {
    bytes: Arc<AtomicU64>,
}

impl FixedMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

/// Whether admission may proceed; unknown memory never blocks.
pub fn has_headroom(probe: &dyn MemoryProbe, min_free_bytes: u64) -> bool {
    probe
        .available_bytes()
        .map_or(true, |available| available >= min_free_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16318480 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_mem_available(sample), Some(8_000_000 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_headroom() {
        let probe = FixedMemory::new(100);
        assert!(has_headroom(&probe, 100));
        probe.set(99);
        assert!(!has_headroom(&probe, 100));
    }

    struct Unknown;
    impl MemoryProbe for Unknown {
        fn available_bytes(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn test_unknown_memory_allows() {
        assert!(has_headroom(&Unknown, u64::MAX));
    }
}
