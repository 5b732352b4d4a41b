use crate::types::BlockHeight;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically non-decreasing height, safe under concurrent writers
#[derive(Debug, Default)]
pub struct Watermark(AtomicU64);

impl Watermark {
    pub fn new(initial: BlockHeight) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Raises the watermark to `height` if it is higher; returns whether it moved
    pub fn observe(&self, height: BlockHeight) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        while height > current {
            match self
                .0
                .compare_exchange_weak(current, height, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub fn get(&self) -> BlockHeight {
        self.0.load(Ordering::Acquire)
    }
}

/// Process-wide heights exposed as gauges
#[derive(Debug, Default)]
pub struct Watermarks {
    /// Highest block header seen
    pub current_height: Watermark,
    /// Highest block carrying an observed oracle request
    pub last_request: Watermark,
    /// Highest block carrying a matched fulfillment
    pub last_fulfillment: Watermark,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_out_of_order_keeps_maximum() {
        let mark = Watermark::default();
        let moved: Vec<bool> = [50, 48, 52, 49].iter().map(|h| mark.observe(*h)).collect();

        assert_eq!(moved, vec![true, false, true, false]);
        assert_eq!(mark.get(), 52);
    }

    #[test]
    fn test_equal_height_does_not_move() {
        let mark = Watermark::new(10);
        assert!(!mark.observe(10));
        assert_eq!(mark.get(), 10);
    }

    #[test]
    fn test_concurrent_writers_never_regress() {
        let mark = Arc::new(Watermark::default());

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let mark = mark.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let h = if i % 2 == 0 { i * 8 + t } else { 8_000 - i };
                        mark.observe(h);
                        assert!(mark.get() >= h);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mark.get(), 7_999);
    }
}
