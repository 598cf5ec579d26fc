use std::sync::atomic::{AtomicU64, Ordering};

/// Time-derived message ids (Unix milliseconds), forced strictly increasing
/// within one generator so two sends in the same millisecond stay distinct.
#[derive(Debug, Default)]
pub struct MessageIdGen {
    last: AtomicU64,
}

impl MessageIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for a message created at `now_ms`.
    pub fn next_at(&self, now_ms: u64) -> u64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn next(&self) -> u64 {
        let now_ms = crate::time_utils::now().timestamp_millis().max(0) as u64;
        self.next_at(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_follow_clock() {
        let ids = MessageIdGen::new();
        assert_eq!(ids.next_at(1_000), 1_000);
        assert_eq!(ids.next_at(5_000), 5_000);
    }

    #[test]
    fn test_ids_strictly_increase_within_same_millisecond() {
        let ids = MessageIdGen::new();
        let a = ids.next_at(42);
        let b = ids.next_at(42);
        let c = ids.next_at(10); // clock went backwards
        assert!(a < b && b < c);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(MessageIdGen::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_at(7)).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
    }
}
