use std::{
    cmp::Ordering,
    time::{Duration, Instant},
};

/// One block request sent to the peer and not answered yet.
///
/// Slots compare by `(index, begin, length)` only.
#[derive(Debug, Clone, Copy)]
pub struct RequestSlot {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
    pub block_index: u32,
    pub dispatched_at: Instant,
}

impl RequestSlot {
    pub fn new(index: u32, begin: u32, length: u32, block_index: u32) -> Self {
        Self {
            index,
            begin,
            length,
            block_index,
            dispatched_at: Instant::now(),
        }
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.index, self.begin, self.length)
    }

    pub fn matches(&self, index: u32, begin: u32, length: u32) -> bool {
        self.key() == (index, begin, length)
    }

    pub fn is_timeout(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.dispatched_at) >= timeout
    }

    pub fn latency(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.dispatched_at)
    }
}

impl PartialEq for RequestSlot {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RequestSlot {}

impl PartialOrd for RequestSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for RequestSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "index={} begin={} length={} block={}",
            self.index, self.begin, self.length, self.block_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_block_and_time() {
        let a = RequestSlot::new(1, 16384, 16384, 1);
        let mut b = RequestSlot::new(1, 16384, 16384, 7);
        b.dispatched_at += Duration::from_secs(5);
        assert_eq!(a, b);
        assert!(RequestSlot::new(1, 0, 16384, 0) < a);
        assert!(a < RequestSlot::new(2, 0, 16384, 0));
    }

    #[test]
    fn test_timeout() {
        let s = RequestSlot::new(0, 0, 16384, 0);
        let timeout = Duration::from_secs(60);
        assert!(!s.is_timeout(s.dispatched_at + Duration::from_secs(59), timeout));
        assert!(s.is_timeout(s.dispatched_at + timeout, timeout));
    }
}
