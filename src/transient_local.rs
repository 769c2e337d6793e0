//! Transient-local history: the bounded ring of recently published frames
//! that is replayed to every newly connected subscriber.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer_pool::PooledBuffer;

/// Durability settings for a publisher.
///
/// With `buffer_max_count == 0` the publisher keeps no history and late
/// joiners only see messages published after they connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientLocalSetting {
    /// Maximum number of framed messages retained for replay.
    pub buffer_max_count: usize,
    /// Maximum age of a retained message. [`Duration::ZERO`] disables the
    /// time-based eviction arm; messages then only fall out by count.
    pub lifespan: Duration,
}

impl TransientLocalSetting {
    /// Keep the `count` most recent messages, evicting those older than
    /// `lifespan` (pass [`Duration::ZERO`] for no age limit).
    pub fn new(count: usize, lifespan: Duration) -> Self {
        Self {
            buffer_max_count: count,
            lifespan,
        }
    }

    /// No history: late joiners receive nothing published before they
    /// connected.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Keep the `count` most recent messages with no age limit.
    pub fn keep_last(count: usize) -> Self {
        Self::new(count, Duration::ZERO)
    }

    /// Whether any history is retained at all.
    pub fn is_enabled(&self) -> bool {
        self.buffer_max_count > 0
    }
}

impl Default for TransientLocalSetting {
    fn default() -> Self {
        Self::disabled()
    }
}

/// One retained framed message.
#[derive(Debug)]
pub(crate) struct TransientLocalElement {
    /// The complete frame (header + payload) as it went out on the wire.
    pub buffer: Arc<PooledBuffer>,
    /// When the element entered the ring.
    pub enqueued_at: Instant,
}

/// Evict from the front until the ring satisfies both limits.
///
/// One front pop per iteration, conditions re-evaluated after each pop, so
/// the pass stops at the first element that is both young enough and within
/// the count bound.
pub(crate) fn purge_expired(
    ring: &mut VecDeque<TransientLocalElement>,
    setting: &TransientLocalSetting,
    now: Instant,
) {
    loop {
        let over_count = ring.len() > setting.buffer_max_count;
        let front_expired = setting.lifespan > Duration::ZERO
            && ring
                .front()
                .is_some_and(|element| now.duration_since(element.enqueued_at) > setting.lifespan);
        if !over_count && !front_expired {
            break;
        }
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;

    fn element(pool: &Arc<BufferPool>, payload: &[u8], enqueued_at: Instant) -> TransientLocalElement {
        let mut buffer = pool.allocate();
        buffer.extend_from_slice(payload);
        TransientLocalElement {
            buffer: Arc::new(buffer),
            enqueued_at,
        }
    }

    #[test]
    fn test_setting_constructors() {
        assert!(!TransientLocalSetting::disabled().is_enabled());
        assert!(!TransientLocalSetting::default().is_enabled());
        assert!(TransientLocalSetting::keep_last(3).is_enabled());
        assert_eq!(TransientLocalSetting::keep_last(3).lifespan, Duration::ZERO);

        let setting = TransientLocalSetting::new(10, Duration::from_millis(50));
        assert_eq!(setting.buffer_max_count, 10);
        assert_eq!(setting.lifespan, Duration::from_millis(50));
    }

    #[test]
    fn test_purge_by_count() {
        let pool = BufferPool::new();
        let setting = TransientLocalSetting::keep_last(3);
        let base = Instant::now();

        let mut ring = VecDeque::new();
        for i in 0..5u8 {
            ring.push_back(element(&pool, &[i], base));
        }

        purge_expired(&mut ring, &setting, base);
        assert_eq!(ring.len(), 3);
        // Oldest two were evicted.
        assert_eq!((*ring.front().unwrap().buffer).as_ref(), &[2]);
        assert_eq!((*ring.back().unwrap().buffer).as_ref(), &[4]);
    }

    #[test]
    fn test_purge_by_lifespan() {
        let pool = BufferPool::new();
        let setting = TransientLocalSetting::new(10, Duration::from_millis(50));
        let base = Instant::now();

        let mut ring = VecDeque::new();
        ring.push_back(element(&pool, b"old", base));
        ring.push_back(element(&pool, b"fresh", base + Duration::from_millis(80)));

        purge_expired(&mut ring, &setting, base + Duration::from_millis(100));
        assert_eq!(ring.len(), 1);
        assert_eq!((*ring.front().unwrap().buffer).as_ref(), b"fresh");
    }

    #[test]
    fn test_zero_lifespan_disables_age_arm() {
        let pool = BufferPool::new();
        let setting = TransientLocalSetting::keep_last(10);
        let base = Instant::now();

        let mut ring = VecDeque::new();
        ring.push_back(element(&pool, b"ancient", base));

        purge_expired(&mut ring, &setting, base + Duration::from_secs(3600));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_purge_applies_both_arms() {
        let pool = BufferPool::new();
        let setting = TransientLocalSetting::new(2, Duration::from_millis(50));
        let base = Instant::now();

        // Four elements: the first expired, the rest fresh. The count bound
        // still evicts one more after the age arm is satisfied.
        let mut ring = VecDeque::new();
        ring.push_back(element(&pool, b"expired", base));
        ring.push_back(element(&pool, b"a", base + Duration::from_millis(90)));
        ring.push_back(element(&pool, b"b", base + Duration::from_millis(95)));
        ring.push_back(element(&pool, b"c", base + Duration::from_millis(99)));

        purge_expired(&mut ring, &setting, base + Duration::from_millis(100));
        assert_eq!(ring.len(), 2);
        assert_eq!((*ring.front().unwrap().buffer).as_ref(), b"b");
    }

    #[test]
    fn test_purge_empty_ring() {
        let setting = TransientLocalSetting::new(2, Duration::from_millis(50));
        let mut ring = VecDeque::new();
        purge_expired(&mut ring, &setting, Instant::now());
        assert!(ring.is_empty());
    }
}
