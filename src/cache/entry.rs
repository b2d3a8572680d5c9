//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

/// Upper bound applied when `now + ttl` does not fit in an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// == Cache Entry ==
/// Represents a single cache entry with value and expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Instant at which the entry stops being served
    pub expires_at: Instant,
    /// Position of the key in the store's sampling index
    pub(crate) slot: usize,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry expiring `ttl` after `now`.
    pub fn new(value: V, ttl: Duration, now: Instant, slot: usize) -> Self {
        Self {
            value,
            expires_at: deadline(now, ttl),
            slot,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`, so
    /// a zero TTL is never served.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Replaces the value and restarts the TTL clock.
    pub(crate) fn refresh(&mut self, value: V, ttl: Duration, now: Instant) {
        self.value = value;
        self.expires_at = deadline(now, ttl);
    }
}

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .unwrap_or_else(|| now + MAX_TTL)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new("value", Duration::from_secs(1), Instant::now(), 0);
        assert!(!entry.is_expired_at(Instant::now()));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!entry.is_expired_at(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired_at(Instant::now()));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = CacheEntry::new("test", Duration::ZERO, now, 0);

        assert!(entry.is_expired_at(now), "Entry should be expired at boundary");
    }

    #[test]
    fn test_refresh_resets_deadline() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(1, Duration::from_secs(1), now, 3);

        let later = now + Duration::from_secs(5);
        entry.refresh(2, Duration::from_secs(1), later);

        assert_eq!(entry.value, 2);
        assert_eq!(entry.slot, 3);
        assert!(!entry.is_expired_at(later));
        assert!(entry.is_expired_at(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let now = Instant::now();
        let entry = CacheEntry::new((), Duration::MAX, now, 0);
        assert!(!entry.is_expired_at(now));
    }
}
