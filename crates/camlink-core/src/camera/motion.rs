//! Motion detection state
//!
//! The camera answers COMM_MOTION_STATUS with whether comm-motion reporting is
//! on. Callers that poll it often can opt into a short cache; with a zero TTL
//! every read goes to the camera.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
/// Motion detection status with a time to live. A zero TTL caches nothing.
pub struct MotionCache {
    ttl: Duration,
    entry: Option<(bool, Instant)>,
}

impl MotionCache {
    /// Empty cache
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Configured time to live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if it is younger than the TTL
    pub fn get(&self) -> Option<bool> {
        match self.entry {
            Some((enabled, stored)) if stored.elapsed() < self.ttl => Some(enabled),
            _ => None,
        }
    }

    /// Remember a value just read from or written to the camera
    pub fn store(&mut self, enabled: bool) {
        if !self.ttl.is_zero() {
            self.entry = Some((enabled, Instant::now()));
        }
    }

    /// Forget the cached value
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_never_caches() {
        let mut cache = MotionCache::new(Duration::ZERO);
        cache.store(true);
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn test_value_expires() {
        let mut cache = MotionCache::new(Duration::from_millis(20));
        cache.store(true);
        assert_eq!(cache.get(), Some(true));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = MotionCache::new(Duration::from_secs(60));
        cache.store(false);
        assert_eq!(cache.get(), Some(false));
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
