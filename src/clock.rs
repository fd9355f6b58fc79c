//! Time and randomness providers used when building records.

/// Source of record timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Source of the random `_track_id` each record carries for server-side
/// de-duplication.
pub trait RandomSource: Send + Sync {
    fn track_id(&self) -> u32;
}

/// Draws track ids from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn track_id(&self) -> u32 {
        rand::random()
    }
}
