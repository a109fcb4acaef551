//! Rate limiting for local position updates.

/// Lets at most one update through per `interval_ms`.
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    interval_ms: i64,
    last_ms: Option<i64>,
}

impl PublishThrottle {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms: interval_ms.max(0),
            last_ms: None,
        }
    }

    /// Build from a rate in Hz. Zero is treated as 1 Hz.
    pub fn from_rate_hz(rate_hz: u32) -> Self {
        Self::new(1_000 / i64::from(rate_hz.max(1)))
    }

    /// Returns `true` and records `now_ms` if an update may go out now.
    pub fn ready(&mut self, now_ms: i64) -> bool {
        match self.last_ms {
            Some(last) if now_ms - last < self.interval_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }

    /// Forget the last publish so the next call to [`ready`](Self::ready) passes.
    pub fn reset(&mut self) {
        self.last_ms = None;
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }
}
