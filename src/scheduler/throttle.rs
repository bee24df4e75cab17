//! Global minimum spacing between replies.

/// Grants reply slots at least `min_interval_ms` apart.
#[derive(Debug, Clone)]
pub struct ResponseThrottle {
    min_interval_ms: u64,
    last_slot_ms: Option<u64>,
}

impl ResponseThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_slot_ms: None,
        }
    }

    /// Reserve a reply slot at `now_ms`, or `None` if too soon after the last one.
    pub fn try_acquire(&mut self, now_ms: u64) -> Option<u64> {
        if let Some(last) = self.last_slot_ms {
            // A clock stepping backwards never yields a slot.
            if now_ms < last || now_ms - last < self.min_interval_ms {
                return None;
            }
        }
        self.last_slot_ms = Some(now_ms);
        Some(now_ms)
    }

    pub fn last_slot_ms(&self) -> Option<u64> {
        self.last_slot_ms
    }
}
