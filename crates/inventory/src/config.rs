use std::time::Duration;

/// Tunables for the reservation manager.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// How long a Pending reservation holds stock before it may be expired.
    pub ttl: Duration,
    /// Read-compute-write attempts before a contended operation gives up.
    pub max_cas_attempts: u32,
}

impl ReservationConfig {
    pub fn new(ttl: Duration, max_cas_attempts: u32) -> Self {
        Self {
            ttl,
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    pub(crate) fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(900), 16)
    }
}
