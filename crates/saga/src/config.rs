use std::time::Duration;

use common::RetryPolicy;

/// Settings for calls the coordinator makes to its collaborators.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound for a single reservation or publish call.
    pub call_timeout: Duration,
    /// Backoff for infrastructure failures before the saga is marked stuck.
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(2),
            retry: RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(5)),
        }
    }
}

/// Settings for the reservation expiry sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Due reservations fetched per page.
    pub page_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            page_size: 100,
        }
    }
}
