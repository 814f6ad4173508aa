use std::time::Duration;

/// How long a read may rely on each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Lifetime of the memory-tier entry.
    pub ttl: Duration,
    /// Oldest durable record still served (and then refreshed in the background).
    pub max_durable_age: Duration,
}

impl FetchPolicy {
    /// Results change during an event day; keep them short-lived.
    pub const RESULTS: FetchPolicy = FetchPolicy::uniform(Duration::from_secs(300));

    /// Houses and standings change rarely.
    pub const HOUSES: FetchPolicy = FetchPolicy::uniform(Duration::from_secs(3600));

    pub const fn new(ttl: Duration, max_durable_age: Duration) -> Self {
        Self {
            ttl,
            max_durable_age,
        }
    }

    pub const fn uniform(duration: Duration) -> Self {
        Self::new(duration, duration)
    }
}

/// Whether `set` also writes the value to the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Session-scoped state that should not outlive the process.
    #[default]
    MemoryOnly,
    Durable,
}
