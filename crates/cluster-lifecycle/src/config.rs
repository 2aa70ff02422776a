//! Lifecycle manager configuration

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Timeouts and sweep sizing used by the manager.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a cluster may stay in preparing-for-installation
    pub prepare_timeout: Duration,
    /// How long installation may run before the cluster is failed
    pub install_timeout: Duration,
    /// How long finalizing may run before the cluster is failed
    pub finalizing_timeout: Duration,
    /// How long log collection may run once started
    pub log_collection_timeout: Duration,
    /// How long to wait for log collection to start
    pub log_pending_timeout: Duration,
    /// DHCP VIP lease allocation window after the machine network is set
    pub dhcp_lease_timeout: Duration,
    /// Page size of the monitoring sweep
    pub monitor_batch_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(10 * 60),
            install_timeout: Duration::from_secs(24 * 60 * 60),
            finalizing_timeout: Duration::from_secs(5 * 60 * 60),
            log_collection_timeout: Duration::from_secs(60 * 60),
            log_pending_timeout: Duration::from_secs(10 * 60),
            dhcp_lease_timeout: Duration::from_secs(2 * 60),
            monitor_batch_size: 100,
        }
    }
}

/// `at + d`, clamped to the latest representable instant
pub(crate) fn after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - d`, clamped to the earliest representable instant
pub(crate) fn before(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_within_range() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::from_secs(60)), now + chrono::Duration::seconds(60));
        assert_eq!(before(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
    }

    #[test]
    fn test_huge_offsets_clamp() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(before(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        // Representable as a chrono duration but past the end of the calendar
        let ten_million_years = Duration::from_secs(10_000_000 * 365 * 24 * 60 * 60);
        assert_eq!(after(now, ten_million_years), DateTime::<Utc>::MAX_UTC);
        assert_eq!(before(now, ten_million_years), DateTime::<Utc>::MIN_UTC);
    }
}
