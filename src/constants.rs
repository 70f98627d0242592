use std::time::Duration;

/// Separates a watched key from the per-instance suffix on the store.
pub(crate) const DELIMITER: char = '/';

/// Joins sorted endpoints into a cluster identity.
pub(crate) const ENDPOINTS_SEPARATOR: &str = ",";

/// Lease time-to-live for published keys.
pub(crate) const TIME_TO_LIVE_SECS: i64 = 10;

/// Pause between full-load retries; fixed, no backoff growth.
pub(crate) const COOL_DOWN_INTERVAL: Duration = Duration::from_secs(1);
