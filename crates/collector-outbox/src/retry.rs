//! Retry classification for terminal delivery statuses.

use crate::config::OutboxConfig;

/// Decide whether a failed delivery attempt should be retried.
///
/// In order: a successful status is never retried; with the global retry
/// switch off nothing is; a status on the explicit retry list always is,
/// even if it also appears on the don't-retry list; everything else is
/// retried unless the don't-retry list names it.
pub fn should_retry(status: u16, config: &OutboxConfig) -> bool {
    if (200..300).contains(&status) {
        return false;
    }
    if !config.retry_failed_requests {
        return false;
    }
    if config.retry_status_codes.contains(&status) {
        return true;
    }
    !config.dont_retry_status_codes.contains(&status)
}
