//! Transport capability probing and mode resolution.
//!
//! The transport mode is resolved exactly once at construction from the
//! requested method and the environment's capabilities, and never changes
//! for the queue's lifetime.

use crate::config::{EventMethod, OutboxConfig};

/// Environment capability probes consulted once at construction.
#[derive(Debug, Clone)]
pub struct TransportCapabilities {
    /// A fire-and-forget beacon channel exists.
    pub beacon: bool,
    /// Cross-origin request support exists.
    pub cors_requests: bool,
    /// User-agent string, consulted for the beacon defect denylist.
    pub user_agent: String,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            beacon: true,
            cors_requests: true,
            user_agent: String::new(),
        }
    }
}

/// How GET records leave the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetVia {
    /// A request with headers and an observable status.
    Request,
    /// A pixel fetch: only load/error are observable, no status.
    Pixel,
}

/// The queue's delivery mode, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Batched POST delivery, optionally with the beacon fast-path.
    Post {
        /// Attempt beacon delivery before falling back to a request.
        beacon: bool,
    },
    /// Single-record GET delivery.
    Get {
        /// The resolved GET technique.
        via: GetVia,
    },
}

impl TransportMode {
    /// Mode tag used to namespace the persisted queue slot.
    pub fn tag(&self) -> &'static str {
        match self {
            TransportMode::Post { .. } => "post",
            TransportMode::Get { .. } => "get",
        }
    }

    /// Whether this is the batched POST mode.
    pub fn is_post(&self) -> bool {
        matches!(self, TransportMode::Post { .. })
    }
}

/// Resolution output: the immutable mode plus the queue policy it implies.
#[derive(Debug, Clone)]
pub struct ResolvedTransport {
    /// The delivery mode for the queue's lifetime.
    pub mode: TransportMode,
    /// Effective drain trigger threshold after the batching-safety rules.
    pub buffer_size: usize,
    /// Whether caller-supplied headers may be attached to requests.
    pub custom_headers_enabled: bool,
}

/// Resolve the transport mode from the requested method and capabilities.
///
/// Priority order: an explicit GET request wins; without request support
/// POST is impossible and GET remains; otherwise POST, with the beacon
/// fast-path only when it was requested, is supported, and the user agent
/// is not on the defect denylist.
///
/// Requesting beacon disables custom headers outright: a beacon cannot
/// carry them, and attaching them only on the fallback request path would
/// behave differently per environment.
///
/// Batching through persisted storage is only safe in POST mode with a
/// durable backend, so the buffer size is forced to 1 everywhere else.
pub fn resolve_transport(
    config: &OutboxConfig,
    capabilities: &TransportCapabilities,
    storage_available: bool,
) -> ResolvedTransport {
    let requested = config.event_method;

    let mode = if requested == Some(EventMethod::Get) || !capabilities.cors_requests {
        TransportMode::Get {
            via: resolve_get_via(capabilities, config.anonymous_tracking),
        }
    } else {
        let beacon = requested == Some(EventMethod::Beacon)
            && capabilities.beacon
            && !has_defective_beacon(&capabilities.user_agent);
        TransportMode::Post { beacon }
    };

    let custom_headers_enabled = requested != Some(EventMethod::Beacon);

    let buffer_size = if mode.is_post() && storage_available {
        config.buffer_size.max(1)
    } else {
        1
    };

    ResolvedTransport {
        mode,
        buffer_size,
        custom_headers_enabled,
    }
}

/// Pick the GET technique.
///
/// The pixel path cannot carry the anonymity header, so anonymous tracking
/// always resolves to the request path.
fn resolve_get_via(capabilities: &TransportCapabilities, anonymous_tracking: bool) -> GetVia {
    if capabilities.cors_requests || anonymous_tracking {
        GetVia::Request
    } else {
        GetVia::Pixel
    }
}

/// Whether this user agent ships a beacon transport known to silently drop
/// or duplicate payloads: iOS up to 13, and the matching desktop Safari
/// releases.
///
/// Best-effort heuristic over a major-version parse; version-boundary
/// precision is not guaranteed.
pub fn has_defective_beacon(user_agent: &str) -> bool {
    ios_major(user_agent).is_some_and(|major| major <= 13)
        || macos_safari_major(user_agent).is_some_and(|major| major <= 13)
}

fn ios_major(user_agent: &str) -> Option<u32> {
    let start = user_agent
        .find("iPhone OS ")
        .map(|i| i + "iPhone OS ".len())
        .or_else(|| user_agent.find("CPU OS ").map(|i| i + "CPU OS ".len()))?;
    leading_number(&user_agent[start..])
}

fn macos_safari_major(user_agent: &str) -> Option<u32> {
    if !user_agent.contains("Macintosh")
        || !user_agent.contains("Safari")
        || user_agent.contains("Chrome")
    {
        return None;
    }
    let start = user_agent.find("Version/").map(|i| i + "Version/".len())?;
    leading_number(&user_agent[start..])
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IOS_13_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 13_3 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.4 Mobile/15E148 Safari/604.1";
    const IOS_14_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_2 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.1 Mobile/15E148 Safari/604.1";
    const IPAD_12_UA: &str = "Mozilla/5.0 (iPad; CPU OS 12_4 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/12.1.2 Mobile/15E148 Safari/604.1";
    const MAC_SAFARI_13_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_3) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.5 Safari/605.1.15";
    const MAC_SAFARI_15_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15";
    const MAC_CHROME_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.55 Safari/537.36";

    fn config_with(method: Option<EventMethod>) -> OutboxConfig {
        OutboxConfig {
            event_method: method,
            buffer_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_defective_beacon_denylist() {
        assert!(has_defective_beacon(IOS_13_UA));
        assert!(has_defective_beacon(IPAD_12_UA));
        assert!(has_defective_beacon(MAC_SAFARI_13_UA));
        assert!(!has_defective_beacon(IOS_14_UA));
        assert!(!has_defective_beacon(MAC_SAFARI_15_UA));
        assert!(!has_defective_beacon(MAC_CHROME_UA));
        assert!(!has_defective_beacon(""));
    }

    #[test]
    fn test_default_resolves_to_post_without_beacon() {
        let resolved = resolve_transport(&config_with(None), &TransportCapabilities::default(), true);
        assert_eq!(resolved.mode, TransportMode::Post { beacon: false });
        assert!(resolved.custom_headers_enabled);
    }

    #[test]
    fn test_beacon_requested_and_supported() {
        let resolved = resolve_transport(
            &config_with(Some(EventMethod::Beacon)),
            &TransportCapabilities::default(),
            true,
        );
        assert_eq!(resolved.mode, TransportMode::Post { beacon: true });
    }

    #[test]
    fn test_beacon_denied_for_denylisted_user_agent() {
        let capabilities = TransportCapabilities {
            user_agent: IOS_13_UA.to_string(),
            ..Default::default()
        };
        let resolved = resolve_transport(&config_with(Some(EventMethod::Beacon)), &capabilities, true);
        assert_eq!(resolved.mode, TransportMode::Post { beacon: false });
    }

    #[test]
    fn test_beacon_denied_without_beacon_support() {
        let capabilities = TransportCapabilities {
            beacon: false,
            ..Default::default()
        };
        let resolved = resolve_transport(&config_with(Some(EventMethod::Beacon)), &capabilities, true);
        assert_eq!(resolved.mode, TransportMode::Post { beacon: false });
    }

    #[test]
    fn test_beacon_request_disables_custom_headers() {
        let resolved = resolve_transport(
            &config_with(Some(EventMethod::Beacon)),
            &TransportCapabilities::default(),
            true,
        );
        assert!(!resolved.custom_headers_enabled);

        // Headers stay disabled even when the denylist forces the fallback.
        let capabilities = TransportCapabilities {
            user_agent: IOS_13_UA.to_string(),
            ..Default::default()
        };
        let resolved = resolve_transport(&config_with(Some(EventMethod::Beacon)), &capabilities, true);
        assert!(!resolved.custom_headers_enabled);
    }

    #[test]
    fn test_get_requested_uses_request_path_when_available() {
        let resolved = resolve_transport(&config_with(Some(EventMethod::Get)), &TransportCapabilities::default(), true);
        assert_eq!(resolved.mode, TransportMode::Get { via: GetVia::Request });
    }

    #[test]
    fn test_get_falls_back_to_pixel_without_request_support() {
        let capabilities = TransportCapabilities {
            cors_requests: false,
            ..Default::default()
        };
        let resolved = resolve_transport(&config_with(Some(EventMethod::Get)), &capabilities, true);
        assert_eq!(resolved.mode, TransportMode::Get { via: GetVia::Pixel });
    }

    #[test]
    fn test_no_request_support_forces_get_pixel() {
        let capabilities = TransportCapabilities {
            cors_requests: false,
            ..Default::default()
        };
        let resolved = resolve_transport(&config_with(Some(EventMethod::Post)), &capabilities, true);
        assert_eq!(resolved.mode, TransportMode::Get { via: GetVia::Pixel });
    }

    #[test]
    fn test_anonymous_tracking_never_resolves_pixel() {
        let capabilities = TransportCapabilities {
            cors_requests: false,
            ..Default::default()
        };
        let config = OutboxConfig {
            event_method: Some(EventMethod::Get),
            anonymous_tracking: true,
            ..Default::default()
        };
        let resolved = resolve_transport(&config, &capabilities, true);
        assert_eq!(resolved.mode, TransportMode::Get { via: GetVia::Request });
    }

    #[test]
    fn test_buffer_forced_to_one_without_storage() {
        let resolved = resolve_transport(&config_with(None), &TransportCapabilities::default(), false);
        assert_eq!(resolved.buffer_size, 1);
    }

    #[test]
    fn test_buffer_forced_to_one_in_get_mode() {
        let resolved = resolve_transport(&config_with(Some(EventMethod::Get)), &TransportCapabilities::default(), true);
        assert_eq!(resolved.buffer_size, 1);
    }

    #[test]
    fn test_buffer_kept_for_post_with_storage() {
        let resolved = resolve_transport(&config_with(None), &TransportCapabilities::default(), true);
        assert_eq!(resolved.buffer_size, 10);
    }
}
