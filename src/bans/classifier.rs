//! Multi-signal ban classification.
//!
//! Scores a completed response against status, timing, and header signals and
//! emits a confidence-weighted verdict. Deterministic given its input; all
//! state lives with the caller.

use std::time::Duration;

use http::HeaderName;
use once_cell::sync::Lazy;

use super::{BanClassification, BanReason, ResponseSummary};

/// Vendor-specific block headers whose mere presence raises suspicion.
static SUSPICIOUS_HEADERS: Lazy<Vec<HeaderName>> = Lazy::new(|| {
    [
        "cf-mitigated",
        "x-datadome",
        "x-px-block",
        "x-distil-cs",
        "x-akamai-block",
        "x-waf-event",
        "x-amzn-waf-action",
    ]
    .iter()
    .copied()
    .map(HeaderName::from_static)
    .collect()
});

/// Responses faster than this for a non-200 status suggest an edge-layer
/// rejection rather than origin processing.
const FAST_REJECTION: Duration = Duration::from_millis(100);

/// Non-200 bodies smaller than this are implausibly small for a real error
/// page.
const MIN_PLAUSIBLE_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub fast_rejection: Duration,
    pub min_plausible_body: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fast_rejection: FAST_REJECTION,
            min_plausible_body: MIN_PLAUSIBLE_BODY,
        }
    }
}

/// Stateless response classifier.
#[derive(Debug, Default)]
pub struct BanDetector {
    config: DetectorConfig,
}

impl BanDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Classify a completed response.
    pub fn classify(&self, response: &ResponseSummary<'_>) -> BanClassification {
        let (is_banned, reason, mut confidence) = match response.status {
            403 => (true, BanReason::Ip, 95u32),
            429 => (true, BanReason::RateLimit, 90),
            502 | 503 => (true, BanReason::Unknown, 70),
            _ => (false, BanReason::None, 0),
        };

        if response.status != 200 && response.latency < self.config.fast_rejection {
            confidence += 20;
        }

        confidence += 15 * self.suspicious_header_count(response) as u32;

        if response.status != 200 && response.body_size < self.config.min_plausible_body {
            confidence += 10;
        }

        BanClassification {
            is_banned,
            reason,
            confidence: confidence.min(100) as u8,
        }
    }

    /// Safe default for exchanges that never produced a parsable response.
    pub fn classify_transport_failure(&self) -> BanClassification {
        BanClassification {
            is_banned: true,
            reason: BanReason::Unknown,
            confidence: 50,
        }
    }

    fn suspicious_header_count(&self, response: &ResponseSummary<'_>) -> usize {
        SUSPICIOUS_HEADERS
            .iter()
            .filter(|name| response.headers.contains_key(*name))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    fn summary(status: u16, headers: &HeaderMap, body_size: usize, latency_ms: u64) -> ResponseSummary<'_> {
        ResponseSummary {
            status,
            headers,
            body_size,
            latency: Duration::from_millis(latency_ms),
        }
    }

    #[test]
    fn clean_response_is_not_banned() {
        let headers = HeaderMap::new();
        let detector = BanDetector::default();
        let verdict = detector.classify(&summary(200, &headers, 20_000, 450));
        assert!(!verdict.is_banned);
        assert_eq!(verdict.reason, BanReason::None);
        assert_eq!(verdict.confidence, 0);
    }

    #[test]
    fn forbidden_with_fast_rejection_and_block_header_clamps_to_100() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-mitigated", HeaderValue::from_static("challenge"));
        let detector = BanDetector::default();
        // 95 + 20 (fast) + 15 (header) + 10 (tiny body) would overflow the scale.
        let verdict = detector.classify(&summary(403, &headers, 120, 50));
        assert!(verdict.is_banned);
        assert_eq!(verdict.reason, BanReason::Ip);
        assert_eq!(verdict.confidence, 100);
    }

    #[test]
    fn rate_limit_status_maps_to_rate_limit_reason() {
        let headers = HeaderMap::new();
        let detector = BanDetector::default();
        let verdict = detector.classify(&summary(429, &headers, 4_000, 800));
        assert!(verdict.is_banned);
        assert_eq!(verdict.reason, BanReason::RateLimit);
        assert_eq!(verdict.confidence, 90);
    }

    #[test]
    fn gateway_errors_are_low_confidence_unknown() {
        let headers = HeaderMap::new();
        let detector = BanDetector::default();
        let verdict = detector.classify(&summary(503, &headers, 8_000, 2_000));
        assert_eq!(verdict.reason, BanReason::Unknown);
        assert_eq!(verdict.confidence, 70);
    }

    #[test]
    fn transport_failure_defaults_to_moderate_unknown() {
        let detector = BanDetector::default();
        let verdict = detector.classify_transport_failure();
        assert!(verdict.is_banned);
        assert_eq!(verdict.reason, BanReason::Unknown);
        assert_eq!(verdict.confidence, 50);
    }
}
