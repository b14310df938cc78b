//! Ban domain core.
//!
//! Shared types for ban classification plus the detector and the recovery
//! state machine built on top of them.

pub mod classifier;
pub mod recovery;

use std::time::Duration;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Why a response was judged to be a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanReason {
    None,
    Ip,
    RateLimit,
    Fingerprint,
    Behavioral,
    Unknown,
}

impl BanReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BanReason::None => "none",
            BanReason::Ip => "ip",
            BanReason::RateLimit => "rate_limit",
            BanReason::Fingerprint => "fingerprint",
            BanReason::Behavioral => "behavioral",
            BanReason::Unknown => "unknown",
        }
    }
}

/// Severity scale shared by mined patterns and alerts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Borrowed view of a completed response handed to the classifier.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSummary<'a> {
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub body_size: usize,
    pub latency: Duration,
}

/// Verdict emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanClassification {
    pub is_banned: bool,
    pub reason: BanReason,
    /// Always within [0, 100].
    pub confidence: u8,
}

impl BanClassification {
    pub fn clean() -> Self {
        Self {
            is_banned: false,
            reason: BanReason::None,
            confidence: 0,
        }
    }

    /// Alert severity implied by this verdict.
    pub fn severity(&self) -> Severity {
        if !self.is_banned {
            return Severity::Low;
        }
        match (self.reason, self.confidence) {
            (BanReason::Unknown, _) => Severity::Critical,
            (_, c) if c > 90 => Severity::Critical,
            (_, c) if c > 70 => Severity::High,
            (_, c) if c > 40 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}
