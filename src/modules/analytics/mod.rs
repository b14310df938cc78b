//! Ban analytics: rolling outcome log, pattern mining, and forecasts.
//!
//! Every request outcome is appended to a bounded event log and immediately
//! mined by a set of independent detectors for recurring detection vectors.
//! Aggregate views and ban-probability predictions are answered from
//! immutable snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bans::{BanClassification, BanReason, Severity};
use crate::modules::persistence::{KeyValueStore, PersistenceError};
use crate::modules::proxy::RouteClass;

const OUTCOMES_KEY: &str = "analytics/outcomes";
const PATTERNS_KEY: &str = "analytics/patterns";

/// User-agent fragments that give automation frameworks away.
static AUTOMATION_KEYWORDS: &[&str] = &[
    "headless",
    "selenium",
    "puppeteer",
    "playwright",
    "phantomjs",
    "python-requests",
    "curl",
    "bot",
    "crawler",
    "spider",
];

/// One completed request, as recorded in the rolling log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub path: String,
    pub query: Option<String>,
    pub method: String,
    pub status: u16,
    pub route_endpoint: String,
    pub route_class: RouteClass,
    pub route_region: Option<String>,
    pub identity_id: String,
    pub user_agent: String,
    pub latency_ms: u64,
    pub reason: BanReason,
    pub confidence: u8,
    pub session_id: String,
    pub requests_in_session: u32,
    pub hour_of_day: u8,
    pub weekday: u8,
}

impl RequestOutcome {
    pub fn new(timestamp: DateTime<Utc>, url: &Url, method: &str, status: u16) -> Self {
        Self {
            timestamp,
            url: url.to_string(),
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
            method: method.to_string(),
            status,
            route_endpoint: String::new(),
            route_class: RouteClass::Datacenter,
            route_region: None,
            identity_id: String::new(),
            user_agent: String::new(),
            latency_ms: 0,
            reason: BanReason::None,
            confidence: 0,
            session_id: String::new(),
            requests_in_session: 0,
            hour_of_day: timestamp.hour() as u8,
            weekday: timestamp.weekday().num_days_from_monday() as u8,
        }
    }

    pub fn with_route(
        mut self,
        endpoint: impl Into<String>,
        class: RouteClass,
        region: Option<String>,
    ) -> Self {
        self.route_endpoint = endpoint.into();
        self.route_class = class;
        self.route_region = region;
        self
    }

    pub fn with_identity(
        mut self,
        id: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.identity_id = id.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_classification(mut self, classification: &BanClassification) -> Self {
        self.reason = classification.reason;
        self.confidence = classification.confidence;
        self
    }

    pub fn with_session(mut self, id: impl Into<String>, sequence: u32) -> Self {
        self.session_id = id.into();
        self.requests_in_session = sequence;
        self
    }

    pub fn is_banned(&self) -> bool {
        self.reason != BanReason::None
    }

    fn path_prefix(&self) -> String {
        path_prefix(&self.path)
    }
}

/// Mined detection vector, updated on every re-detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanPattern {
    pub id: String,
    pub description: String,
    pub frequency: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub severity: Severity,
    pub triggers: Vec<String>,
    pub mitigations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 3600),
            max_entries: 10_000,
        }
    }
}

/// Aggregate counters answered from a snapshot of the log.
#[derive(Debug, Clone)]
pub struct AnalyticsReport {
    pub total_requests: u64,
    pub total_bans: u64,
    pub bans_today: u64,
    pub bans_this_week: u64,
    pub bans_per_hour: [u32; 24],
    pub bans_per_weekday: [u32; 7],
    pub bans_by_region: HashMap<String, u32>,
    pub bans_by_identity: HashMap<String, u32>,
    pub bans_by_route_class: HashMap<RouteClass, u32>,
    pub top_banned_prefixes: Vec<(String, u32)>,
    pub mean_response_ms: f64,
    pub success_rate: f64,
    pub top_patterns: Vec<BanPattern>,
}

/// Candidate request submitted for a ban-probability forecast.
#[derive(Debug, Clone)]
pub struct CandidateRequest {
    pub url: String,
    pub identity_id: String,
    pub hour_of_day: u8,
    pub projected_request_count: u32,
}

#[derive(Debug, Clone)]
pub struct BanForecast {
    /// 0–100.
    pub probability: u8,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
struct AnalyticsState {
    retention: RetentionPolicy,
    log: VecDeque<RequestOutcome>,
    patterns: HashMap<String, BanPattern>,
}

/// Thread-safe analytics handle. Writers are serialized; readers work on
/// snapshots.
#[derive(Clone)]
pub struct BanAnalytics {
    inner: Arc<Mutex<AnalyticsState>>,
}

impl BanAnalytics {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AnalyticsState {
                retention,
                log: VecDeque::new(),
                patterns: HashMap::new(),
            })),
        }
    }

    /// Append an outcome and run every pattern detector over the updated log.
    /// The outcome's own timestamp is the reference "now" so replayed feeds
    /// behave deterministically.
    pub fn record(&self, outcome: RequestOutcome) {
        let mut state = self.inner.lock().expect("analytics lock poisoned");
        state.evict(outcome.timestamp);
        state.log.push_back(outcome);
        state.detect_patterns();
    }

    pub fn report(&self) -> AnalyticsReport {
        let state = self.inner.lock().expect("analytics lock poisoned");
        state.report(Utc::now())
    }

    pub fn predict(&self, candidate: &CandidateRequest) -> BanForecast {
        let state = self.inner.lock().expect("analytics lock poisoned");
        state.predict(candidate)
    }

    pub fn patterns(&self) -> Vec<BanPattern> {
        let state = self.inner.lock().expect("analytics lock poisoned");
        let mut patterns: Vec<_> = state.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        patterns
    }

    /// Evict log entries and patterns past the retention window.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let mut state = self.inner.lock().expect("analytics lock poisoned");
        state.evict(now);
        let horizon = chrono::Duration::from_std(state.retention.max_age)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        state
            .patterns
            .retain(|_, pattern| pattern.last_seen + horizon >= now);
    }

    /// Best-effort save of the log and pattern table.
    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
        let (outcomes, patterns) = {
            let state = self.inner.lock().expect("analytics lock poisoned");
            (
                serde_json::to_vec(&state.log.iter().collect::<Vec<_>>())?,
                serde_json::to_vec(&state.patterns)?,
            )
        };
        store.save(OUTCOMES_KEY, &outcomes)?;
        store.save(PATTERNS_KEY, &patterns)?;
        Ok(())
    }

    /// Best-effort restore; missing keys leave the state empty.
    pub fn restore(&self, store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
        let outcomes = store.load(OUTCOMES_KEY)?;
        let patterns = store.load(PATTERNS_KEY)?;
        let mut state = self.inner.lock().expect("analytics lock poisoned");
        if let Some(blob) = outcomes {
            let entries: Vec<RequestOutcome> = serde_json::from_slice(&blob)?;
            state.log = entries.into();
        }
        if let Some(blob) = patterns {
            state.patterns = serde_json::from_slice(&blob)?;
        }
        Ok(())
    }
}

impl Default for BanAnalytics {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl AnalyticsState {
    fn evict(&mut self, now: DateTime<Utc>) {
        let horizon = chrono::Duration::from_std(self.retention.max_age)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        while let Some(front) = self.log.front() {
            if front.timestamp + horizon < now {
                self.log.pop_front();
            } else {
                break;
            }
        }
        while self.log.len() >= self.retention.max_entries {
            self.log.pop_front();
        }
    }

    /// Run the six detectors against the freshly appended outcome.
    fn detect_patterns(&mut self) {
        let Some(current) = self.log.back().cloned() else {
            return;
        };
        if !current.is_banned() {
            return;
        }
        let now = current.timestamp;

        self.detect_temporal_clustering(&current, now);
        self.detect_peak_hour(&current, now);
        self.detect_url_specific(&current, now);
        self.detect_identity_specific(&current, now);
        self.detect_rate_patterns(&current, now);
        self.detect_regional(&current, now);
    }

    fn detect_temporal_clustering(&mut self, _current: &RequestOutcome, now: DateTime<Utc>) {
        let window = chrono::Duration::minutes(60);
        let recent_bans = self
            .log
            .iter()
            .filter(|entry| entry.is_banned() && entry.timestamp + window >= now)
            .count();
        if recent_bans >= 5 {
            self.upsert_pattern(
                "time_clustering",
                format!("{recent_bans} bans within the trailing hour"),
                Severity::High,
                vec!["ban_rate".into()],
                vec!["pause all sessions".into(), "rotate route and identity".into()],
                now,
            );
        }
    }

    fn detect_peak_hour(&mut self, current: &RequestOutcome, now: DateTime<Utc>) {
        let histogram = self.hour_histogram();
        let busiest = histogram.iter().copied().max().unwrap_or(0);
        let bucket = histogram[current.hour_of_day as usize];
        if busiest >= 3 && bucket as f32 >= busiest as f32 * 0.8 {
            self.upsert_pattern(
                "peak_hour_bans",
                format!(
                    "hour {:02}:00 accounts for {bucket} bans (busiest bucket: {busiest})",
                    current.hour_of_day
                ),
                Severity::Medium,
                vec!["hour_of_day".into()],
                vec!["shift traffic away from this hour".into()],
                now,
            );
        }
    }

    fn detect_url_specific(&mut self, current: &RequestOutcome, now: DateTime<Utc>) {
        let prefix = current.path_prefix();
        let matching = self
            .log
            .iter()
            .filter(|entry| entry.is_banned() && entry.path_prefix() == prefix)
            .count();
        if matching >= 3 {
            self.upsert_pattern(
                "url_specific_bans",
                format!("{matching} bans under path prefix {prefix}"),
                Severity::High,
                vec![prefix],
                vec!["reduce frequency on this path".into(), "vary entry pages".into()],
                now,
            );
        }
    }

    fn detect_identity_specific(&mut self, current: &RequestOutcome, now: DateTime<Utc>) {
        let matching = self
            .log
            .iter()
            .filter(|entry| entry.is_banned() && entry.identity_id == current.identity_id)
            .count();
        if matching >= 3 {
            self.upsert_pattern(
                "fingerprint_detection",
                format!("identity {} banned {matching} times", current.identity_id),
                Severity::High,
                vec![current.identity_id.clone()],
                vec!["rotate identity profile".into()],
                now,
            );
        }

        let lowered = current.user_agent.to_lowercase();
        if AUTOMATION_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            self.upsert_pattern(
                "user_agent_detection",
                format!("user-agent contains automation keyword: {}", current.user_agent),
                Severity::Critical,
                vec![current.identity_id.clone()],
                vec!["replace user-agent catalog entry".into()],
                now,
            );
        }
    }

    fn detect_rate_patterns(&mut self, _current: &RequestOutcome, now: DateTime<Utc>) {
        let five_minutes = chrono::Duration::minutes(5);
        let requests_5m = self
            .log
            .iter()
            .filter(|entry| entry.timestamp + five_minutes >= now)
            .count();
        let rpm = requests_5m as f32 / 5.0;
        if rpm > 20.0 {
            self.upsert_pattern(
                "rate_limit_exceeded",
                format!("{rpm:.1} requests/minute over the trailing 5 minutes"),
                Severity::High,
                vec!["request_rate".into()],
                vec!["raise inter-request delays".into()],
                now,
            );
        }

        let ten_seconds = chrono::Duration::seconds(10);
        let burst = self
            .log
            .iter()
            .filter(|entry| entry.timestamp + ten_seconds >= now)
            .count();
        if burst > 5 {
            self.upsert_pattern(
                "burst_detection",
                format!("{burst} requests within 10 seconds"),
                Severity::Critical,
                vec!["burst".into()],
                vec!["enforce the pacing floor".into(), "take an extended break".into()],
                now,
            );
        }
    }

    fn detect_regional(&mut self, current: &RequestOutcome, now: DateTime<Utc>) {
        let Some(ref region) = current.route_region else {
            return;
        };
        let matching = self
            .log
            .iter()
            .filter(|entry| {
                entry.is_banned() && entry.route_region.as_deref() == Some(region.as_str())
            })
            .count();
        if matching >= 5 {
            self.upsert_pattern(
                "regional_blocking",
                format!("{matching} bans on routes in region {region}"),
                Severity::High,
                vec![region.clone()],
                vec!["prefer routes outside this region".into()],
                now,
            );
        }
    }

    fn upsert_pattern(
        &mut self,
        id: &str,
        description: String,
        severity: Severity,
        triggers: Vec<String>,
        mitigations: Vec<String>,
        now: DateTime<Utc>,
    ) {
        match self.patterns.get_mut(id) {
            Some(pattern) => {
                pattern.frequency = pattern.frequency.saturating_add(1);
                pattern.last_seen = now;
                pattern.description = description;
                pattern.severity = severity;
            }
            None => {
                log::info!("new ban pattern detected: {id} ({})", severity.as_str());
                self.patterns.insert(
                    id.to_string(),
                    BanPattern {
                        id: id.to_string(),
                        description,
                        frequency: 1,
                        first_seen: now,
                        last_seen: now,
                        severity,
                        triggers,
                        mitigations,
                    },
                );
            }
        }
    }

    fn hour_histogram(&self) -> [u32; 24] {
        let mut histogram = [0u32; 24];
        for entry in self.log.iter().filter(|entry| entry.is_banned()) {
            histogram[(entry.hour_of_day as usize) % 24] += 1;
        }
        histogram
    }

    fn report(&self, now: DateTime<Utc>) -> AnalyticsReport {
        let mut bans_per_hour = [0u32; 24];
        let mut bans_per_weekday = [0u32; 7];
        let mut bans_by_region: HashMap<String, u32> = HashMap::new();
        let mut bans_by_identity: HashMap<String, u32> = HashMap::new();
        let mut bans_by_route_class: HashMap<RouteClass, u32> = HashMap::new();
        let mut prefix_counts: HashMap<String, u32> = HashMap::new();

        let mut total_bans = 0u64;
        let mut bans_today = 0u64;
        let mut bans_this_week = 0u64;
        let mut latency_sum = 0u128;

        for entry in &self.log {
            latency_sum += entry.latency_ms as u128;
            if !entry.is_banned() {
                continue;
            }
            total_bans += 1;
            if entry.timestamp.date_naive() == now.date_naive() {
                bans_today += 1;
            }
            if entry.timestamp + chrono::Duration::days(7) >= now {
                bans_this_week += 1;
            }
            bans_per_hour[(entry.hour_of_day as usize) % 24] += 1;
            bans_per_weekday[(entry.weekday as usize) % 7] += 1;
            if let Some(ref region) = entry.route_region {
                *bans_by_region.entry(region.clone()).or_default() += 1;
            }
            *bans_by_identity.entry(entry.identity_id.clone()).or_default() += 1;
            *bans_by_route_class.entry(entry.route_class).or_default() += 1;
            *prefix_counts.entry(entry.path_prefix()).or_default() += 1;
        }

        let total_requests = self.log.len() as u64;
        let mut top_banned_prefixes: Vec<_> = prefix_counts.into_iter().collect();
        top_banned_prefixes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_banned_prefixes.truncate(10);

        let mut top_patterns: Vec<_> = self.patterns.values().cloned().collect();
        top_patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        top_patterns.truncate(10);

        AnalyticsReport {
            total_requests,
            total_bans,
            bans_today,
            bans_this_week,
            bans_per_hour,
            bans_per_weekday,
            bans_by_region,
            bans_by_identity,
            bans_by_route_class,
            top_banned_prefixes,
            mean_response_ms: if total_requests == 0 {
                0.0
            } else {
                latency_sum as f64 / total_requests as f64
            },
            success_rate: if total_requests == 0 {
                1.0
            } else {
                (total_requests - total_bans) as f64 / total_requests as f64
            },
            top_patterns,
        }
    }

    fn predict(&self, candidate: &CandidateRequest) -> BanForecast {
        let mut score = 0u32;
        let mut risk_factors = Vec::new();
        let mut recommendations = Vec::new();

        let prefix = candidate
            .url
            .parse::<Url>()
            .map(|url| path_prefix(url.path()))
            .unwrap_or_else(|_| path_prefix(&candidate.url));

        let url_bans = self
            .log
            .iter()
            .filter(|entry| entry.is_banned() && entry.path_prefix() == prefix)
            .count() as u32;
        if url_bans > 0 {
            score += url_bans * 10;
            risk_factors.push(format!("{url_bans} prior bans under {prefix}"));
            recommendations.push("reduce frequency on this path".to_string());
        }

        let identity_bans = self
            .log
            .iter()
            .filter(|entry| entry.is_banned() && entry.identity_id == candidate.identity_id)
            .count() as u32;
        if identity_bans > 0 {
            score += identity_bans * 15;
            risk_factors.push(format!(
                "{identity_bans} prior bans under identity {}",
                candidate.identity_id
            ));
            recommendations.push("rotate identity before this request".to_string());
        }

        let histogram = self.hour_histogram();
        let busiest = histogram.iter().copied().max().unwrap_or(0);
        let bucket = histogram[(candidate.hour_of_day as usize) % 24];
        if busiest > 0 && bucket as f32 >= busiest as f32 * 0.8 {
            score += 20;
            risk_factors.push(format!(
                "hour {:02}:00 is a peak ban hour",
                candidate.hour_of_day
            ));
            recommendations.push("defer to an off-peak hour".to_string());
        }

        if candidate.projected_request_count > 50 {
            score += 25;
            risk_factors.push(format!(
                "projected session volume of {} requests",
                candidate.projected_request_count
            ));
            recommendations.push("split the workload across sessions".to_string());
        }

        BanForecast {
            probability: score.min(100) as u8,
            risk_factors,
            recommendations,
        }
    }
}

/// First two path segments, the granularity at which URL-specific bans are
/// grouped.
fn path_prefix(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let mut segments = trimmed.split('/').filter(|segment| !segment.is_empty());
    match (segments.next(), segments.next()) {
        (Some(first), Some(second)) => format!("/{first}/{second}"),
        (Some(first), None) => format!("/{first}"),
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::persistence::MemoryStore;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 10, minute, second).unwrap()
    }

    fn banned_outcome(timestamp: DateTime<Utc>, path: &str, identity: &str) -> RequestOutcome {
        let url = Url::parse(&format!("https://target.example{path}")).unwrap();
        RequestOutcome::new(timestamp, &url, "GET", 403)
            .with_route("http://10.0.0.1:8080", RouteClass::Residential, Some("eu-west".into()))
            .with_identity(identity, "Mozilla/5.0 (X11; Linux x86_64) Chrome/124.0")
            .with_latency(Duration::from_millis(60))
            .with_classification(&BanClassification {
                is_banned: true,
                reason: BanReason::Ip,
                confidence: 95,
            })
            .with_session("sess-1", 1)
    }

    fn clean_outcome(timestamp: DateTime<Utc>, path: &str) -> RequestOutcome {
        let url = Url::parse(&format!("https://target.example{path}")).unwrap();
        RequestOutcome::new(timestamp, &url, "GET", 200)
            .with_route("http://10.0.0.1:8080", RouteClass::Residential, None)
            .with_identity("profile-1", "Mozilla/5.0")
            .with_latency(Duration::from_millis(400))
    }

    #[test]
    fn temporal_clustering_fires_after_five_bans_in_an_hour() {
        let analytics = BanAnalytics::default();
        for i in 0..6u32 {
            analytics.record(banned_outcome(at(i, 0), "/products", "profile-1"));
        }

        let patterns = analytics.patterns();
        let clustering = patterns
            .iter()
            .find(|pattern| pattern.id == "time_clustering")
            .expect("time_clustering should be mined");
        assert_eq!(clustering.severity, Severity::High);
        // Fired on the 5th and 6th record.
        assert_eq!(clustering.frequency, 2);
    }

    #[test]
    fn pattern_upsert_accumulates_without_duplicates() {
        let analytics = BanAnalytics::default();
        for i in 0..8u32 {
            analytics.record(banned_outcome(at(i, 0), "/products", "profile-1"));
        }
        let patterns = analytics.patterns();
        let ids: Vec<_> = patterns
            .iter()
            .filter(|pattern| pattern.id == "time_clustering")
            .collect();
        assert_eq!(ids.len(), 1);
        assert!(ids[0].frequency >= 2);
        assert!(ids[0].last_seen > ids[0].first_seen);
    }

    #[test]
    fn url_specific_bans_need_three_matches() {
        let analytics = BanAnalytics::default();
        analytics.record(banned_outcome(at(0, 0), "/products/1", "a"));
        analytics.record(banned_outcome(at(1, 0), "/checkout", "b"));
        assert!(
            !analytics
                .patterns()
                .iter()
                .any(|pattern| pattern.id == "url_specific_bans")
        );

        analytics.record(banned_outcome(at(2, 0), "/products/1", "c"));
        analytics.record(banned_outcome(at(3, 0), "/products/1", "d"));
        let patterns = analytics.patterns();
        let url_pattern = patterns
            .iter()
            .find(|pattern| pattern.id == "url_specific_bans")
            .expect("url pattern should be mined");
        assert_eq!(url_pattern.severity, Severity::High);
    }

    #[test]
    fn automation_user_agent_is_flagged_critical() {
        let analytics = BanAnalytics::default();
        let url = Url::parse("https://target.example/products").unwrap();
        let outcome = RequestOutcome::new(at(0, 0), &url, "GET", 403)
            .with_identity("profile-x", "python-requests/2.31")
            .with_classification(&BanClassification {
                is_banned: true,
                reason: BanReason::Fingerprint,
                confidence: 80,
            });
        analytics.record(outcome);

        let patterns = analytics.patterns();
        let ua = patterns
            .iter()
            .find(|pattern| pattern.id == "user_agent_detection")
            .expect("automation UA should be flagged");
        assert_eq!(ua.severity, Severity::Critical);
    }

    #[test]
    fn burst_of_requests_with_ban_is_critical() {
        let analytics = BanAnalytics::default();
        for i in 0..5u32 {
            analytics.record(clean_outcome(at(0, i), "/products"));
        }
        analytics.record(banned_outcome(at(0, 6), "/products", "profile-1"));

        let patterns = analytics.patterns();
        let burst = patterns
            .iter()
            .find(|pattern| pattern.id == "burst_detection")
            .expect("burst should be mined");
        assert_eq!(burst.severity, Severity::Critical);
    }

    #[test]
    fn regional_blocking_counts_route_regions() {
        let analytics = BanAnalytics::default();
        for i in 0..5u32 {
            analytics.record(banned_outcome(at(i * 3, 0), "/p", &format!("id-{i}")));
        }
        let patterns = analytics.patterns();
        assert!(patterns.iter().any(|pattern| pattern.id == "regional_blocking"));
    }

    #[test]
    fn forecast_sums_weighted_contributions() {
        let analytics = BanAnalytics::default();
        // Two bans on the candidate path, one of them under the candidate
        // identity; all in hour 10, making it the peak bucket.
        analytics.record(banned_outcome(at(0, 0), "/products/42", "profile-a"));
        analytics.record(banned_outcome(at(5, 0), "/products/42", "profile-b"));

        let forecast = analytics.predict(&CandidateRequest {
            url: "https://target.example/products/42".into(),
            identity_id: "profile-a".into(),
            hour_of_day: 10,
            projected_request_count: 60,
        });

        // 2 url bans * 10 + 1 identity ban * 15 + 20 peak hour + 25 volume.
        assert_eq!(forecast.probability, 80);
        assert_eq!(forecast.risk_factors.len(), 4);
        assert!(!forecast.recommendations.is_empty());
    }

    #[test]
    fn log_is_bounded_by_entry_count() {
        let analytics = BanAnalytics::new(RetentionPolicy {
            max_entries: 10,
            ..RetentionPolicy::default()
        });
        for i in 0..30u32 {
            analytics.record(clean_outcome(at(i / 60, i % 60), "/p"));
        }
        let report = analytics.report();
        assert!(report.total_requests <= 10);
    }

    #[test]
    fn persist_and_restore_round_trip() {
        let store = MemoryStore::new();
        let analytics = BanAnalytics::default();
        for i in 0..6u32 {
            analytics.record(banned_outcome(at(i, 0), "/products", "profile-1"));
        }
        analytics.persist(&store).unwrap();

        let restored = BanAnalytics::default();
        restored.restore(&store).unwrap();
        let report = restored.report();
        assert_eq!(report.total_requests, 6);
        assert!(restored.patterns().iter().any(|p| p.id == "time_clustering"));
    }

    #[test]
    fn report_aggregates_histograms() {
        let analytics = BanAnalytics::default();
        analytics.record(banned_outcome(at(0, 0), "/products/1", "profile-1"));
        analytics.record(clean_outcome(at(1, 0), "/products/2"));

        let report = analytics.report();
        assert_eq!(report.total_requests, 2);
        assert_eq!(report.total_bans, 1);
        assert_eq!(report.bans_per_hour[10], 1);
        assert_eq!(report.bans_by_region.get("eu-west"), Some(&1));
        assert!((report.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
