//! Rate-limited alert fan-out.
//!
//! Formats ban/recovery events and broadcasts them to registered
//! notification sinks. Each severity class has its own cooldown; alerts
//! inside the cooldown are dropped, not queued. Sink failures are isolated
//! per sink and never reach the request path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::bans::{BanReason, Severity};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink delivery failed: {0}")]
    Delivery(String),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// External notification destination (Telegram, email, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &str) -> Result<(), SinkError>;
}

/// Built-in sink that writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &str) -> Result<(), SinkError> {
        log::warn!("{message}");
        Ok(())
    }
}

/// Structured alert payload.
#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: Severity,
    pub reason: BanReason,
    pub route: Option<String>,
    pub identity: Option<String>,
    pub status: Option<u16>,
    pub url: Option<String>,
    pub detail: String,
}

impl Alert {
    pub fn new(severity: Severity, reason: BanReason, detail: impl Into<String>) -> Self {
        Self {
            severity,
            reason,
            route: None,
            identity: None,
            status: None,
            url: None,
            detail: detail.into(),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    fn format(&self) -> String {
        let mut parts = vec![format!(
            "[{}] {}: {}",
            self.severity.as_str().to_uppercase(),
            self.reason.as_str(),
            self.detail
        )];
        if let Some(status) = self.status {
            parts.push(format!("status={status}"));
        }
        if let Some(ref url) = self.url {
            parts.push(format!("url={url}"));
        }
        if let Some(ref route) = self.route {
            parts.push(format!("route={route}"));
        }
        if let Some(ref identity) = self.identity {
            parts.push(format!("identity={identity}"));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub critical_cooldown: Duration,
    pub high_cooldown: Duration,
    pub medium_cooldown: Duration,
    pub low_cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_cooldown: Duration::from_secs(60),
            high_cooldown: Duration::from_secs(5 * 60),
            medium_cooldown: Duration::from_secs(15 * 60),
            low_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

impl AlertConfig {
    fn cooldown_for(&self, severity: Severity) -> Duration {
        match severity {
            Severity::Critical => self.critical_cooldown,
            Severity::High => self.high_cooldown,
            Severity::Medium => self.medium_cooldown,
            Severity::Low => self.low_cooldown,
        }
    }
}

/// Running delivery counters.
#[derive(Debug, Clone, Default)]
pub struct AlertCounters {
    pub total_sent: u64,
    pub total_dropped: u64,
    pub per_severity: HashMap<Severity, u64>,
    pub sent_last_hour: u64,
}

#[derive(Debug, Default)]
struct DispatchState {
    last_sent: HashMap<Severity, Instant>,
    sent_timestamps: VecDeque<Instant>,
    counters: AlertCounters,
}

/// Fan-out dispatcher with per-severity rate limiting.
pub struct AlertDispatcher {
    config: AlertConfig,
    sinks: Vec<Arc<dyn NotificationSink>>,
    state: Mutex<DispatchState>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            state: Mutex::new(DispatchState::default()),
        }
    }

    pub fn register_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn counters(&self) -> AlertCounters {
        let mut guard = self.state.lock().expect("alert state lock poisoned");
        let hour_ago = Instant::now().checked_sub(Duration::from_secs(3600));
        if let Some(cutoff) = hour_ago {
            while matches!(guard.sent_timestamps.front(), Some(ts) if *ts < cutoff) {
                guard.sent_timestamps.pop_front();
            }
        }
        guard.counters.sent_last_hour = guard.sent_timestamps.len() as u64;
        guard.counters.clone()
    }

    /// Deliver an alert to every sink unless its severity class is cooling
    /// down. Dropped alerts are logged and counted, never queued.
    pub async fn notify(&self, alert: Alert) {
        {
            let mut guard = self.state.lock().expect("alert state lock poisoned");
            let now = Instant::now();
            let cooldown = self.config.cooldown_for(alert.severity);
            if let Some(last) = guard.last_sent.get(&alert.severity) {
                if now.duration_since(*last) < cooldown {
                    guard.counters.total_dropped += 1;
                    log::debug!(
                        "alert dropped (cooldown, {}): {}",
                        alert.severity.as_str(),
                        alert.detail
                    );
                    return;
                }
            }
            guard.last_sent.insert(alert.severity, now);
            guard.sent_timestamps.push_back(now);
            guard.counters.total_sent += 1;
            *guard.counters.per_severity.entry(alert.severity).or_default() += 1;
        }

        // Fan out concurrently; a slow or failing sink never blocks the rest.
        let message = alert.format();
        let mut deliveries = tokio::task::JoinSet::new();
        for sink in &self.sinks {
            let message = message.clone();
            let sink = sink.clone();
            deliveries.spawn(async move {
                if let Err(err) = sink.send(&message).await {
                    log::warn!("notification sink {} failed: {err}", sink.name());
                }
            });
        }
        while deliveries.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        sent: AtomicUsize,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Self {
            Self {
                sent: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _message: &str) -> Result<(), SinkError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SinkError::Delivery("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn alert(severity: Severity) -> Alert {
        Alert::new(severity, BanReason::Ip, "blocked").with_status(403)
    }

    #[tokio::test]
    async fn second_alert_within_cooldown_is_dropped() {
        let mut dispatcher = AlertDispatcher::new(AlertConfig::default());
        let sink = Arc::new(CountingSink::new(false));
        dispatcher.register_sink(sink.clone());

        dispatcher.notify(alert(Severity::High)).await;
        dispatcher.notify(alert(Severity::High)).await;

        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
        let counters = dispatcher.counters();
        assert_eq!(counters.total_sent, 1);
        assert_eq!(counters.total_dropped, 1);
    }

    #[tokio::test]
    async fn different_severities_have_independent_cooldowns() {
        let mut dispatcher = AlertDispatcher::new(AlertConfig::default());
        let sink = Arc::new(CountingSink::new(false));
        dispatcher.register_sink(sink.clone());

        dispatcher.notify(alert(Severity::High)).await;
        dispatcher.notify(alert(Severity::Critical)).await;

        assert_eq!(sink.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let mut dispatcher = AlertDispatcher::new(AlertConfig::default());
        let failing = Arc::new(CountingSink::new(true));
        let healthy = Arc::new(CountingSink::new(false));
        dispatcher.register_sink(failing.clone());
        dispatcher.register_sink(healthy.clone());

        dispatcher.notify(alert(Severity::Critical)).await;

        assert_eq!(failing.sent.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
    }
}
