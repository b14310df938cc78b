//! High level request coordination.
//!
//! Wires together the pool, identity store, pacing controller, detector,
//! analytics, alerts, and the recovery machine to expose the caller-facing
//! surface: ask for permission and materials, perform the I/O externally,
//! report the outcome back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use http::{HeaderMap, Method};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::bans::classifier::{BanDetector, DetectorConfig};
use crate::bans::recovery::{
    RecoveryConfig, RecoveryOrchestrator, RecoveryReport, RecoveryState,
};
use crate::bans::{BanClassification, ResponseSummary};
use crate::modules::alerts::{
    Alert, AlertConfig, AlertCounters, AlertDispatcher, LogSink, NotificationSink,
};
use crate::modules::analytics::{
    AnalyticsReport, BanAnalytics, BanForecast, CandidateRequest, RequestOutcome,
    RetentionPolicy,
};
use crate::modules::identity::{IdentityProfile, IdentityProfileStore};
use crate::modules::pacing::{PacingConfig, PacingController};
use crate::modules::persistence::{KeyValueStore, PersistenceError};
use crate::modules::proxy::{
    NoAvailableRoute, PoolConfig, PoolHealthReport, ProxyPool, RouteClass, RouteDefinition,
    SelectedRoute,
};
use crate::modules::session::SessionStore;
use crate::transport::HttpTransport;

/// Result alias used across the coordination layer.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    NoAvailableRoute(#[from] NoAvailableRoute),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Everything a caller needs to issue one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: Url,
    pub method: Method,
    pub route: SelectedRoute,
    pub headers: HeaderMap,
    /// The caller must sleep this long before performing the I/O.
    pub delay: Duration,
    pub identity_id: String,
    pub user_agent: String,
    pub session_id: String,
    pub sequence: u32,
    pub issued_at: DateTime<Utc>,
}

/// What came back from reporting an outcome.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub classification: BanClassification,
    pub recovery: Option<RecoveryReport>,
}

/// Operator-triggered reset result.
#[derive(Debug, Clone)]
pub struct ForcedRotation {
    pub identity: IdentityProfile,
    pub route: SelectedRoute,
}

/// Aggregate snapshot for dashboards.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub analytics: AnalyticsReport,
    pub pool: PoolHealthReport,
    pub alerts: AlertCounters,
    pub recovery_state: RecoveryState,
}

/// Coordinator configuration used by the builder.
#[derive(Clone)]
pub struct CoordinatorConfig {
    pub routes: Vec<RouteDefinition>,
    pub pool: PoolConfig,
    pub pacing: PacingConfig,
    pub recovery: RecoveryConfig,
    pub retention: RetentionPolicy,
    pub alerts: AlertConfig,
    pub detector: DetectorConfig,
    pub health_check_interval: Duration,
    pub cleanup_interval: Duration,
    /// Seeds the identity and pacing RNGs for deterministic tests.
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            pool: PoolConfig::default(),
            pacing: PacingConfig::default(),
            recovery: RecoveryConfig::default(),
            retention: RetentionPolicy::default(),
            alerts: AlertConfig::default(),
            detector: DetectorConfig::default(),
            health_check_interval: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            seed: None,
        }
    }
}

/// Fluent builder for [`RequestCoordinator`].
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    persistence: Option<Arc<dyn KeyValueStore>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            transport: None,
            persistence: None,
            sinks: Vec::new(),
        }
    }

    pub fn with_routes<I>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = RouteDefinition>,
    {
        self.config.routes = routes.into_iter().collect();
        self
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.config.pool = config;
        self
    }

    pub fn with_pacing_config(mut self, config: PacingConfig) -> Self {
        self.config.pacing = config;
        self
    }

    pub fn with_recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.config.recovery = config;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_alert_config(mut self, config: AlertConfig) -> Self {
        self.config.alerts = config;
        self
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.config.detector = config;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_persistence(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> RequestCoordinator {
        RequestCoordinator::with_config(self.config, self.transport, self.persistence, self.sinks)
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Façade owning every anti-blocking component. All state is explicitly
/// constructed and injected; there are no ambient singletons.
pub struct RequestCoordinator {
    routes: Arc<Mutex<ProxyPool>>,
    identities: Arc<Mutex<IdentityProfileStore>>,
    pacing: Arc<Mutex<PacingController>>,
    session: SessionStore,
    analytics: BanAnalytics,
    alerts: Arc<AlertDispatcher>,
    detector: BanDetector,
    recovery: Arc<RecoveryOrchestrator>,
    transport: Option<Arc<dyn HttpTransport>>,
    persistence: Option<Arc<dyn KeyValueStore>>,
    shutdown_tx: watch::Sender<bool>,
    health_check_interval: Duration,
    cleanup_interval: Duration,
}

impl RequestCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    fn with_config(
        config: CoordinatorConfig,
        transport: Option<Arc<dyn HttpTransport>>,
        persistence: Option<Arc<dyn KeyValueStore>>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Self {
        let mut pool = ProxyPool::new(config.pool.clone());
        pool.load(config.routes.clone());
        let routes = Arc::new(Mutex::new(pool));

        let identities = Arc::new(Mutex::new(match config.seed {
            Some(seed) => IdentityProfileStore::with_seed(seed),
            None => IdentityProfileStore::new(),
        }));
        let pacing = Arc::new(Mutex::new(match config.seed {
            Some(seed) => PacingController::with_seed(config.pacing.clone(), seed),
            None => PacingController::new(config.pacing.clone()),
        }));

        let session = SessionStore::new();
        let analytics = BanAnalytics::new(config.retention.clone());
        if let Some(ref store) = persistence {
            if let Err(err) = analytics.restore(store.as_ref()) {
                log::warn!("analytics restore failed, starting empty: {err}");
            }
        }

        let mut dispatcher = AlertDispatcher::new(config.alerts.clone());
        dispatcher.register_sink(Arc::new(LogSink));
        for sink in sinks {
            dispatcher.register_sink(sink);
        }
        let alerts = Arc::new(dispatcher);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let recovery = Arc::new(RecoveryOrchestrator::new(
            config.recovery.clone(),
            routes.clone(),
            identities.clone(),
            pacing.clone(),
            session.clone(),
            alerts.clone(),
            shutdown_rx,
        ));

        Self {
            routes,
            identities,
            pacing,
            session,
            analytics,
            alerts,
            detector: BanDetector::new(config.detector.clone()),
            recovery,
            transport,
            persistence,
            shutdown_tx,
            health_check_interval: config.health_check_interval,
            cleanup_interval: config.cleanup_interval,
        }
    }

    /// Permission and materials for one outbound request. The caller sleeps
    /// `delay`, performs the I/O through its own transport, then reports the
    /// outcome back.
    pub async fn acquire_request_context(
        &self,
        url: &Url,
        class: RouteClass,
    ) -> CoordinatorResult<RequestContext> {
        let (session_id, sequence) = self.session.touch();

        let delay = {
            let mut pacing = self.pacing.lock().await;
            let mut delay = pacing.next_delay();
            if pacing.should_take_break(sequence) {
                let pause = pacing.break_duration();
                log::debug!("scheduling extended break of {pause:?}");
                delay += pause;
            }
            delay
        };

        let route = self.routes.lock().await.select_with_fallback(class)?;

        let (headers, identity_id, user_agent) = {
            let mut identities = self.identities.lock().await;
            let headers = identities.headers_for(url);
            let profile = identities.current();
            (headers, profile.id.clone(), profile.user_agent.clone())
        };

        Ok(RequestContext {
            url: url.clone(),
            method: Method::GET,
            route,
            headers,
            delay,
            identity_id,
            user_agent,
            session_id,
            sequence,
            issued_at: Utc::now(),
        })
    }

    /// Feed a completed response back: classify, record, score the route,
    /// and run recovery when a ban is detected. Recovery waits happen inline
    /// on the reporting caller; concurrent reporters are skipped.
    pub async fn report_outcome(
        &self,
        context: &RequestContext,
        response: &ResponseSummary<'_>,
    ) -> OutcomeReport {
        let classification = self.detector.classify(response);
        self.finish_outcome(context, response.status, response.latency, classification)
            .await
    }

    /// Report an exchange that never produced a parsable response.
    pub async fn report_transport_failure(&self, context: &RequestContext) -> OutcomeReport {
        let classification = self.detector.classify_transport_failure();
        self.finish_outcome(context, 0, Duration::ZERO, classification)
            .await
    }

    async fn finish_outcome(
        &self,
        context: &RequestContext,
        status: u16,
        latency: Duration,
        classification: BanClassification,
    ) -> OutcomeReport {
        let region = self
            .routes
            .lock()
            .await
            .region_of(&context.route.endpoint);
        let outcome = RequestOutcome::new(Utc::now(), &context.url, context.method.as_str(), status)
            .with_route(context.route.endpoint.clone(), context.route.class, region)
            .with_identity(context.identity_id.clone(), context.user_agent.clone())
            .with_latency(latency)
            .with_classification(&classification)
            .with_session(context.session_id.clone(), context.sequence);
        self.analytics.record(outcome);

        {
            let mut pool = self.routes.lock().await;
            if classification.is_banned {
                // A confident ban takes the route out of circulation.
                let severe = classification.confidence >= 80;
                pool.record_failure(&context.route.endpoint, severe);
            } else {
                pool.record_success(&context.route.endpoint, latency);
            }
        }

        let recovery = if classification.is_banned {
            self.alerts
                .notify(
                    Alert::new(
                        classification.severity(),
                        classification.reason,
                        format!("ban detected (confidence {})", classification.confidence),
                    )
                    .with_route(context.route.endpoint.clone())
                    .with_identity(context.identity_id.clone())
                    .with_status(status)
                    .with_url(context.url.to_string()),
                )
                .await;
            Some(self.recovery.recover(&classification).await)
        } else {
            None
        };

        OutcomeReport {
            classification,
            recovery,
        }
    }

    /// Operator-triggered reset: fresh identity and fresh route.
    pub async fn force_rotation(&self) -> CoordinatorResult<ForcedRotation> {
        let identity = self.identities.lock().await.rotate();
        let route = self
            .routes
            .lock()
            .await
            .select_with_fallback(RouteClass::MobileCellular)?;
        log::info!("forced rotation: identity {} route {}", identity.id, route.endpoint);
        Ok(ForcedRotation { identity, route })
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            analytics: self.analytics.report(),
            pool: self.routes.lock().await.health_report(),
            alerts: self.alerts.counters(),
            recovery_state: self.recovery.state(),
        }
    }

    /// Forecast the ban probability of a candidate request from history.
    pub fn predict_ban_probability(&self, candidate: &CandidateRequest) -> BanForecast {
        self.analytics.predict(candidate)
    }

    /// Convenience forecast for "this url, current identity, right now".
    pub async fn predict_for_url(&self, url: &Url, projected_request_count: u32) -> BanForecast {
        let identity_id = self.identities.lock().await.current().id.clone();
        self.analytics.predict(&CandidateRequest {
            url: url.to_string(),
            identity_id,
            hour_of_day: Utc::now().hour() as u8,
            projected_request_count,
        })
    }

    /// Probe every route through the transport and nudge reputations. Locks
    /// are never held across the probe awaits.
    pub async fn run_health_check(&self) {
        let Some(ref transport) = self.transport else {
            return;
        };
        let endpoints = self.routes.lock().await.endpoints();
        let mut results = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let healthy = transport.probe(&endpoint).await;
            results.push((endpoint, healthy));
        }
        let mut pool = self.routes.lock().await;
        for (endpoint, healthy) in results {
            pool.apply_probe(&endpoint, healthy);
        }
    }

    /// Evict stale analytics state and persist a snapshot (best-effort).
    pub fn run_cleanup(&self) {
        self.analytics.cleanup();
        if let Some(ref store) = self.persistence {
            if let Err(err) = self.analytics.persist(store.as_ref()) {
                log::warn!("analytics persist failed: {err}");
            }
        }
    }

    /// Start the periodic health-check and cleanup timers.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(transport) = self.transport.clone() {
            let routes = self.routes.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            let interval = self.health_check_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let endpoints = routes.lock().await.endpoints();
                            let mut results = Vec::with_capacity(endpoints.len());
                            for endpoint in endpoints {
                                let healthy = transport.probe(&endpoint).await;
                                results.push((endpoint, healthy));
                            }
                            let mut pool = routes.lock().await;
                            for (endpoint, healthy) in results {
                                pool.apply_probe(&endpoint, healthy);
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        {
            let analytics = self.analytics.clone();
            let persistence = self.persistence.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            let interval = self.cleanup_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            analytics.cleanup();
                            if let Some(ref store) = persistence {
                                if let Err(err) = analytics.persist(store.as_ref()) {
                                    log::warn!("analytics persist failed: {err}");
                                }
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        handles
    }

    /// Signal shutdown: cancels in-flight recovery waits and background
    /// timers, then persists analytics state.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(ref store) = self.persistence {
            if let Err(err) = self.analytics.persist(store.as_ref()) {
                log::warn!("analytics persist on shutdown failed: {err}");
            }
        }
    }
}
