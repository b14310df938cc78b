//! # banguard
//!
//! Adaptive anti-blocking request coordination against bot-detecting
//! targets: scored proxy routing, device-identity rotation, human-like
//! pacing, multi-signal ban detection, pattern mining over request history,
//! and an autonomous recovery state machine.
//!
//! The crate never performs network I/O on the request path itself. Callers
//! ask the [`RequestCoordinator`] for permission and materials (route,
//! headers, delay), perform the exchange through their own transport, and
//! report the outcome back.
//!
//! ## Example
//!
//! ```no_run
//! use banguard::{RequestCoordinator, RouteClass, RouteDefinition, ResponseSummary};
//! use std::time::Duration;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = RequestCoordinator::builder()
//!         .with_routes(vec![
//!             RouteDefinition::new("http://proxy-1.internal:8080", RouteClass::Residential),
//!         ])
//!         .build();
//!
//!     let url = Url::parse("https://shop.example.com/products")?;
//!     let context = coordinator
//!         .acquire_request_context(&url, RouteClass::Residential)
//!         .await?;
//!     tokio::time::sleep(context.delay).await;
//!
//!     // ... perform the request through your transport, then:
//!     let headers = http::HeaderMap::new();
//!     let response = ResponseSummary {
//!         status: 200,
//!         headers: &headers,
//!         body_size: 18_000,
//!         latency: Duration::from_millis(420),
//!     };
//!     let report = coordinator.report_outcome(&context, &response).await;
//!     assert!(!report.classification.is_banned);
//!     Ok(())
//! }
//! ```

mod coordinator;

pub mod bans;
pub mod modules;
pub mod transport;

pub use crate::coordinator::{
    CoordinatorBuilder,
    CoordinatorConfig,
    CoordinatorError,
    CoordinatorResult,
    CoordinatorStats,
    ForcedRotation,
    OutcomeReport,
    RequestContext,
    RequestCoordinator,
};

pub use crate::bans::{
    BanClassification,
    BanReason,
    ResponseSummary,
    Severity,
};

pub use crate::bans::classifier::{BanDetector, DetectorConfig};

pub use crate::bans::recovery::{
    RecoveryConfig,
    RecoveryOrchestrator,
    RecoveryOutcome,
    RecoveryReport,
    RecoveryState,
    RecoveryStrategy,
};

pub use crate::modules::{
    Alert,
    AlertConfig,
    AlertCounters,
    AlertDispatcher,
    AnalyticsReport,
    BanAnalytics,
    BanForecast,
    BanPattern,
    BehavioralPattern,
    CandidateRequest,
    DeviceClass,
    IdentityProfile,
    IdentityProfileStore,
    KeyValueStore,
    LogSink,
    MemoryStore,
    NoAvailableRoute,
    NotificationSink,
    PacingConfig,
    PacingController,
    PersistenceError,
    PoolConfig,
    PoolHealthReport,
    ProxyPool,
    RedbStore,
    RequestOutcome,
    RetentionPolicy,
    RouteClass,
    RouteDefinition,
    SelectedRoute,
    SessionStore,
    SinkError,
};

pub use crate::transport::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
