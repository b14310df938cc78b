//! Cross-cutting services module
//!
//! Pools, pacing, identities, analytics, alerting, session state, and the
//! persistence port consumed by the coordination layer.

pub mod alerts;
pub mod analytics;
pub mod identity;
pub mod pacing;
pub mod persistence;
pub mod proxy;
pub mod session;

// Re-export commonly used types
pub use alerts::{
    Alert,
    AlertConfig,
    AlertCounters,
    AlertDispatcher,
    LogSink,
    NotificationSink,
    SinkError,
};
pub use analytics::{
    AnalyticsReport,
    BanAnalytics,
    BanForecast,
    BanPattern,
    CandidateRequest,
    RequestOutcome,
    RetentionPolicy,
};
pub use identity::{
    BehavioralPattern,
    BrowserFamily,
    DeviceClass,
    IdentityProfile,
    IdentityProfileStore,
};
pub use pacing::{PacingConfig, PacingController};
pub use persistence::{KeyValueStore, MemoryStore, PersistenceError, RedbStore};
pub use proxy::{
    NoAvailableRoute,
    PoolConfig,
    PoolHealthReport,
    ProxyPool,
    ProxyRoute,
    RouteClass,
    RouteDefinition,
    RouteStats,
    SelectedRoute,
};
pub use session::{SessionSnapshot, SessionStore};
