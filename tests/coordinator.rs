//! End-to-end tests over the coordinator façade: acquire, report, recover.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use url::Url;

use banguard::{
    HttpTransport, MemoryStore, NotificationSink, PacingConfig, RecoveryConfig,
    RecoveryOutcome, RequestCoordinator, ResponseSummary, RouteClass, RouteDefinition,
    SinkError, TransportError, TransportRequest, TransportResponse,
};

struct RecordingSink {
    delivered: AtomicUsize,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, _message: &str) -> Result<(), SinkError> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport stub whose probes always fail.
struct DeadTransport;

#[async_trait]
impl HttpTransport for DeadTransport {
    async fn execute(
        &self,
        _request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        Err(TransportError::Transport("connection refused".into()))
    }
}

fn fast_recovery() -> RecoveryConfig {
    RecoveryConfig {
        ip_wait: Duration::from_millis(10),
        rate_limit_wait: Duration::from_millis(10),
        fingerprint_wait: Duration::from_millis(10),
        unknown_wait: Duration::from_millis(10),
        emergency_backoff: Duration::from_millis(10),
        ..RecoveryConfig::default()
    }
}

fn no_floor_pacing() -> PacingConfig {
    PacingConfig {
        hard_floor: Duration::ZERO,
        ..PacingConfig::default()
    }
}

fn routes() -> Vec<RouteDefinition> {
    vec![
        RouteDefinition::new("http://res-1.proxy:8080", RouteClass::Residential)
            .with_region("eu-west"),
        RouteDefinition::new("http://res-2.proxy:8080", RouteClass::Residential)
            .with_region("eu-west"),
        RouteDefinition::new("http://dc-1.proxy:3128", RouteClass::Datacenter)
            .with_region("us-east"),
    ]
}

#[tokio::test]
async fn banned_response_triggers_recovery_and_alert() {
    let sink = Arc::new(RecordingSink {
        delivered: AtomicUsize::new(0),
    });
    let coordinator = RequestCoordinator::builder()
        .with_routes(routes())
        .with_recovery_config(fast_recovery())
        .with_pacing_config(no_floor_pacing())
        .with_sink(sink.clone())
        .with_seed(21)
        .build();

    let url = Url::parse("https://shop.example.com/products/1").unwrap();
    let context = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap();

    let headers = HeaderMap::new();
    let response = ResponseSummary {
        status: 403,
        headers: &headers,
        body_size: 150,
        latency: Duration::from_millis(40),
    };
    let report = coordinator.report_outcome(&context, &response).await;

    assert!(report.classification.is_banned);
    assert_eq!(report.classification.confidence, 100);
    let recovery = report.recovery.expect("ban should run recovery");
    assert_eq!(recovery.outcome, RecoveryOutcome::Completed);
    assert!(recovery.fully_recovered);
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);

    let stats = coordinator.stats().await;
    assert_eq!(stats.analytics.total_bans, 1);
    assert_eq!(stats.alerts.total_sent, 1);
    // The banned route left circulation.
    assert!(stats.pool.banned_routes >= 1);
}

#[tokio::test]
async fn clean_response_improves_route_reputation() {
    let coordinator = RequestCoordinator::builder()
        .with_routes(routes())
        .with_pacing_config(no_floor_pacing())
        .with_seed(3)
        .build();

    let url = Url::parse("https://shop.example.com/").unwrap();
    let context = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap();

    let headers = HeaderMap::new();
    let response = ResponseSummary {
        status: 200,
        headers: &headers,
        body_size: 30_000,
        latency: Duration::from_millis(500),
    };
    let report = coordinator.report_outcome(&context, &response).await;

    assert!(!report.classification.is_banned);
    assert!(report.recovery.is_none());

    let stats = coordinator.stats().await;
    let route_stats = &stats.pool.details[&context.route.endpoint];
    assert!(route_stats.reputation > 70.0);
}

#[tokio::test]
async fn exhausted_pool_surfaces_no_available_route() {
    let coordinator = RequestCoordinator::builder()
        .with_routes(vec![
            RouteDefinition::new("http://res-1.proxy:8080", RouteClass::Residential),
        ])
        .with_recovery_config(fast_recovery())
        .with_pacing_config(no_floor_pacing())
        .with_seed(5)
        .build();

    let url = Url::parse("https://shop.example.com/products").unwrap();
    let context = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap();

    // A confident ban takes the only route out of circulation.
    let headers = HeaderMap::new();
    let response = ResponseSummary {
        status: 403,
        headers: &headers,
        body_size: 100,
        latency: Duration::from_millis(30),
    };
    let report = coordinator.report_outcome(&context, &response).await;
    // Recovery had nowhere to rotate to.
    assert!(!report.recovery.unwrap().fully_recovered);

    let err = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no available route"));
}

#[tokio::test]
async fn concurrent_ban_reports_run_a_single_recovery() {
    let coordinator = Arc::new(
        RequestCoordinator::builder()
            .with_routes(routes())
            .with_recovery_config(RecoveryConfig {
                ip_wait: Duration::from_millis(500),
                ..fast_recovery()
            })
            .with_pacing_config(no_floor_pacing())
            .with_seed(11)
            .build(),
    );

    let url = Url::parse("https://shop.example.com/products").unwrap();
    let first_ctx = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap();
    let second_ctx = coordinator
        .acquire_request_context(&url, RouteClass::Residential)
        .await
        .unwrap();

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let headers = HeaderMap::new();
            let response = ResponseSummary {
                status: 403,
                headers: &headers,
                body_size: 100,
                latency: Duration::from_millis(30),
            };
            coordinator.report_outcome(&first_ctx, &response).await
        })
    };
    // Let the first recovery claim the exclusion flag.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let headers = HeaderMap::new();
    let response = ResponseSummary {
        status: 403,
        headers: &headers,
        body_size: 100,
        latency: Duration::from_millis(30),
    };
    let second = coordinator.report_outcome(&second_ctx, &response).await;

    assert_eq!(
        second.recovery.unwrap().outcome,
        RecoveryOutcome::Skipped
    );
    let first = first.await.unwrap();
    assert_eq!(
        first.recovery.unwrap().outcome,
        RecoveryOutcome::Completed
    );
}

#[tokio::test]
async fn transport_failure_is_recorded_as_unknown_ban() {
    let coordinator = RequestCoordinator::builder()
        .with_routes(routes())
        .with_recovery_config(fast_recovery())
        .with_pacing_config(no_floor_pacing())
        .with_seed(13)
        .build();

    let url = Url::parse("https://shop.example.com/checkout").unwrap();
    let context = coordinator
        .acquire_request_context(&url, RouteClass::Datacenter)
        .await
        .unwrap();

    let report = coordinator.report_transport_failure(&context).await;
    assert!(report.classification.is_banned);
    assert_eq!(report.classification.confidence, 50);
    // Unknown reason escalates; the recovery still completes.
    assert_eq!(
        report.recovery.unwrap().outcome,
        RecoveryOutcome::Completed
    );
}

#[tokio::test]
async fn analytics_survive_a_restart_through_persistence() {
    let store = Arc::new(MemoryStore::new());
    let url = Url::parse("https://shop.example.com/products/7").unwrap();

    {
        let coordinator = RequestCoordinator::builder()
            .with_routes(routes())
            .with_recovery_config(fast_recovery())
            .with_pacing_config(no_floor_pacing())
            .with_persistence(store.clone())
            .with_seed(17)
            .build();

        let context = coordinator
            .acquire_request_context(&url, RouteClass::Residential)
            .await
            .unwrap();
        let headers = HeaderMap::new();
        let response = ResponseSummary {
            status: 429,
            headers: &headers,
            body_size: 200,
            latency: Duration::from_millis(60),
        };
        coordinator.report_outcome(&context, &response).await;
        coordinator.shutdown();
    }

    let restarted = RequestCoordinator::builder()
        .with_routes(routes())
        .with_persistence(store)
        .with_seed(17)
        .build();
    let stats = restarted.stats().await;
    assert_eq!(stats.analytics.total_requests, 1);
    assert_eq!(stats.analytics.total_bans, 1);
}

#[tokio::test]
async fn failed_probes_erode_reputation() {
    let coordinator = RequestCoordinator::builder()
        .with_routes(routes())
        .with_transport(Arc::new(DeadTransport))
        .with_seed(19)
        .build();

    coordinator.run_health_check().await;
    let stats = coordinator.stats().await;
    for route_stats in stats.pool.details.values() {
        assert!(route_stats.reputation < 70.0);
    }
}

#[tokio::test]
async fn forecast_reflects_recorded_bans() {
    let coordinator = RequestCoordinator::builder()
        .with_routes(routes())
        .with_recovery_config(fast_recovery())
        .with_pacing_config(no_floor_pacing())
        .with_seed(23)
        .build();

    let url = Url::parse("https://shop.example.com/products/9").unwrap();
    for _ in 0..2 {
        let context = coordinator
            .acquire_request_context(&url, RouteClass::Residential)
            .await
            .unwrap();
        let headers = HeaderMap::new();
        let response = ResponseSummary {
            status: 403,
            headers: &headers,
            body_size: 100,
            latency: Duration::from_millis(30),
        };
        coordinator.report_outcome(&context, &response).await;
    }

    let forecast = coordinator.predict_for_url(&url, 10).await;
    // Two prior bans on this path prefix contribute at least 20 points.
    assert!(forecast.probability >= 20);
    assert!(!forecast.risk_factors.is_empty());
}
