//! Recovery state machine.
//!
//! Maps a ban classification to a remediation strategy and executes it:
//! route/identity rotation, session teardown, backoff, and escalation. At
//! most one recovery runs at a time; concurrent triggers are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::sleep;

use crate::modules::alerts::{Alert, AlertDispatcher};
use crate::modules::identity::IdentityProfileStore;
use crate::modules::pacing::PacingController;
use crate::modules::proxy::{ProxyPool, RouteClass, SelectedRoute};
use crate::modules::session::SessionStore;

use super::{BanClassification, BanReason, Severity};

/// Observable machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Detecting,
    SelectingStrategy,
    Executing,
    Escalated,
    Cooling,
}

/// Remedial actions chosen for one ban event. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStrategy {
    pub rotate_route: bool,
    pub rotate_identity: bool,
    pub clear_session: bool,
    pub wait: Duration,
    pub retry_budget: u32,
    pub escalate: bool,
}

impl RecoveryStrategy {
    /// Derive the strategy for a classification. High-confidence verdicts
    /// double the wait.
    pub fn for_classification(
        classification: &BanClassification,
        config: &RecoveryConfig,
    ) -> Self {
        let mut strategy = match classification.reason {
            BanReason::Ip => Self {
                rotate_route: true,
                rotate_identity: true,
                clear_session: true,
                wait: config.ip_wait,
                retry_budget: config.retry_budget,
                escalate: false,
            },
            BanReason::RateLimit => Self {
                rotate_route: false,
                rotate_identity: true,
                clear_session: false,
                wait: config.rate_limit_wait,
                retry_budget: config.retry_budget,
                escalate: false,
            },
            BanReason::Fingerprint => Self {
                rotate_route: false,
                rotate_identity: true,
                clear_session: true,
                wait: config.fingerprint_wait,
                retry_budget: config.retry_budget,
                escalate: false,
            },
            _ => Self {
                rotate_route: true,
                rotate_identity: true,
                clear_session: true,
                wait: config.unknown_wait,
                retry_budget: config.retry_budget,
                escalate: true,
            },
        };

        if classification.confidence > config.confidence_doubling_threshold {
            strategy.wait *= 2;
        }
        strategy
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub ip_wait: Duration,
    pub rate_limit_wait: Duration,
    pub fingerprint_wait: Duration,
    pub unknown_wait: Duration,
    pub confidence_doubling_threshold: u8,
    /// Extended sleep applied while escalated. The original constants were
    /// undocumented; both are plain configuration here.
    pub emergency_backoff: Duration,
    pub retry_budget: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            ip_wait: Duration::from_secs(60),
            rate_limit_wait: Duration::from_secs(120),
            fingerprint_wait: Duration::from_secs(30),
            unknown_wait: Duration::from_secs(90),
            confidence_doubling_threshold: 90,
            emergency_backoff: Duration::from_secs(60 * 60),
            retry_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Strategy executed to completion.
    Completed,
    /// Another recovery was already running; this trigger was dropped.
    Skipped,
    /// Shutdown was signalled mid-recovery; state was rolled back cleanly.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    pub strategy: Option<RecoveryStrategy>,
    /// False when no replacement route could be found anywhere in the pool.
    pub fully_recovered: bool,
    pub new_route: Option<SelectedRoute>,
}

impl RecoveryReport {
    fn skipped() -> Self {
        Self {
            outcome: RecoveryOutcome::Skipped,
            strategy: None,
            fully_recovered: false,
            new_route: None,
        }
    }
}

/// Drives the ban-recovery state machine. Holds shared handles to the
/// components it rotates.
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    routes: Arc<Mutex<ProxyPool>>,
    identities: Arc<Mutex<IdentityProfileStore>>,
    pacing: Arc<Mutex<PacingController>>,
    session: SessionStore,
    alerts: Arc<AlertDispatcher>,
    shutdown: watch::Receiver<bool>,
    in_progress: AtomicBool,
    state: std::sync::Mutex<RecoveryState>,
    executions: AtomicU64,
}

/// Restores `Idle` and releases the exclusion flag on every exit path,
/// including cancellation.
struct RecoveryGuard<'a> {
    orchestrator: &'a RecoveryOrchestrator,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.set_state(RecoveryState::Idle);
        self.orchestrator.in_progress.store(false, Ordering::SeqCst);
    }
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RecoveryConfig,
        routes: Arc<Mutex<ProxyPool>>,
        identities: Arc<Mutex<IdentityProfileStore>>,
        pacing: Arc<Mutex<PacingController>>,
        session: SessionStore,
        alerts: Arc<AlertDispatcher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            routes,
            identities,
            pacing,
            session,
            alerts,
            shutdown,
            in_progress: AtomicBool::new(false),
            state: std::sync::Mutex::new(RecoveryState::Idle),
            executions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RecoveryState {
        *self.state.lock().expect("recovery state lock poisoned")
    }

    /// Number of strategy executions started so far.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Run a recovery for the given classification. Returns immediately with
    /// `Skipped` when another recovery is active; never errors.
    pub async fn recover(&self, classification: &BanClassification) -> RecoveryReport {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!(
                "ban ({}, confidence {}) detected during active recovery; dropped",
                classification.reason.as_str(),
                classification.confidence
            );
            return RecoveryReport::skipped();
        }
        let _guard = RecoveryGuard { orchestrator: self };

        self.set_state(RecoveryState::Detecting);
        log::warn!(
            "recovering from ban: reason={} confidence={}",
            classification.reason.as_str(),
            classification.confidence
        );

        self.set_state(RecoveryState::SelectingStrategy);
        let strategy = RecoveryStrategy::for_classification(classification, &self.config);

        self.set_state(RecoveryState::Executing);
        self.executions.fetch_add(1, Ordering::SeqCst);

        let mut fully_recovered = true;
        let mut new_route = None;

        if strategy.rotate_route {
            let mut pool = self.routes.lock().await;
            if let Some(current) = pool.current().map(str::to_string) {
                pool.record_failure(&current, true);
            }
            match pool.select_with_fallback(RouteClass::MobileCellular) {
                Ok(route) => new_route = Some(route),
                Err(err) => {
                    // Proceed without rotating; surfaced as a degraded recovery.
                    log::warn!("degraded recovery: {err}");
                    fully_recovered = false;
                }
            }
        }

        if strategy.rotate_identity {
            self.identities.lock().await.rotate();
        }

        if strategy.clear_session {
            self.session.clear();
        }

        if !self.wait_cancellable(strategy.wait).await {
            return RecoveryReport {
                outcome: RecoveryOutcome::Cancelled,
                strategy: Some(strategy),
                fully_recovered: false,
                new_route,
            };
        }

        if strategy.escalate {
            self.set_state(RecoveryState::Escalated);
            self.pacing.lock().await.apply_emergency_throttle();
            self.alerts
                .notify(
                    Alert::new(
                        Severity::Critical,
                        classification.reason,
                        "recovery escalated: throughput halved, entering emergency backoff",
                    ),
                )
                .await;
            if !self.wait_cancellable(self.config.emergency_backoff).await {
                return RecoveryReport {
                    outcome: RecoveryOutcome::Cancelled,
                    strategy: Some(strategy),
                    fully_recovered: false,
                    new_route,
                };
            }
            self.pacing.lock().await.clear_emergency_throttle();
        }

        self.set_state(RecoveryState::Cooling);
        log::info!(
            "recovery complete (fully_recovered={fully_recovered}, escalated={})",
            strategy.escalate
        );

        RecoveryReport {
            outcome: RecoveryOutcome::Completed,
            strategy: Some(strategy),
            fully_recovered,
            new_route,
        }
    }

    fn set_state(&self, state: RecoveryState) {
        *self.state.lock().expect("recovery state lock poisoned") = state;
    }

    /// Sleep without holding any lock; returns false if shutdown fired.
    async fn wait_cancellable(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }
        let sleeper = sleep(duration);
        tokio::pin!(sleeper);
        loop {
            tokio::select! {
                _ = &mut sleeper => return true,
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => return false,
                    Ok(()) => continue,
                    // Sender gone: nobody can signal shutdown any more.
                    Err(_) => {
                        sleeper.await;
                        return true;
                    }
                },
            }
        }
    }
}
