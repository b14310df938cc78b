//! Egress route pool with reputation scoring.
//!
//! Tracks proxy reputation and health, bans misbehaving endpoints for a
//! cooldown, and selects the best available route for a request class.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tier of egress route, ordered from most to least trustworthy in the eyes
/// of bot-detection vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    MobileCellular,
    Residential,
    Datacenter,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::MobileCellular => "mobile_cellular",
            RouteClass::Residential => "residential",
            RouteClass::Datacenter => "datacenter",
        }
    }

    /// Next class to try when this one is exhausted.
    pub fn fallback(self) -> Option<RouteClass> {
        match self {
            RouteClass::MobileCellular => Some(RouteClass::Residential),
            RouteClass::Residential => Some(RouteClass::Datacenter),
            RouteClass::Datacenter => None,
        }
    }
}

/// Static description of a route supplied at load time.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub endpoint: String,
    pub class: RouteClass,
    pub region: Option<String>,
}

impl RouteDefinition {
    pub fn new(endpoint: impl Into<String>, class: RouteClass) -> Self {
        Self {
            endpoint: endpoint.into(),
            class,
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Mutable scoring record for one egress route. Owned exclusively by the
/// pool; mutated only through the pool's update methods.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub endpoint: String,
    pub class: RouteClass,
    pub region: Option<String>,
    pub reputation: f32,
    pub banned_until: Option<Instant>,
    pub ban_count: u32,
    pub last_used: Option<Instant>,
    pub success_rate: f32,
    pub avg_latency_secs: f32,
}

impl ProxyRoute {
    fn from_definition(def: RouteDefinition, initial_reputation: f32) -> Self {
        Self {
            endpoint: def.endpoint,
            class: def.class,
            region: def.region,
            reputation: initial_reputation,
            banned_until: None,
            ban_count: 0,
            last_used: None,
            success_rate: 1.0,
            avg_latency_secs: 1.0,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        match self.banned_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    fn score(&self, latency_budget: Duration) -> f32 {
        let budget = latency_budget.as_secs_f32();
        let headroom = (budget - self.avg_latency_secs).max(0.0) / budget;
        self.reputation * 0.7 + headroom * 100.0 * 0.3
    }
}

/// Route handed to a caller; enough to address the proxy and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRoute {
    pub endpoint: String,
    pub class: RouteClass,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub success_delta: f32,
    pub failure_delta: f32,
    pub severe_delta: f32,
    pub ban_cooldown: Duration,
    pub latency_budget: Duration,
    pub probe_delta: f32,
    pub initial_reputation: f32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            success_delta: 2.0,
            failure_delta: 5.0,
            severe_delta: 25.0,
            ban_cooldown: Duration::from_secs(30 * 60),
            latency_budget: Duration::from_secs(10),
            probe_delta: 1.0,
            initial_reputation: 70.0,
        }
    }
}

/// Pool exhausted for the requested class. Callers fall back to a lower
/// class or abort; the pool never retries internally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no available route of class {class:?}")]
pub struct NoAvailableRoute {
    pub class: RouteClass,
}

#[derive(Debug, Clone)]
pub struct RouteStats {
    pub class: RouteClass,
    pub reputation: f32,
    pub ban_count: u32,
    pub success_rate: f32,
    pub avg_latency_secs: f32,
    pub banned: bool,
}

/// Aggregate pool health snapshot.
#[derive(Debug, Clone)]
pub struct PoolHealthReport {
    pub total_routes: usize,
    pub available_routes: usize,
    pub banned_routes: usize,
    pub details: HashMap<String, RouteStats>,
}

/// Scored pool of egress routes.
#[derive(Debug)]
pub struct ProxyPool {
    config: PoolConfig,
    routes: Vec<ProxyRoute>,
    current: Option<String>,
}

impl ProxyPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            current: None,
        }
    }

    pub fn load<I>(&mut self, definitions: I)
    where
        I: IntoIterator<Item = RouteDefinition>,
    {
        self.routes.clear();
        self.current = None;
        for def in definitions {
            self.add_route(def);
        }
    }

    pub fn add_route(&mut self, def: RouteDefinition) {
        if self.routes.iter().any(|route| route.endpoint == def.endpoint) {
            return;
        }
        self.routes
            .push(ProxyRoute::from_definition(def, self.config.initial_reputation));
    }

    /// Endpoint of the route most recently handed out.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.routes.iter().map(|route| route.endpoint.clone()).collect()
    }

    /// Pick the best non-banned route of the given class.
    pub fn select(&mut self, class: RouteClass) -> Result<SelectedRoute, NoAvailableRoute> {
        let now = Instant::now();
        let budget = self.config.latency_budget;

        let best = self
            .routes
            .iter_mut()
            .filter(|route| route.class == class && route.is_available(now))
            .max_by(|a, b| {
                a.score(budget)
                    .partial_cmp(&b.score(budget))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        match best {
            Some(route) => {
                route.banned_until = None;
                route.last_used = Some(now);
                let selected = SelectedRoute {
                    endpoint: route.endpoint.clone(),
                    class: route.class,
                    region: route.region.clone(),
                };
                self.current = Some(selected.endpoint.clone());
                Ok(selected)
            }
            None => Err(NoAvailableRoute { class }),
        }
    }

    /// Walk the fallback chain starting at `class`.
    pub fn select_with_fallback(
        &mut self,
        class: RouteClass,
    ) -> Result<SelectedRoute, NoAvailableRoute> {
        let mut candidate = Some(class);
        while let Some(current) = candidate {
            match self.select(current) {
                Ok(route) => {
                    if current != class {
                        log::debug!(
                            "route class {} exhausted, fell back to {}",
                            class.as_str(),
                            current.as_str()
                        );
                    }
                    return Ok(route);
                }
                Err(_) => candidate = current.fallback(),
            }
        }
        Err(NoAvailableRoute { class })
    }

    pub fn record_success(&mut self, endpoint: &str, latency: Duration) {
        let delta = self.config.success_delta;
        if let Some(route) = self.route_mut(endpoint) {
            route.reputation = (route.reputation + delta).clamp(0.0, 100.0);
            route.banned_until = None;
            update_ema(&mut route.success_rate, 1.0);
            update_ema(&mut route.avg_latency_secs, latency.as_secs_f32().min(60.0));
        }
    }

    pub fn record_failure(&mut self, endpoint: &str, severe: bool) {
        let delta = if severe {
            self.config.severe_delta
        } else {
            self.config.failure_delta
        };
        let cooldown = self.config.ban_cooldown;
        if let Some(route) = self.route_mut(endpoint) {
            route.reputation = (route.reputation - delta).clamp(0.0, 100.0);
            update_ema(&mut route.success_rate, 0.0);
            if severe {
                route.banned_until = Some(Instant::now() + cooldown);
                route.ban_count = route.ban_count.saturating_add(1);
            }
        }
    }

    /// Nudge reputation from a periodic health probe.
    pub fn apply_probe(&mut self, endpoint: &str, healthy: bool) {
        let delta = self.config.probe_delta;
        if let Some(route) = self.route_mut(endpoint) {
            let signed = if healthy { delta } else { -delta };
            route.reputation = (route.reputation + signed).clamp(0.0, 100.0);
            if !healthy {
                log::warn!("health probe failed for route {}", endpoint);
            }
        }
    }

    pub fn region_of(&self, endpoint: &str) -> Option<String> {
        self.routes
            .iter()
            .find(|route| route.endpoint == endpoint)
            .and_then(|route| route.region.clone())
    }

    pub fn health_report(&self) -> PoolHealthReport {
        let now = Instant::now();
        let mut details = HashMap::new();
        let mut available = 0;
        let mut banned = 0;
        for route in &self.routes {
            if route.is_available(now) {
                available += 1;
            } else {
                banned += 1;
            }
            details.insert(
                route.endpoint.clone(),
                RouteStats {
                    class: route.class,
                    reputation: route.reputation,
                    ban_count: route.ban_count,
                    success_rate: route.success_rate,
                    avg_latency_secs: route.avg_latency_secs,
                    banned: !route.is_available(now),
                },
            );
        }

        PoolHealthReport {
            total_routes: self.routes.len(),
            available_routes: available,
            banned_routes: banned,
            details,
        }
    }

    fn route_mut(&mut self, endpoint: &str) -> Option<&mut ProxyRoute> {
        self.routes.iter_mut().find(|route| route.endpoint == endpoint)
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn update_ema(current: &mut f32, sample: f32) {
    let alpha = 0.1;
    *current = (1.0 - alpha) * *current + alpha * sample;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(defs: Vec<RouteDefinition>) -> ProxyPool {
        let mut pool = ProxyPool::default();
        pool.load(defs);
        pool
    }

    #[test]
    fn selects_highest_scoring_route_of_class() {
        let mut pool = pool_with(vec![
            RouteDefinition::new("http://10.0.0.1:8080", RouteClass::Residential),
            RouteDefinition::new("http://10.0.0.2:8080", RouteClass::Residential),
        ]);
        // Push one route's reputation up so the ranking is unambiguous.
        for _ in 0..10 {
            pool.record_success("http://10.0.0.2:8080", Duration::from_millis(300));
        }

        let selected = pool.select(RouteClass::Residential).unwrap();
        assert_eq!(selected.endpoint, "http://10.0.0.2:8080");
        assert_eq!(pool.current(), Some("http://10.0.0.2:8080"));
    }

    #[test]
    fn never_selects_a_banned_route() {
        let mut pool = pool_with(vec![
            RouteDefinition::new("http://10.0.0.1:8080", RouteClass::Datacenter),
            RouteDefinition::new("http://10.0.0.2:8080", RouteClass::Datacenter),
        ]);
        pool.record_failure("http://10.0.0.1:8080", true);

        for _ in 0..20 {
            let selected = pool.select(RouteClass::Datacenter).unwrap();
            assert_eq!(selected.endpoint, "http://10.0.0.2:8080");
        }
    }

    #[test]
    fn exhausted_class_returns_typed_error() {
        let mut pool = pool_with(vec![
            RouteDefinition::new("http://10.0.0.1:8080", RouteClass::MobileCellular),
            RouteDefinition::new("http://10.0.0.2:8080", RouteClass::MobileCellular),
            RouteDefinition::new("http://10.0.0.3:8080", RouteClass::MobileCellular),
        ]);
        for endpoint in pool.endpoints() {
            pool.record_failure(&endpoint, true);
        }

        let err = pool.select(RouteClass::MobileCellular).unwrap_err();
        assert_eq!(err.class, RouteClass::MobileCellular);
    }

    #[test]
    fn fallback_walks_down_the_chain() {
        let mut pool = pool_with(vec![RouteDefinition::new(
            "http://dc.example:3128",
            RouteClass::Datacenter,
        )]);
        let selected = pool.select_with_fallback(RouteClass::MobileCellular).unwrap();
        assert_eq!(selected.class, RouteClass::Datacenter);
    }

    #[test]
    fn reputation_stays_clamped() {
        let mut pool = pool_with(vec![RouteDefinition::new(
            "http://10.0.0.1:8080",
            RouteClass::Residential,
        )]);
        for _ in 0..50 {
            pool.record_failure("http://10.0.0.1:8080", true);
        }
        let report = pool.health_report();
        let stats = &report.details["http://10.0.0.1:8080"];
        assert_eq!(stats.reputation, 0.0);

        for _ in 0..200 {
            pool.record_success("http://10.0.0.1:8080", Duration::from_millis(100));
        }
        let report = pool.health_report();
        let stats = &report.details["http://10.0.0.1:8080"];
        assert_eq!(stats.reputation, 100.0);
    }

    #[test]
    fn severe_failure_bans_and_counts() {
        let mut pool = pool_with(vec![RouteDefinition::new(
            "http://10.0.0.1:8080",
            RouteClass::Residential,
        )]);
        pool.record_failure("http://10.0.0.1:8080", true);
        let report = pool.health_report();
        assert_eq!(report.banned_routes, 1);
        assert_eq!(report.details["http://10.0.0.1:8080"].ban_count, 1);
    }
}
