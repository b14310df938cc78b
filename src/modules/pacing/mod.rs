//! Human-like request pacing.
//!
//! Computes inter-request delays from a bounded normal distribution, decides
//! when to take extended breaks, and enforces a hard spacing floor. Purely
//! computational; callers are responsible for actually sleeping.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub mean_delay: Duration,
    pub stddev: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// No two requests may be issued closer together than this.
    pub hard_floor: Duration,
    pub break_check_threshold: u32,
    pub break_probability: f64,
    pub break_duration: Duration,
    pub break_jitter: Duration,
    /// Every Nth request forces a long cooldown regardless of other signals.
    pub long_cooldown_every: u32,
    pub long_cooldown: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mean_delay: Duration::from_secs(7),
            stddev: Duration::from_millis(2_500),
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(15),
            hard_floor: Duration::from_secs(5),
            break_check_threshold: 20,
            break_probability: 0.05,
            break_duration: Duration::from_secs(120),
            break_jitter: Duration::from_secs(30),
            long_cooldown_every: 100,
            long_cooldown: Duration::from_secs(120),
        }
    }
}

/// Stateful delay generator emulating human inter-action timing.
pub struct PacingController {
    config: PacingConfig,
    delay_dist: Normal<f64>,
    rng: StdRng,
    issued: u32,
    last_issued: Option<Instant>,
    emergency_throttle: bool,
}

impl PacingController {
    pub fn new(config: PacingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic controller for tests.
    pub fn with_seed(config: PacingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PacingConfig, rng: StdRng) -> Self {
        let delay_dist = Normal::new(
            config.mean_delay.as_secs_f64(),
            config.stddev.as_secs_f64(),
        )
        .expect("valid normal parameters");
        Self {
            config,
            delay_dist,
            rng,
            issued: 0,
            last_issued: None,
            emergency_throttle: false,
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn emergency_throttled(&self) -> bool {
        self.emergency_throttle
    }

    /// Delay to apply before the next request.
    pub fn next_delay(&mut self) -> Duration {
        self.issued = self.issued.saturating_add(1);

        let mut delay = if self.config.long_cooldown_every > 0
            && self.issued % self.config.long_cooldown_every == 0
        {
            log::debug!("forced long cooldown after {} requests", self.issued);
            self.scaled(self.config.long_cooldown)
        } else {
            let sampled = self.delay_dist.sample(&mut self.rng);
            let clamped = sampled.clamp(
                self.config.min_delay.as_secs_f64(),
                self.config.max_delay.as_secs_f64(),
            );
            self.scaled(Duration::from_secs_f64(clamped))
        };

        // Hard spacing floor against the previous issue time.
        let now = Instant::now();
        if let Some(last) = self.last_issued {
            let floor = self.scaled(self.config.hard_floor);
            let since = now.saturating_duration_since(last);
            if let Some(remaining) = floor.checked_sub(since) {
                delay = delay.max(remaining);
            }
        }
        self.last_issued = Some(now);

        delay
    }

    /// After a stretch of requests a small probability triggers an extended
    /// pause, like a human wandering off.
    pub fn should_take_break(&mut self, recent_request_count: u32) -> bool {
        recent_request_count >= self.config.break_check_threshold
            && self.rng.gen_bool(self.config.break_probability)
    }

    pub fn break_duration(&mut self) -> Duration {
        let jitter = self.config.break_jitter.as_secs_f64();
        let offset = self.rng.gen_range(-jitter..=jitter);
        let base = self.config.break_duration.as_secs_f64();
        self.scaled(Duration::from_secs_f64((base + offset).max(1.0)))
    }

    /// Halve global throughput while an escalated recovery is in effect.
    pub fn apply_emergency_throttle(&mut self) {
        if !self.emergency_throttle {
            self.emergency_throttle = true;
            log::warn!("emergency throttle engaged: inter-request floor doubled");
        }
    }

    pub fn clear_emergency_throttle(&mut self) {
        if self.emergency_throttle {
            self.emergency_throttle = false;
            log::info!("emergency throttle released");
        }
    }

    fn scaled(&self, duration: Duration) -> Duration {
        if self.emergency_throttle {
            duration * 2
        } else {
            duration
        }
    }
}
