//! Retry policy and circuit breaker.
//!
//! Policies are keyed by [`ErrorCategory`]: transient downstream failures
//! (network, timeout, rate-limit, vector-store) back off exponentially
//! with jitter; everything else fails fast and is recorded per line. The
//! breaker tracks a rolling per-category error rate and short-circuits
//! calls while a category is unhealthy.

use crate::error::ErrorCategory;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Backoff parameters for one error category.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts including the first.
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  /// Extra delay fraction added per attempt, 0.0..=1.0.
  pub jitter: f64,
}

impl RetryPolicy {
  /// Single attempt, no retry.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
      jitter: 0.0,
    }
  }

  /// Delay before retry number `attempt` (0-based: the delay after the
  /// first failure is `backoff_for_attempt(0)`).
  pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let mut backoff = Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()));

    if self.jitter > 0.0 {
      let jitter_factor = 1.0 + (rand_f64() * self.jitter);
      backoff = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
    }

    backoff.min(self.max_delay)
  }
}

/// A simple pseudo-random number generator for jitter (no external deps)
fn rand_f64() -> f64 {
  use std::time::{SystemTime, UNIX_EPOCH};

  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .subsec_nanos();

  (nanos as f64 / u32::MAX as f64).fract()
}

/// Per-category retry policy table.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
  policies: HashMap<ErrorCategory, RetryPolicy>,
  fallback: RetryPolicy,
}

impl Default for RetryPolicies {
  fn default() -> Self {
    Self::with_transient_policy(RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(30),
      jitter: 0.25,
    })
  }
}

impl RetryPolicies {
  /// Build the table from a single transient-failure policy; rate-limit
  /// gets a gentler start, non-retryable categories a single attempt.
  pub fn with_transient_policy(transient: RetryPolicy) -> Self {
    let mut policies = HashMap::new();
    for cat in ErrorCategory::ALL {
      if cat.retryable_in_run() {
        policies.insert(cat, transient.clone());
      } else {
        policies.insert(cat, RetryPolicy::none());
      }
    }
    if let Some(rate) = policies.get_mut(&ErrorCategory::RateLimit) {
      rate.base_delay = rate.base_delay.max(Duration::from_secs(1)) * 2;
    }
    Self {
      policies,
      fallback: RetryPolicy::none(),
    }
  }

  pub fn for_category(&self, cat: ErrorCategory) -> &RetryPolicy {
    self.policies.get(&cat).unwrap_or(&self.fallback)
  }
}

/// Breaker verdict for one prospective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
  /// Category healthy, call freely.
  Allow,
  /// Cool-down elapsed; one probe call may go through.
  Probe,
  /// Category open; short-circuit for at least this long.
  Open(Duration),
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
  /// Sliding window over which the error rate is computed.
  pub window: Duration,
  /// Error-rate threshold (0.0..=1.0) that opens the breaker.
  pub threshold: f64,
  /// Minimum outcomes in the window before the rate is meaningful.
  pub min_samples: usize,
  /// How long an open category short-circuits before probing.
  pub cooldown: Duration,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      window: Duration::from_secs(60),
      threshold: 0.5,
      min_samples: 10,
      cooldown: Duration::from_secs(15),
    }
  }
}

#[derive(Debug, Default)]
struct CategoryState {
  outcomes: VecDeque<(Instant, bool)>,
  opened_at: Option<Instant>,
  probing: bool,
}

/// Rolling-window circuit breaker, one state per error category.
///
/// Shared across workers; all methods take `&self`.
#[derive(Debug)]
pub struct CircuitBreaker {
  config: BreakerConfig,
  state: Mutex<HashMap<ErrorCategory, CategoryState>>,
}

impl CircuitBreaker {
  pub fn new(config: BreakerConfig) -> Self {
    Self {
      config,
      state: Mutex::new(HashMap::new()),
    }
  }

  /// Decide whether a call of this category may proceed right now.
  pub fn check(&self, cat: ErrorCategory) -> BreakerDecision {
    let mut guard = match self.state.lock() {
      Ok(g) => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    let state = guard.entry(cat).or_default();
    let now = Instant::now();

    if let Some(opened) = state.opened_at {
      let elapsed = now.duration_since(opened);
      if elapsed < self.config.cooldown {
        return BreakerDecision::Open(self.config.cooldown - elapsed);
      }
      // Cool-down over: let a single probe through at a time.
      if state.probing {
        return BreakerDecision::Open(self.config.cooldown);
      }
      state.probing = true;
      return BreakerDecision::Probe;
    }

    Self::prune(&mut state.outcomes, now, self.config.window);
    let total = state.outcomes.len();
    if total >= self.config.min_samples {
      let failures = state.outcomes.iter().filter(|(_, ok)| !ok).count();
      if failures as f64 / total as f64 > self.config.threshold {
        state.opened_at = Some(now);
        state.probing = false;
        return BreakerDecision::Open(self.config.cooldown);
      }
    }

    BreakerDecision::Allow
  }

  /// Record the outcome of a call of this category.
  pub fn record(&self, cat: ErrorCategory, ok: bool) {
    let mut guard = match self.state.lock() {
      Ok(g) => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    let state = guard.entry(cat).or_default();
    let now = Instant::now();

    if state.opened_at.is_some() {
      // Probe outcome decides whether the category closes or re-opens.
      state.probing = false;
      if ok {
        state.opened_at = None;
        state.outcomes.clear();
      } else {
        state.opened_at = Some(now);
      }
      return;
    }

    state.outcomes.push_back((now, ok));
    Self::prune(&mut state.outcomes, now, self.config.window);
  }

  fn prune(outcomes: &mut VecDeque<(Instant, bool)>, now: Instant, window: Duration) {
    while let Some((at, _)) = outcomes.front() {
      if now.duration_since(*at) > window {
        outcomes.pop_front();
      } else {
        break;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_without_jitter() {
    let policy = RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(60),
      jitter: 0.0,
    };
    assert_eq!(policy.backoff_for_attempt(0), Duration::from_secs(1));
    assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(2));
    assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(4));
    assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(8));
  }

  #[test]
  fn test_backoff_respects_max() {
    let policy = RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_secs(10),
      max_delay: Duration::from_secs(30),
      jitter: 0.0,
    };
    assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(30));
  }

  #[test]
  fn test_jitter_stays_bounded() {
    let policy = RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(60),
      jitter: 0.25,
    };
    for attempt in 0..4u32 {
      let unjittered = Duration::from_secs(1u64 << attempt);
      let d = policy.backoff_for_attempt(attempt);
      assert!(d >= unjittered);
      assert!(d <= Duration::from_secs_f64(unjittered.as_secs_f64() * 1.25) + Duration::from_millis(1));
    }
  }

  #[test]
  fn test_policies_single_attempt_for_non_retryable() {
    let policies = RetryPolicies::default();
    assert_eq!(policies.for_category(ErrorCategory::Validation).max_attempts, 1);
    assert_eq!(policies.for_category(ErrorCategory::Encoding).max_attempts, 1);
    assert!(policies.for_category(ErrorCategory::Network).max_attempts > 1);
  }

  #[test]
  fn test_rate_limit_backs_off_harder_than_network() {
    let policies = RetryPolicies::default();
    let network = policies.for_category(ErrorCategory::Network);
    let rate = policies.for_category(ErrorCategory::RateLimit);
    assert!(rate.base_delay > network.base_delay);
  }

  fn tight_breaker() -> CircuitBreaker {
    CircuitBreaker::new(BreakerConfig {
      window: Duration::from_secs(60),
      threshold: 0.5,
      min_samples: 4,
      cooldown: Duration::from_millis(20),
    })
  }

  #[test]
  fn test_breaker_opens_past_threshold() {
    let breaker = tight_breaker();
    for _ in 0..4 {
      assert_eq!(breaker.check(ErrorCategory::VectorStore), BreakerDecision::Allow);
      breaker.record(ErrorCategory::VectorStore, false);
    }
    assert!(matches!(
      breaker.check(ErrorCategory::VectorStore),
      BreakerDecision::Open(_)
    ));
  }

  #[test]
  fn test_breaker_stays_closed_below_min_samples() {
    let breaker = tight_breaker();
    for _ in 0..3 {
      breaker.record(ErrorCategory::Network, false);
    }
    assert_eq!(breaker.check(ErrorCategory::Network), BreakerDecision::Allow);
  }

  #[test]
  fn test_breaker_probe_then_close() {
    let breaker = tight_breaker();
    for _ in 0..4 {
      breaker.record(ErrorCategory::VectorStore, false);
    }
    assert!(matches!(
      breaker.check(ErrorCategory::VectorStore),
      BreakerDecision::Open(_)
    ));

    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(breaker.check(ErrorCategory::VectorStore), BreakerDecision::Probe);
    // A second caller during the probe is still short-circuited
    assert!(matches!(
      breaker.check(ErrorCategory::VectorStore),
      BreakerDecision::Open(_)
    ));

    breaker.record(ErrorCategory::VectorStore, true);
    assert_eq!(breaker.check(ErrorCategory::VectorStore), BreakerDecision::Allow);
  }

  #[test]
  fn test_breaker_probe_failure_reopens() {
    let breaker = tight_breaker();
    for _ in 0..4 {
      breaker.record(ErrorCategory::Timeout, false);
    }
    let _ = breaker.check(ErrorCategory::Timeout);
    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(breaker.check(ErrorCategory::Timeout), BreakerDecision::Probe);
    breaker.record(ErrorCategory::Timeout, false);
    assert!(matches!(breaker.check(ErrorCategory::Timeout), BreakerDecision::Open(_)));
  }

  #[test]
  fn test_breaker_categories_are_independent() {
    let breaker = tight_breaker();
    for _ in 0..4 {
      breaker.record(ErrorCategory::VectorStore, false);
    }
    assert!(matches!(
      breaker.check(ErrorCategory::VectorStore),
      BreakerDecision::Open(_)
    ));
    assert_eq!(breaker.check(ErrorCategory::Network), BreakerDecision::Allow);
  }
}
