//! Per-route circuit breaking.
//!
//! Each backend route family owns one [`CircuitBreaker`], created at startup
//! and shared by every request to that family. The breaker counts call
//! outcomes over a rolling window and trips once the failure ratio reaches
//! the configured threshold with enough samples to be meaningful. While
//! open, calls are rejected without touching the backend; after the reset
//! timeout exactly one trial request flows and its outcome decides whether
//! the breaker closes again or re-opens.
//!
//! Permission to call is an RAII [`BreakerPermit`]. A permit dropped without
//! an explicit outcome (the caller's task was cancelled mid-flight, or an
//! early error path returned before the call) counts nothing; if it held the
//! half-open trial slot, the slot is released so the next caller can become
//! the trial instead of the breaker staying wedged.
//!
//! All transitions for one breaker are serialized by its mutex: concurrent
//! outcome reports apply one at a time with no lost updates. Critical
//! sections only touch in-memory counters.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{config::BreakerConfig, metrics};

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// The outcome of one proxied call, as seen by breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Rejection returned when the breaker refuses to let a call through.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker for '{route}' is open; retry in {retry_in:?}")]
pub struct BreakerOpen {
    pub route: String,
    pub retry_in: Duration,
}

/// Permission for one call to the backend, handed out by
/// [`CircuitBreaker::try_acquire`].
///
/// Call [`record`](BreakerPermit::record) with the outcome once the call
/// finishes. Dropping the permit without an outcome releases it without
/// feeding the window; an abandoned trial frees the half-open slot.
#[must_use = "a permit must be recorded or dropped to release the breaker slot"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds the single half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report the outcome of the permitted call.
    pub fn record(mut self, outcome: CallOutcome) {
        self.reported = true;
        self.breaker.record_outcome(self.trial, outcome);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.release_unreported(self.trial);
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    total_count: u32,
    window_started_at: Instant,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// One breaker guarding one backend route family.
#[derive(Debug)]
pub struct CircuitBreaker {
    route: String,
    policy: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(route: impl Into<String>, policy: BreakerConfig) -> Self {
        let route = route.into();
        metrics::set_breaker_state(&route, BreakerState::Closed);
        Self {
            route,
            policy,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                total_count: 0,
                window_started_at: Instant::now(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// The route family this breaker guards.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Current state. An `Open` breaker whose reset timeout has elapsed
    /// still reports `Open` until the next [`try_acquire`] promotes it.
    ///
    /// [`try_acquire`]: CircuitBreaker::try_acquire
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Ask permission to send one call to the backend.
    ///
    /// `Closed` always permits. `Open` hard-rejects until the reset timeout
    /// elapses, at which point the breaker moves to `HalfOpen` and the
    /// caller's permit becomes the single trial. A `HalfOpen` breaker with a
    /// trial already in flight rejects everyone else.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, BreakerOpen> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(self.permit(false)),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.policy.reset_timeout() {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(BreakerOpen {
                        route: self.route.clone(),
                        retry_in: self.policy.reset_timeout().saturating_sub(elapsed),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BreakerOpen {
                        route: self.route.clone(),
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            trial,
            reported: false,
        }
    }

    /// Apply the outcome of a permitted call.
    ///
    /// A trial outcome fully determines the next state: success closes the
    /// breaker with reset counters, failure re-opens it with a fresh
    /// `opened_at`. A non-trial outcome feeds the rolling window and may
    /// trip the breaker, but only while `Closed`; outcomes arriving after
    /// the breaker opened (calls that were in flight when it tripped) are
    /// dropped, since the window restarted when the breaker opened.
    fn record_outcome(&self, trial: bool, outcome: CallOutcome) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
            match outcome {
                CallOutcome::Success => {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.failure_count = 0;
                    inner.total_count = 0;
                    inner.window_started_at = Instant::now();
                    inner.opened_at = None;
                }
                CallOutcome::Failure => {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            return;
        }

        if inner.state != BreakerState::Closed {
            return;
        }

        let now = Instant::now();
        if now.duration_since(inner.window_started_at) >= self.policy.rolling_window() {
            inner.failure_count = 0;
            inner.total_count = 0;
            inner.window_started_at = now;
        }

        inner.total_count += 1;
        if outcome == CallOutcome::Failure {
            inner.failure_count += 1;
        }

        if inner.total_count >= self.policy.min_samples
            && inner.failure_count * 100
                >= inner.total_count * u32::from(self.policy.error_threshold_percent)
        {
            self.transition(&mut inner, BreakerState::Open);
            inner.opened_at = Some(now);
            inner.failure_count = 0;
            inner.total_count = 0;
            inner.window_started_at = now;
        }
    }

    /// A permit was dropped without an outcome. Abandoned calls count
    /// nothing, but an abandoned trial must free the half-open slot or no
    /// later caller could ever probe the backend again.
    fn release_unreported(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            tracing::debug!(
                route = %self.route,
                "half-open trial abandoned without an outcome; slot released"
            );
        }
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) {
        let prev = inner.state;
        inner.state = next;
        metrics::set_breaker_state(&self.route, next);
        match next {
            BreakerState::Open => tracing::warn!(
                route = %self.route,
                from = prev.as_str(),
                "circuit breaker opened; rejecting calls to backend"
            ),
            BreakerState::HalfOpen => tracing::info!(
                route = %self.route,
                "circuit breaker half-open; allowing one trial request"
            ),
            BreakerState::Closed => tracing::info!(
                route = %self.route,
                "circuit breaker closed; backend recovered"
            ),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning would require a panic inside these short critical
        // sections; recover with the inner state rather than propagating.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The set of breakers, one per route family, built once at startup.
pub struct BreakerBank {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerBank {
    pub fn new(routes: &[String], policy: BreakerConfig) -> Self {
        let breakers = routes
            .iter()
            .map(|route| {
                (
                    route.clone(),
                    Arc::new(CircuitBreaker::new(route.clone(), policy)),
                )
            })
            .collect();
        Self { breakers }
    }

    /// The breaker for a route family. Every resolvable route has one.
    pub fn get(&self, route: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(route).cloned()
    }

    /// (route, state) snapshot for diagnostics.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|(route, breaker)| (route.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> BreakerConfig {
        BreakerConfig {
            error_threshold_percent: 50,
            min_samples: 10,
            reset_timeout_secs: 1,
            rolling_window_secs: 60,
            count_http_5xx: false,
        }
    }

    fn trip(breaker: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            breaker.try_acquire().unwrap().record(CallOutcome::Failure);
        }
    }

    #[test]
    fn stays_closed_below_min_samples() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 9);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn trips_at_threshold_with_enough_samples() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 10);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn mixed_outcomes_below_threshold_do_not_trip() {
        let breaker = CircuitBreaker::new("posts", fast_policy());
        // 4 failures out of 10 is 40%, under the 50% threshold.
        for i in 0..10 {
            breaker.try_acquire().unwrap().record(if i < 4 {
                CallOutcome::Failure
            } else {
                CallOutcome::Success
            });
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_rejection_names_route_and_retry_hint() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 10);
        let rejection = breaker.try_acquire().unwrap_err();
        assert_eq!(rejection.route, "auth");
        assert!(rejection.retry_in <= Duration::from_secs(1));
    }

    #[test]
    fn open_transitions_to_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 10);
        assert!(breaker.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(1100));
        // First caller after the timeout becomes the trial.
        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Everyone else is still rejected while the trial is in flight.
        assert!(breaker.try_acquire().is_err());
        trial.record(CallOutcome::Success);
    }

    #[test]
    fn successful_trial_closes_and_resets_counters() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 10);
        std::thread::sleep(Duration::from_millis(1100));

        breaker.try_acquire().unwrap().record(CallOutcome::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);

        // Counters were reset: nine fresh failures stay under min_samples.
        trip(&breaker, 9);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_trial_reopens_with_fresh_timeout() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        trip(&breaker, 10);
        std::thread::sleep(Duration::from_millis(1100));

        breaker.try_acquire().unwrap().record(CallOutcome::Failure);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn abandoned_trial_releases_the_slot() {
        let breaker = CircuitBreaker::new("posts", fast_policy());
        trip(&breaker, 10);
        std::thread::sleep(Duration::from_millis(1100));

        // The trial's task is dropped before any outcome exists (client
        // disconnected mid-flight).
        let trial = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
        drop(trial);

        // The slot is free again: the next caller becomes a fresh trial and
        // its success still closes the breaker.
        let retry = breaker.try_acquire().unwrap();
        assert!(retry.is_trial());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        retry.record(CallOutcome::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn abandoned_closed_permits_count_nothing() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        for _ in 0..15 {
            drop(breaker.try_acquire().unwrap());
        }

        // The window saw nothing: nine failures stay under min_samples, and
        // the tenth trips at 10/10. Had the fifteen drops counted as
        // successes, ten failures out of twenty-five would be 40% and the
        // breaker would stay closed.
        trip(&breaker, 9);
        assert_eq!(breaker.state(), BreakerState::Closed);
        trip(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn late_outcomes_while_open_are_ignored() {
        let breaker = CircuitBreaker::new("posts", fast_policy());

        // Two calls acquired while closed are still in flight when the
        // breaker trips.
        let in_flight_a = breaker.try_acquire().unwrap();
        let in_flight_b = breaker.try_acquire().unwrap();
        trip(&breaker, 10);
        assert_eq!(breaker.state(), BreakerState::Open);

        // Their late outcomes neither close nor re-trip the breaker.
        in_flight_a.record(CallOutcome::Success);
        in_flight_b.record(CallOutcome::Failure);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn non_trial_outcome_during_half_open_does_not_decide_the_trial() {
        let breaker = CircuitBreaker::new("auth", fast_policy());
        let stale = breaker.try_acquire().unwrap();
        trip(&breaker, 10);
        std::thread::sleep(Duration::from_millis(1100));

        let trial = breaker.try_acquire().unwrap();
        // A call from before the trip reporting now must not masquerade as
        // the trial outcome.
        stale.record(CallOutcome::Failure);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        trial.record(CallOutcome::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn rolling_window_expiry_resets_counts() {
        let mut policy = fast_policy();
        policy.rolling_window_secs = 1;
        let breaker = CircuitBreaker::new("auth", policy);

        trip(&breaker, 9);
        std::thread::sleep(Duration::from_millis(1100));
        // Window rolled over: this failure is 1/1, under min_samples.
        trip(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn bank_has_one_breaker_per_route() {
        let bank = BreakerBank::new(
            &["auth".to_string(), "posts".to_string(), "categories".to_string()],
            fast_policy(),
        );
        assert!(bank.get("auth").is_some());
        assert!(bank.get("comments").is_none());

        // Breakers are independent.
        let auth = bank.get("auth").unwrap();
        trip(&auth, 10);
        assert_eq!(auth.state(), BreakerState::Open);
        assert_eq!(bank.get("posts").unwrap().state(), BreakerState::Closed);
    }
}
