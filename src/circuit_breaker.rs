/// Circuit breaker state machine gating calls to a failing dependency
///
/// State transitions:
/// - Closed → Open: consecutive classified failures reach the threshold
///   within the failure window
/// - Open → HalfOpen: after the break duration elapses
/// - HalfOpen → Closed: the single trial call succeeds
/// - HalfOpen → Open: the trial fails, with the break duration escalating
///
/// The breaker itself consumes booleans; what counts as a failure is decided
/// by the [`FailureClassifier`] attached to the [`CircuitBreakerPolicy`].
use crate::clock::{Clock, MonotonicClock};
use crate::metrics::CircuitBreakerMetrics;
use crate::outcome::{FailureClassifier, Fault};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Circuit is open, calls fail fast
    Open,
    /// Testing whether the dependency recovered; one trial call allowed
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count that opens the circuit
    pub failure_threshold: u32,
    /// Window within which failures accumulate; counting restarts when a
    /// failure lands after the window has lapsed
    pub failure_window: Duration,
    /// Base cooldown before an open circuit admits a trial call
    pub break_duration: Duration,
    /// Multiplier applied to the cooldown each time the trial fails
    /// (1.0 keeps it constant)
    pub break_escalation: f64,
    /// Upper bound on the escalated cooldown
    pub max_break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            break_duration: Duration::from_secs(30),
            break_escalation: 1.0,
            max_break_duration: Duration::from_secs(300),
        }
    }
}

/// Observer for breaker transitions. Listener panics are caught and logged,
/// never surfaced to the caller.
pub trait BreakerListener: Send + Sync {
    fn on_break(&self, fault: &Fault, duration: Duration) {
        let _ = (fault, duration);
    }
    fn on_reset(&self) {}
    fn on_half_open(&self) {}
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn BreakerListener>>,
    state: Arc<RwLock<BreakerInner>>,
}

struct BreakerInner {
    current: CircuitState,
    failure_count: u32,
    window_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    current_break: Duration,
    trial_in_flight: bool,
}

enum BreakerEvent {
    Break { fault: Fault, duration: Duration },
    Reset,
    HalfOpen,
}

/// How a call was admitted: a plain Closed-state pass, or the one HalfOpen
/// trial. The executor must know which, so an abandoned trial (and only a
/// trial) can release its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Normal,
    Trial,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let current_break = config.break_duration;
        Self {
            config,
            clock: Arc::new(MonotonicClock),
            listeners: Vec::new(),
            state: Arc::new(RwLock::new(BreakerInner {
                current: CircuitState::Closed,
                failure_count: 0,
                window_started_at: None,
                opened_at: None,
                current_break,
                trial_in_flight: false,
            })),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// May this call proceed now? An Open circuit whose cooldown has elapsed
    /// moves to HalfOpen and admits exactly the one caller that observed the
    /// transition; everyone else is rejected until the trial resolves.
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    pub(crate) fn admit(&self) -> Option<Admission> {
        let event = {
            let mut state = self.state.write();
            match state.current {
                CircuitState::Closed => return Some(Admission::Normal),
                CircuitState::Open => {
                    let elapsed = state
                        .opened_at
                        .map(|at| self.clock.now().duration_since(at))
                        .unwrap_or(Duration::ZERO);
                    if elapsed < state.current_break {
                        return None;
                    }
                    info!("circuit breaker: open -> half-open");
                    CircuitBreakerMetrics::record_state_transition("open", "half_open");
                    state.current = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    BreakerEvent::HalfOpen
                }
                CircuitState::HalfOpen => {
                    if state.trial_in_flight {
                        return None;
                    }
                    state.trial_in_flight = true;
                    return Some(Admission::Trial);
                }
            }
        };
        self.notify(event);
        Some(Admission::Trial)
    }

    /// Record a successful completion of an admitted call.
    pub fn record_success(&self) {
        let event = {
            let mut state = self.state.write();
            match state.current {
                CircuitState::Closed => {
                    state.failure_count = 0;
                    state.window_started_at = None;
                    return;
                }
                CircuitState::HalfOpen => {
                    info!("circuit breaker: half-open -> closed");
                    CircuitBreakerMetrics::record_state_transition("half_open", "closed");
                    state.current = CircuitState::Closed;
                    state.failure_count = 0;
                    state.window_started_at = None;
                    state.trial_in_flight = false;
                    state.current_break = self.config.break_duration;
                    BreakerEvent::Reset
                }
                // A call admitted before the break completed late; the
                // cooldown stands until the trial says otherwise.
                CircuitState::Open => return,
            }
        };
        self.notify(event);
    }

    /// Record a classified failure of an admitted call.
    pub fn record_failure(&self, fault: &Fault) {
        let now = self.clock.now();
        let event = {
            let mut state = self.state.write();
            match state.current {
                CircuitState::Closed => {
                    let window_lapsed = state
                        .window_started_at
                        .map(|at| now.duration_since(at) > self.config.failure_window)
                        .unwrap_or(true);
                    if window_lapsed {
                        state.window_started_at = Some(now);
                        state.failure_count = 1;
                    } else {
                        state.failure_count += 1;
                    }

                    if state.failure_count < self.config.failure_threshold {
                        return;
                    }
                    warn!(
                        failures = state.failure_count,
                        "circuit breaker: closed -> open"
                    );
                    CircuitBreakerMetrics::record_state_transition("closed", "open");
                    state.current = CircuitState::Open;
                    state.opened_at = Some(now);
                    BreakerEvent::Break {
                        fault: fault.clone(),
                        duration: state.current_break,
                    }
                }
                CircuitState::HalfOpen => {
                    let escalated_ms =
                        state.current_break.as_millis() as f64 * self.config.break_escalation;
                    let capped_ms =
                        escalated_ms.min(self.config.max_break_duration.as_millis() as f64);
                    state.current_break = Duration::from_millis(capped_ms as u64);

                    warn!(
                        cooldown_ms = state.current_break.as_millis() as u64,
                        "circuit breaker: half-open -> open (trial failed)"
                    );
                    CircuitBreakerMetrics::record_state_transition("half_open", "open");
                    state.current = CircuitState::Open;
                    state.opened_at = Some(now);
                    state.trial_in_flight = false;
                    BreakerEvent::Break {
                        fault: fault.clone(),
                        duration: state.current_break,
                    }
                }
                CircuitState::Open => return,
            }
        };
        self.notify(event);
    }

    /// Release a HalfOpen trial slot whose caller vanished without an
    /// outcome. State transitions happen only on actual completion.
    pub(crate) fn release_trial(&self) {
        let mut state = self.state.write();
        if state.current == CircuitState::HalfOpen {
            state.trial_in_flight = false;
        }
    }

    /// Current circuit state (for monitoring)
    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    /// Accumulated failure count in the current window (for monitoring)
    pub fn failure_count(&self) -> u32 {
        self.state.read().failure_count
    }

    fn notify(&self, event: BreakerEvent) {
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &event {
                BreakerEvent::Break { fault, duration } => listener.on_break(fault, *duration),
                BreakerEvent::Reset => listener.on_reset(),
                BreakerEvent::HalfOpen => listener.on_half_open(),
            }));
            if outcome.is_err() {
                warn!("circuit breaker listener panicked; ignoring");
            }
        }
    }
}

/// Circuit breaker plus the failure classifier the executor applies to call
/// outcomes before feeding them to the state machine.
#[derive(Clone)]
pub struct CircuitBreakerPolicy<T> {
    pub(crate) breaker: CircuitBreaker,
    pub(crate) classifier: FailureClassifier<T>,
}

impl<T> CircuitBreakerPolicy<T> {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config),
            classifier: FailureClassifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier<T>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.breaker = self.breaker.with_clock(clock);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.breaker = self.breaker.with_listener(listener);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
