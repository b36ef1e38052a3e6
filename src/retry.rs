/// Retry scheduling with caller-shaped backoff
///
/// A [`RetryPlan`] is the delay schedule (how many attempts, how long before
/// each). A [`RetryScheduler`] binds a plan to a failure classifier and an
/// optional per-attempt callback and drives the loop. Delays suspend on
/// `tokio::time::sleep`, never blocking the runtime.
use crate::metrics::RetryMetrics;
use crate::outcome::{CallResult, FailureClassifier, Fault};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
type OnRetry = Arc<dyn Fn(&Fault, u32) + Send + Sync>;

/// Ordered schedule of retry delays: `max_attempts` retries after the first
/// call, with the delay before retry `n` (1-based) computed by the delay
/// function.
#[derive(Clone)]
pub struct RetryPlan {
    max_attempts: u32,
    delay: DelayFn,
}

impl RetryPlan {
    /// Custom delay shape.
    pub fn with_delay_fn(
        max_attempts: u32,
        delay: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts,
            delay: Arc::new(delay),
        }
    }

    /// The same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::with_delay_fn(max_attempts, move |_| delay)
    }

    /// Delay grows linearly: retry `n` waits `n * base`.
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self::with_delay_fn(max_attempts, move |attempt| base * attempt)
    }

    /// Exponential backoff: retry `n` waits `initial * multiplier^(n-1)`,
    /// capped at `max_backoff`.
    pub fn exponential(
        max_attempts: u32,
        initial: Duration,
        multiplier: f64,
        max_backoff: Duration,
    ) -> Self {
        Self::with_delay_fn(max_attempts, move |attempt| {
            exponential_delay(attempt, initial, multiplier, max_backoff)
        })
    }

    /// Exponential backoff with ±30% jitter to spread synchronized retries.
    pub fn exponential_jittered(
        max_attempts: u32,
        initial: Duration,
        multiplier: f64,
        max_backoff: Duration,
    ) -> Self {
        Self::with_delay_fn(max_attempts, move |attempt| {
            jitter(exponential_delay(attempt, initial, multiplier, max_backoff))
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }
}

impl fmt::Debug for RetryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPlan")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

fn exponential_delay(
    attempt: u32,
    initial: Duration,
    multiplier: f64,
    max_backoff: Duration,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let ms = initial.as_millis() as f64 * multiplier.powi(exponent as i32);
    Duration::from_millis(ms.min(max_backoff.as_millis() as f64) as u64)
}

fn jitter(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

/// Drives an operation through a [`RetryPlan`].
#[derive(Clone)]
pub struct RetryScheduler<T> {
    plan: RetryPlan,
    classifier: FailureClassifier<T>,
    on_retry: Option<OnRetry>,
}

impl<T> RetryScheduler<T> {
    pub fn new(plan: RetryPlan) -> Self {
        Self {
            plan,
            classifier: FailureClassifier::default(),
            on_retry: None,
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier<T>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Callback fired after each classified failure, before the backoff
    /// delay. Panics are caught and logged; they never abort the loop.
    pub fn on_retry(mut self, callback: impl Fn(&Fault, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn plan(&self) -> &RetryPlan {
        &self.plan
    }

    /// Attempt `op` up to `max_attempts + 1` times total, retrying outcomes
    /// the classifier flags as failures. Exhaustion yields a
    /// `RetryExhausted` fault carrying the last fault as its cause; a
    /// classified-failure success value is handed back unchanged.
    pub async fn execute<F, Fut>(&self, mut op: F) -> CallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = op().await;
            if !self.classifier.is_failure(&result) {
                RetryMetrics::record_attempts("success", attempt + 1);
                return result;
            }

            attempt += 1;
            if attempt > self.plan.max_attempts {
                warn!(
                    attempts = attempt,
                    "retry attempts exhausted, returning last fault"
                );
                RetryMetrics::record_attempts("exhausted", attempt);
                return match result {
                    CallResult::Fault(last) => {
                        CallResult::Fault(Fault::retry_exhausted(attempt, last))
                    }
                    // The classifier flagged a success payload (e.g. an HTTP
                    // 5xx); the caller still gets the actual response.
                    success => success,
                };
            }

            let fault = match &result {
                CallResult::Fault(fault) => fault.clone(),
                CallResult::Success(_) => Fault::logical("response classified as failure"),
            };
            if let Some(callback) = &self.on_retry {
                if catch_unwind(AssertUnwindSafe(|| callback(&fault, attempt))).is_err() {
                    warn!("retry callback panicked; ignoring");
                }
            }

            let delay = self.plan.delay_for(attempt);
            warn!(
                attempt,
                max_attempts = self.plan.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl<T> fmt::Debug for RetryScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FaultKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn linear_delays_increase_per_attempt() {
        let plan = RetryPlan::linear(3, Duration::from_millis(100));
        assert_eq!(plan.delay_for(1), Duration::from_millis(100));
        assert_eq!(plan.delay_for(2), Duration::from_millis(200));
        assert_eq!(plan.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_delays_cap_at_max_backoff() {
        let plan = RetryPlan::exponential(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(250),
        );
        assert_eq!(plan.delay_for(1), Duration::from_millis(100));
        assert_eq!(plan.delay_for(2), Duration::from_millis(200));
        assert_eq!(plan.delay_for(3), Duration::from_millis(250));
        assert_eq!(plan.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn jittered_delay_stays_within_band() {
        let plan = RetryPlan::exponential_jittered(
            3,
            Duration::from_millis(1000),
            2.0,
            Duration::from_secs(10),
        );
        for _ in 0..50 {
            let delay = plan.delay_for(1);
            assert!(delay >= Duration::from_millis(700));
            assert!(delay <= Duration::from_millis(1300));
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_invokes_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let scheduler =
            RetryScheduler::new(RetryPlan::fixed(3, Duration::from_millis(10)));

        let result = scheduler
            .execute(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { CallResult::Success(42) }
            })
            .await;

        assert_eq!(result.success(), Some(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let scheduler =
            RetryScheduler::new(RetryPlan::fixed(3, Duration::from_millis(10)));

        let result = scheduler
            .execute(move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        CallResult::Fault(Fault::transport("transient"))
                    } else {
                        CallResult::Success(42)
                    }
                }
            })
            .await;

        assert_eq!(result.success(), Some(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_performs_exact_attempt_count_and_keeps_last_fault() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let scheduler =
            RetryScheduler::<u32>::new(RetryPlan::fixed(3, Duration::from_millis(10)));

        let result = scheduler
            .execute(move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move { CallResult::Fault(Fault::transport(format!("failure {count}"))) }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        let fault = result.fault().expect("fault");
        assert_eq!(fault.kind, FaultKind::RetryExhausted);
        let last = fault.cause.as_deref().expect("cause");
        assert_eq!(last.detail, "failure 3");
    }

    #[tokio::test]
    async fn non_retryable_fault_returns_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let scheduler = RetryScheduler::new(RetryPlan::fixed(3, Duration::from_millis(10)))
            .with_classifier(FailureClassifier::new(|result: &CallResult<u32>| {
                matches!(
                    result,
                    CallResult::Fault(fault) if fault.kind == FaultKind::Transport
                )
            }));

        let result = scheduler
            .execute(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { CallResult::<u32>::Fault(Fault::logical("bad request")) }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(result.fault().expect("fault").kind, FaultKind::Logical);
    }

    #[tokio::test]
    async fn classified_failure_success_is_returned_unchanged_on_exhaustion() {
        let scheduler = RetryScheduler::new(RetryPlan::fixed(2, Duration::from_millis(5)))
            .with_classifier(FailureClassifier::new(|result: &CallResult<u16>| {
                match result {
                    CallResult::Success(status) => *status >= 500,
                    CallResult::Fault(_) => true,
                }
            }));

        let result = scheduler.execute(|| async { CallResult::Success(503u16) }).await;
        assert_eq!(result.success(), Some(503));
    }

    #[tokio::test]
    async fn retry_callback_fires_per_failed_attempt() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let scheduler = RetryScheduler::new(RetryPlan::fixed(2, Duration::from_millis(5)))
            .on_retry(move |_fault, attempt| {
                seen_clone.fetch_add(attempt, Ordering::SeqCst);
            });

        let _ = scheduler
            .execute(|| async { CallResult::<u32>::Fault(Fault::transport("down")) })
            .await;

        // Attempts 1 and 2 each fired the callback.
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_abort_the_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let scheduler = RetryScheduler::new(RetryPlan::fixed(2, Duration::from_millis(5)))
            .on_retry(|_fault, _attempt| panic!("callback bug"));

        let result = scheduler
            .execute(move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 1 {
                        CallResult::Fault(Fault::transport("transient"))
                    } else {
                        CallResult::Success(7)
                    }
                }
            })
            .await;

        assert_eq!(result.success(), Some(7));
    }

    #[tokio::test]
    async fn backoff_delays_are_actually_awaited() {
        let scheduler =
            RetryScheduler::new(RetryPlan::fixed(3, Duration::from_millis(20)));
        let start = std::time::Instant::now();

        let _ = scheduler
            .execute(|| async { CallResult::<u32>::Fault(Fault::transport("down")) })
            .await;

        // 3 retries at 20ms each.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
