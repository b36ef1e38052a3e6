/// Prometheus metrics for policy activity
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_resilience_circuit_breaker_state_transitions_total",
        "Total number of circuit breaker state transitions",
        &["from", "to"]
    )
    .expect("Failed to register circuit breaker state transitions metric")
});

#[cfg(feature = "metrics")]
static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_resilience_retry_attempts",
        "Number of attempts before success or exhaustion",
        &["result"]
    )
    .expect("Failed to register retry attempts metric")
});

#[cfg(feature = "metrics")]
static CACHE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_resilience_cache_operations_total",
        "Total number of response cache operations",
        &["operation"]
    )
    .expect("Failed to register cache operations metric")
});

/// Metrics collector for circuit breaker
#[cfg(feature = "metrics")]
pub struct CircuitBreakerMetrics;

#[cfg(feature = "metrics")]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(from: &str, to: &str) {
        CIRCUIT_BREAKER_STATE_TRANSITIONS
            .with_label_values(&[from, to])
            .inc();
    }
}

/// Metrics collector for retries
#[cfg(feature = "metrics")]
pub struct RetryMetrics;

#[cfg(feature = "metrics")]
impl RetryMetrics {
    pub fn record_attempts(result: &str, attempts: u32) {
        RETRY_ATTEMPTS
            .with_label_values(&[result])
            .observe(attempts as f64);
    }
}

/// Metrics collector for the response cache
#[cfg(feature = "metrics")]
pub struct CacheMetrics;

#[cfg(feature = "metrics")]
impl CacheMetrics {
    pub fn record_operation(operation: &str) {
        CACHE_OPERATIONS.with_label_values(&[operation]).inc();
    }
}

// No-op implementations when the metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct CircuitBreakerMetrics;

#[cfg(not(feature = "metrics"))]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(_from: &str, _to: &str) {}
}

#[cfg(not(feature = "metrics"))]
pub struct RetryMetrics;

#[cfg(not(feature = "metrics"))]
impl RetryMetrics {
    pub fn record_attempts(_result: &str, _attempts: u32) {}
}

#[cfg(not(feature = "metrics"))]
pub struct CacheMetrics;

#[cfg(not(feature = "metrics"))]
impl CacheMetrics {
    pub fn record_operation(_operation: &str) {}
}
