/// Composable resilience policies for outbound HTTP calls
///
/// This library wraps an abstract asynchronous call with named, reusable
/// policies:
/// - **Circuit Breaker**: fails fast once a dependency keeps failing, then
///   probes recovery with a single half-open trial call
/// - **Retry**: re-attempts classified failures with caller-shaped backoff
/// - **Response Cache**: serves a prior successful result by request
///   fingerprint until its TTL lapses
/// - **Policy Registry**: startup-built, immutable name → policy mapping
/// - **Policy Executor**: chains policies outer-to-inner around one call
/// - **Tower Layer**: wraps any `tower::Service` with a policy chain
///
/// # Example: registry-driven execution
///
/// ```rust,no_run
/// use http_resilience::{
///     presets, CacheKey, CallResult, FailureClassifier, Fault, PolicyExecutor, PolicyRegistry,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let mut builder = PolicyRegistry::builder();
///     let names = presets::read_through()
///         .register_into(&mut builder, "users", FailureClassifier::faults_only())
///         .unwrap();
///     let executor = PolicyExecutor::new(Arc::new(builder.build()));
///
///     let chain: Vec<&str> = names.iter().map(String::as_str).collect();
///     let key = CacheKey::for_request("GET", "http://localhost:5000/api/users/42", b"");
///     let result = executor
///         .execute(&chain, &key, || async {
///             // Your HTTP call here
///             CallResult::<String>::Fault(Fault::transport("connection refused"))
///         })
///         .await
///         .unwrap();
///
///     if let Some(fault) = result.fault() {
///         eprintln!("call failed: {fault}");
///     }
/// }
/// ```
///
/// # Example: driving a breaker by hand
///
/// ```rust
/// use http_resilience::{CircuitBreaker, CircuitBreakerConfig, Fault};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
/// if breaker.allow() {
///     // make the call, then report how it went
///     breaker.record_failure(&Fault::transport("503 from upstream"));
/// }
/// ```
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod executor;
pub mod layer;
pub mod metrics;
pub mod outcome;
pub mod presets;
pub mod registry;
pub mod retry;

// Re-export main types for convenience
pub use cache::{CacheKey, CachePolicy, ResponseCache, KEY_SCHEMA_VERSION};
pub use circuit_breaker::{
    BreakerListener, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use executor::{PolicyChain, PolicyExecutor};
pub use layer::{ResilienceLayer, ResilienceService};
pub use outcome::{CallResult, FailureClassifier, Fault, FaultKind};
pub use registry::{Policy, PolicyRegistry, PolicyRegistryBuilder, RegistryError};
pub use retry::{RetryPlan, RetryScheduler};
