/// Composes registered policies around a single call
///
/// A [`PolicyChain`] is folded outer-to-inner: each policy wraps everything
/// after it, and the user-supplied operation sits innermost. The recommended
/// order is cache → circuit breaker → retry → raw call, so a cache hit
/// bypasses the breaker and retries entirely and an open breaker is not
/// masked by retries, but any caller-specified order composes.
use crate::cache::CacheKey;
use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::outcome::{CallResult, Fault};
use crate::registry::{Policy, PolicyRegistry, RegistryError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxCallFuture<'a, T> = Pin<Box<dyn Future<Output = CallResult<T>> + Send + 'a>>;

/// The raw operation, invocable once per attempt.
type Operation<T> = Arc<dyn Fn() -> BoxCallFuture<'static, T> + Send + Sync>;

/// Ordered, outer-to-inner sequence of resolved policies.
#[derive(Clone)]
pub struct PolicyChain<T> {
    policies: Vec<Arc<Policy<T>>>,
}

impl<T> std::fmt::Debug for PolicyChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("len", &self.policies.len())
            .finish()
    }
}

impl<T> PolicyChain<T> {
    pub(crate) fn new(policies: Vec<Arc<Policy<T>>>) -> Self {
        Self { policies }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> PolicyChain<T> {
    /// Drive `op` through the chain. `key` identifies the request for any
    /// cache policy in the chain; chains without one ignore it.
    pub async fn execute<F, Fut>(&self, key: &CacheKey, op: F) -> CallResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<T>> + Send + 'static,
    {
        let op: Operation<T> = Arc::new(move || Box::pin(op()));
        run_layers(&self.policies, key, op).await
    }
}

fn run_layers<'a, T>(
    policies: &'a [Arc<Policy<T>>],
    key: &'a CacheKey,
    op: Operation<T>,
) -> BoxCallFuture<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    Box::pin(async move {
        let Some((outer, rest)) = policies.split_first() else {
            return op().await;
        };

        match outer.as_ref() {
            Policy::Cache(cache) => {
                if let Some(value) = cache.lookup(key) {
                    return CallResult::Success(value);
                }
                let result = run_layers(rest, key, op).await;
                if let CallResult::Success(value) = &result {
                    cache.store(key.clone(), value.clone());
                }
                result
            }
            Policy::CircuitBreaker(policy) => {
                let Some(admission) = policy.breaker.admit() else {
                    return CallResult::Fault(Fault::circuit_open());
                };
                // The guard frees a half-open trial slot if this execution
                // is dropped before the inner call completes; state only
                // ever changes on an actual outcome.
                let guard = TrialGuard::new(&policy.breaker, admission);
                let result = run_layers(rest, key, op).await;
                guard.disarm();
                if policy.classifier.is_failure(&result) {
                    policy.breaker.record_failure(&failure_view(&result));
                } else {
                    policy.breaker.record_success();
                }
                result
            }
            Policy::Retry(scheduler) => {
                scheduler
                    .execute(|| run_layers(rest, key, op.clone()))
                    .await
            }
        }
    })
}

fn failure_view<T>(result: &CallResult<T>) -> Fault {
    match result {
        CallResult::Fault(fault) => fault.clone(),
        CallResult::Success(_) => Fault::logical("response classified as failure"),
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

/// Executes operations under policies resolved by name from a registry.
#[derive(Clone)]
pub struct PolicyExecutor<T> {
    registry: Arc<PolicyRegistry<T>>,
}

impl<T: Clone + Send + Sync + 'static> PolicyExecutor<T> {
    pub fn new(registry: Arc<PolicyRegistry<T>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry<T>> {
        &self.registry
    }

    /// Execute `op` under the named policies, outermost first. Registry
    /// misuse is an `Err`; every policy-level outcome, including breaker
    /// rejections and retry exhaustion, arrives inside the `CallResult`.
    pub async fn execute<F, Fut>(
        &self,
        policy_names: &[&str],
        key: &CacheKey,
        op: F,
    ) -> Result<CallResult<T>, RegistryError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<T>> + Send + 'static,
    {
        let chain = self.registry.chain(policy_names)?;
        Ok(chain.execute(key, op).await)
    }
}
