/// Named, reusable policy instances
///
/// Policies are registered once during a startup phase on the builder, then
/// frozen into a [`PolicyRegistry`] handle. The built registry is plain
/// immutable data behind `Arc`s, so any number of concurrent executors can
/// resolve from it without synchronization. Registry misuse (duplicate or
/// unknown names) is a programmer error surfaced as [`RegistryError`],
/// distinct from runtime call faults.
use crate::cache::CachePolicy;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::retry::RetryScheduler;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("policy `{0}` is already registered")]
    DuplicateName(String),
    #[error("no policy registered under `{0}`")]
    NotFound(String),
}

/// A configured, registrable policy instance.
pub enum Policy<T> {
    CircuitBreaker(CircuitBreakerPolicy<T>),
    Retry(RetryScheduler<T>),
    Cache(CachePolicy<T>),
}

impl<T> std::fmt::Debug for Policy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::CircuitBreaker(_) => f.write_str("Policy::CircuitBreaker"),
            Policy::Retry(_) => f.write_str("Policy::Retry"),
            Policy::Cache(_) => f.write_str("Policy::Cache"),
        }
    }
}

impl<T> From<CircuitBreakerPolicy<T>> for Policy<T> {
    fn from(policy: CircuitBreakerPolicy<T>) -> Self {
        Policy::CircuitBreaker(policy)
    }
}

impl<T> From<RetryScheduler<T>> for Policy<T> {
    fn from(scheduler: RetryScheduler<T>) -> Self {
        Policy::Retry(scheduler)
    }
}

impl<T> From<CachePolicy<T>> for Policy<T> {
    fn from(policy: CachePolicy<T>) -> Self {
        Policy::Cache(policy)
    }
}

/// Startup-phase registration surface.
pub struct PolicyRegistryBuilder<T> {
    policies: HashMap<String, Arc<Policy<T>>>,
}

impl<T> PolicyRegistryBuilder<T> {
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        policy: impl Into<Policy<T>>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.policies.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.policies.insert(name, Arc::new(policy.into()));
        Ok(())
    }

    /// Freeze the registry. No registration is possible afterward.
    pub fn build(self) -> PolicyRegistry<T> {
        PolicyRegistry {
            policies: self.policies,
        }
    }
}

impl<T> Default for PolicyRegistryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable name → policy mapping, owned for the process lifetime.
pub struct PolicyRegistry<T> {
    policies: HashMap<String, Arc<Policy<T>>>,
}

impl<T> PolicyRegistry<T> {
    pub fn builder() -> PolicyRegistryBuilder<T> {
        PolicyRegistryBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Policy<T>>, RegistryError> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Resolve an ordered list of names into an outer-to-inner chain.
    pub fn chain(&self, names: &[&str]) -> Result<crate::executor::PolicyChain<T>, RegistryError> {
        let policies = names
            .iter()
            .map(|name| self.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(crate::executor::PolicyChain::new(policies))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::retry::RetryPlan;
    use std::time::Duration;

    fn sample_policy() -> Policy<String> {
        Policy::Retry(RetryScheduler::new(RetryPlan::fixed(
            2,
            Duration::from_millis(10),
        )))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = PolicyRegistry::<String>::builder();
        builder.register("x", sample_policy()).expect("first");

        let err = builder.register("x", sample_policy()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "x"));
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let registry = PolicyRegistry::<String>::builder().build();
        let err = registry.resolve("y").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "y"));
    }

    #[test]
    fn resolve_returns_the_registered_policy() {
        let mut builder = PolicyRegistry::<String>::builder();
        builder
            .register(
                "breaker",
                CircuitBreakerPolicy::new(CircuitBreakerConfig::default()),
            )
            .expect("register");
        let registry = builder.build();

        let policy = registry.resolve("breaker").expect("resolve");
        assert!(matches!(policy.as_ref(), Policy::CircuitBreaker(_)));
    }

    #[test]
    fn chain_preserves_the_requested_order() {
        let mut builder = PolicyRegistry::<String>::builder();
        builder
            .register(
                "breaker",
                CircuitBreakerPolicy::new(CircuitBreakerConfig::default()),
            )
            .expect("register breaker");
        builder
            .register(
                "retry",
                RetryScheduler::new(RetryPlan::fixed(1, Duration::from_millis(10))),
            )
            .expect("register retry");
        let registry = builder.build();

        let chain = registry.chain(&["breaker", "retry"]).expect("chain");
        assert_eq!(chain.len(), 2);

        let missing = registry.chain(&["breaker", "nope"]).unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound(_)));
    }
}
