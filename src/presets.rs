/// Pre-tuned policy bundles for common dependency classes
use crate::cache::CachePolicy;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy};
use crate::outcome::FailureClassifier;
use crate::registry::{PolicyRegistryBuilder, RegistryError};
use crate::retry::{RetryPlan, RetryScheduler};
use std::time::Duration;

/// Backoff shape for a preset's retry policy.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetrySettings {
    pub fn plan(&self) -> RetryPlan {
        if self.jitter {
            RetryPlan::exponential_jittered(
                self.max_attempts,
                self.initial_backoff,
                self.backoff_multiplier,
                self.max_backoff,
            )
        } else {
            RetryPlan::exponential(
                self.max_attempts,
                self.initial_backoff,
                self.backoff_multiplier,
                self.max_backoff,
            )
        }
    }
}

/// Policy bundle for one class of dependency.
#[derive(Debug, Clone)]
pub struct PolicyPreset {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: Option<RetrySettings>,
    pub cache_ttl: Option<Duration>,
}

/// External HTTP APIs (third-party services)
///
/// - Circuit breaker: 5 failures, 120s cooldown
/// - Retry: 5 attempts with longer jittered backoff
/// - No response cache (freshness is the caller's call)
pub fn http_external() -> PolicyPreset {
    PolicyPreset {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            break_duration: Duration::from_secs(120),
            break_escalation: 1.0,
            max_break_duration: Duration::from_secs(600),
        },
        retry: Some(RetrySettings {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
        cache_ttl: None,
    }
}

/// Internal service-to-service calls
///
/// - Circuit breaker: 5 failures, 60s cooldown
/// - Retry: 3 attempts with exponential backoff
pub fn internal_api() -> PolicyPreset {
    PolicyPreset {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            break_duration: Duration::from_secs(60),
            break_escalation: 1.0,
            max_break_duration: Duration::from_secs(300),
        },
        retry: Some(RetrySettings {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
        cache_ttl: None,
    }
}

/// Read-heavy idempotent lookups
///
/// - Response cache: 5 minute TTL, consulted before anything else
/// - Circuit breaker: 3 failures, 15s cooldown with escalation
/// - Retry: 2 quick attempts
pub fn read_through() -> PolicyPreset {
    PolicyPreset {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(30),
            break_duration: Duration::from_secs(15),
            break_escalation: 2.0,
            max_break_duration: Duration::from_secs(120),
        },
        retry: Some(RetrySettings {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
        cache_ttl: Some(Duration::from_secs(300)),
    }
}

impl PolicyPreset {
    /// Register this preset's policies under `{prefix}.cache`,
    /// `{prefix}.breaker` and `{prefix}.retry`, returning the registered
    /// names in the recommended outer-to-inner chain order
    /// (cache → breaker → retry).
    pub fn register_into<T: Clone + Send + Sync + 'static>(
        &self,
        builder: &mut PolicyRegistryBuilder<T>,
        prefix: &str,
        classifier: FailureClassifier<T>,
    ) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::new();

        if let Some(ttl) = self.cache_ttl {
            let name = format!("{prefix}.cache");
            builder.register(name.clone(), CachePolicy::new(ttl))?;
            names.push(name);
        }

        let name = format!("{prefix}.breaker");
        builder.register(
            name.clone(),
            CircuitBreakerPolicy::new(self.circuit_breaker.clone())
                .with_classifier(classifier.clone()),
        )?;
        names.push(name);

        if let Some(retry) = &self.retry {
            let name = format!("{prefix}.retry");
            builder.register(
                name.clone(),
                RetryScheduler::new(retry.plan()).with_classifier(classifier),
            )?;
            names.push(name);
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PolicyRegistry;

    #[test]
    fn http_external_values() {
        let preset = http_external();
        assert_eq!(preset.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            preset.circuit_breaker.break_duration,
            Duration::from_secs(120)
        );
        assert_eq!(preset.retry.as_ref().map(|r| r.max_attempts), Some(5));
        assert!(preset.cache_ttl.is_none());
    }

    #[test]
    fn internal_api_values() {
        let preset = internal_api();
        assert_eq!(
            preset.circuit_breaker.break_duration,
            Duration::from_secs(60)
        );
        assert_eq!(preset.retry.as_ref().map(|r| r.max_attempts), Some(3));
    }

    #[test]
    fn read_through_carries_a_cache_ttl() {
        let preset = read_through();
        assert_eq!(preset.cache_ttl, Some(Duration::from_secs(300)));
        assert!(preset.circuit_breaker.break_escalation > 1.0);
    }

    #[test]
    fn register_into_yields_cache_breaker_retry_order() {
        let mut builder = PolicyRegistry::<String>::builder();
        let names = read_through()
            .register_into(&mut builder, "lookup", FailureClassifier::faults_only())
            .expect("register");

        assert_eq!(
            names,
            vec!["lookup.cache", "lookup.breaker", "lookup.retry"]
        );
        let registry = builder.build();
        assert_eq!(registry.len(), 3);
        let chain_names: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(registry.chain(&chain_names).expect("chain").len(), 3);
    }

    #[test]
    fn registering_the_same_prefix_twice_fails() {
        let mut builder = PolicyRegistry::<String>::builder();
        internal_api()
            .register_into(&mut builder, "svc", FailureClassifier::faults_only())
            .expect("first");

        let err = internal_api()
            .register_into(&mut builder, "svc", FailureClassifier::faults_only())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }
}
