/// Uniform representation of an attempted call's outcome
///
/// Every execution through the policy engine resolves to a [`CallResult`]:
/// either the upstream success payload or a typed [`Fault`]. Policies never
/// panic into the caller; breaker rejections and retry exhaustion surface as
/// fault kinds the caller can match on.
use std::fmt;
use std::sync::Arc;

/// Outcome of a single attempted operation.
#[derive(Debug, Clone)]
pub enum CallResult<T> {
    /// The upstream call produced a value.
    Success(T),
    /// The call failed, or a policy rejected it.
    Fault(Fault),
}

impl<T> CallResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, CallResult::Fault(_))
    }

    /// Consume the result, yielding the success value if there is one.
    pub fn success(self) -> Option<T> {
        match self {
            CallResult::Success(value) => Some(value),
            CallResult::Fault(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            CallResult::Success(_) => None,
            CallResult::Fault(fault) => Some(fault),
        }
    }
}

/// Category of a [`Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The underlying transport call failed outright.
    Transport,
    /// The call completed but the response was classified as a failure.
    Logical,
    /// Synthesized by the circuit breaker while it is open.
    CircuitOpen,
    /// All retry attempts were spent; the last fault is carried as `cause`.
    RetryExhausted,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Transport => "transport fault",
            FaultKind::Logical => "logical failure",
            FaultKind::CircuitOpen => "circuit open",
            FaultKind::RetryExhausted => "retry exhausted",
        };
        f.write_str(name)
    }
}

/// A failed call outcome.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct Fault {
    pub kind: FaultKind,
    pub detail: String,
    #[source]
    pub cause: Option<Box<Fault>>,
}

impl Fault {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Transport,
            detail: detail.into(),
            cause: None,
        }
    }

    pub fn logical(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Logical,
            detail: detail.into(),
            cause: None,
        }
    }

    pub fn circuit_open() -> Self {
        Self {
            kind: FaultKind::CircuitOpen,
            detail: "circuit breaker is open - failing fast".to_string(),
            cause: None,
        }
    }

    /// Terminal fault after all retry attempts are spent. The last observed
    /// fault is preserved as the cause, nothing is invented or dropped.
    pub fn retry_exhausted(attempts: u32, last: Fault) -> Self {
        Self {
            kind: FaultKind::RetryExhausted,
            detail: format!("{attempts} attempts exhausted; last: {last}"),
            cause: Some(Box::new(last)),
        }
    }
}

/// Caller-supplied predicate deciding what counts as a failure.
///
/// Both the circuit breaker and the retry scheduler consult a classifier
/// rather than hardcoding "any fault". An HTTP caller would typically treat
/// non-2xx responses as failures even though the transport succeeded.
#[derive(Clone)]
pub struct FailureClassifier<T> {
    predicate: Arc<dyn Fn(&CallResult<T>) -> bool + Send + Sync>,
}

impl<T> FailureClassifier<T> {
    pub fn new(predicate: impl Fn(&CallResult<T>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Classify only `Fault` outcomes as failures.
    pub fn faults_only() -> Self {
        Self::new(|result| result.is_fault())
    }

    pub fn is_failure(&self, result: &CallResult<T>) -> bool {
        (self.predicate)(result)
    }
}

impl<T> Default for FailureClassifier<T> {
    fn default() -> Self {
        Self::faults_only()
    }
}

impl<T> fmt::Debug for FailureClassifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier").finish_non_exhaustive()
    }
}
