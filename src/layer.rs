/// Tower Layer integration for composable resilience policies
///
/// Wraps any `tower::Service` with a resolved [`PolicyChain`]. Because retry
/// policies may replay the request, the request type must be `Clone`; the
/// cache key for each request is derived by a caller-supplied extractor.
use crate::cache::CacheKey;
use crate::executor::PolicyChain;
use crate::outcome::{CallResult, Fault};
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

type KeyFn<Req> = Arc<dyn Fn(&Req) -> CacheKey + Send + Sync>;

pub struct ResilienceLayer<Req, T> {
    chain: Arc<PolicyChain<T>>,
    key_fn: KeyFn<Req>,
}

impl<Req, T> ResilienceLayer<Req, T> {
    pub fn new(
        chain: PolicyChain<T>,
        key_fn: impl Fn(&Req) -> CacheKey + Send + Sync + 'static,
    ) -> Self {
        Self {
            chain: Arc::new(chain),
            key_fn: Arc::new(key_fn),
        }
    }
}

impl<Req, T> Clone for ResilienceLayer<Req, T> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, Req, T> Layer<S> for ResilienceLayer<Req, T> {
    type Service = ResilienceService<S, Req, T>;

    fn layer(&self, inner: S) -> Self::Service {
        ResilienceService {
            inner,
            chain: self.chain.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

pub struct ResilienceService<S, Req, T> {
    inner: S,
    chain: Arc<PolicyChain<T>>,
    key_fn: KeyFn<Req>,
}

impl<S: Clone, Req, T> Clone for ResilienceService<S, Req, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            chain: self.chain.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, Req, T> Service<Req> for ResilienceService<S, Req, T>
where
    S: Service<Req, Response = T> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Display,
    Req: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Response = T;
    type Error = Fault;
    type Future = Pin<Box<dyn Future<Output = Result<T, Fault>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|error| Fault::transport(error.to_string()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let chain = self.chain.clone();
        let key = (self.key_fn)(&req);
        let service = Arc::new(Mutex::new(self.inner.clone()));

        Box::pin(async move {
            let result = chain
                .execute(&key, move || {
                    let mut service = service.lock().clone();
                    let req = req.clone();
                    async move {
                        match service.call(req).await {
                            Ok(value) => CallResult::Success(value),
                            Err(error) => CallResult::Fault(Fault::transport(error.to_string())),
                        }
                    }
                })
                .await;

            match result {
                CallResult::Success(value) => Ok(value),
                CallResult::Fault(fault) => Err(fault),
            }
        })
    }
}
