use crate::error::RateLimited;
use crate::rate_limit::{IdentityKey, PolicyKind, RateLimiter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tower_layer::Layer;
use tower_service::Service;

/// Requests that know who is making them.
pub trait Identify {
    fn identity(&self) -> IdentityKey;
}

/// Error returned by [`AdmissionService`].
#[derive(Debug, Error)]
pub enum AdmissionError<E> {
    #[error(transparent)]
    RateLimited(RateLimited),
    #[error("{0}")]
    Inner(E),
}

impl<E> AdmissionError<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdmissionError::RateLimited(_))
    }
}

/// A layer that admits every request against one [`PolicyKind`] before it reaches the inner
/// service.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    limiter: Arc<RateLimiter>,
    policy: PolicyKind,
}

impl AdmissionLayer {
    pub fn new(limiter: Arc<RateLimiter>, policy: PolicyKind) -> Self {
        Self { limiter, policy }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, limiter: self.limiter.clone(), policy: self.policy }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    policy: PolicyKind,
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Identify + Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let policy = self.policy;
        // The clone is not yet ready; swap so the driven (ready) service handles this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            limiter.admit(&req.identity(), policy).await.map_err(AdmissionError::RateLimited)?;
            inner.call(req).await.map_err(AdmissionError::Inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::{DualWindowCounter, MemoryWindowCounter, PolicyTable};
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    struct Request {
        user: &'static str,
    }

    impl Identify for Request {
        fn identity(&self) -> IdentityKey {
            IdentityKey::user(self.user)
        }
    }

    #[tokio::test]
    async fn layer_rejects_once_budget_is_spent() {
        let clock = ManualClock::at_date(2024, 1, 1).unwrap();
        let counter = DualWindowCounter::local(MemoryWindowCounter::new(Arc::new(clock)));
        let policies =
            PolicyTable::default().with_limit(PolicyKind::GeneralApi, 2, Duration::from_secs(60));
        let limiter = Arc::new(RateLimiter::new(Arc::new(counter), policies));
        let svc = AdmissionLayer::new(limiter, PolicyKind::GeneralApi)
            .layer(service_fn(|req: Request| async move { Ok::<_, Infallible>(req.user.len()) }));

        assert_eq!(svc.clone().oneshot(Request { user: "ann" }).await.unwrap(), 3);
        assert_eq!(svc.clone().oneshot(Request { user: "ann" }).await.unwrap(), 3);
        let err = svc.clone().oneshot(Request { user: "ann" }).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(svc.oneshot(Request { user: "bob" }).await.is_ok());
    }
}
