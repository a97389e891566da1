use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use slide_limit::Strategy;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::GateError;
use crate::Identify;
use crate::RateLimitService;

/// A pre-composed rate limiting stack that holds requests back until admitted.
///
/// Requests over their limits wait out the wait hint, but never for longer than
/// `max_wait` in total (waiting plus inner execution).
///
/// ### Error Responsibilities:
/// - **Timeout (`GateError::Timeout`)**: the deadline passed, either while waiting for
///   capacity or while the inner service was running.
/// - **Inner (`GateError::Inner`)**: any other error from the inner service.
///
/// Every error leaving this stack is a [`GateError`].
pub struct ManagedRateLimitLayer<L, I, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    identify: Arc<I>,
    max_wait: Duration,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone would demand `Req: Clone` and `I: Clone`, which Axum requests are not.
impl<L, I, Req> Clone for ManagedRateLimitLayer<L, I, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            identify: self.identify.clone(),
            max_wait: self.max_wait,
            _phantom: PhantomData,
        }
    }
}

impl<S, L, I, Req> Layer<S> for ManagedRateLimitLayer<L, I, Req>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    I: Identify<Req> + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let rl = RateLimitService::new(inner, self.limiter.clone(), self.identify.clone())
            .with_timeout(self.max_wait);

        // Map the mixed errors into GateError
        let mapped_svc = tower::util::MapErr::new(rl, |err: BoxError| {
            if let Some(gate_err) = err.downcast_ref::<GateError>() {
                BoxError::from(gate_err.clone())
            } else {
                // Wrap any other inner service errors
                Box::from(GateError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L, I, Req> ManagedRateLimitLayer<L, I, Req>
where
    L: Strategy + ?Sized,
{
    pub fn new(limiter: Arc<L>, identify: I, max_wait: Duration) -> Self {
        Self {
            limiter,
            identify: Arc::new(identify),
            max_wait,
            _phantom: PhantomData,
        }
    }
}
