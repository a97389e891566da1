use std::sync::Arc;
use std::time::Duration;

use slide_limit::Strategy;
use tower::Layer;

use crate::service::RateLimitService;

/// Applies per-requester rate limits to requests.
#[derive(Debug)]
pub struct RateLimitLayer<L, I>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    identify: Arc<I>,
    fail_fast: bool,
    timeout: Option<Duration>,
}

impl<L, I> Clone for RateLimitLayer<L, I>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            identify: Arc::clone(&self.identify),
            fail_fast: self.fail_fast,
            timeout: self.timeout,
        }
    }
}

impl<L, I> RateLimitLayer<L, I>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer keyed by whatever `identify` derives from each request.
    pub fn new(limiter: Arc<L>, identify: I) -> Self {
        RateLimitLayer {
            limiter,
            identify: Arc::new(identify),
            fail_fast: false,
            timeout: None,
        }
    }

    /// Set whether the service should fail immediately when a requester is over its limits.
    ///
    /// If `true`, the service will return `GateError::RateLimited` immediately
    /// instead of waiting for the requester's window to slide.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a unified timeout for both waiting for admission and request execution.
    ///
    /// If the total time exceeds this duration, the service
    /// will return `GateError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, I, S> Layer<S> for RateLimitLayer<L, I>
where
    L: ?Sized,
{
    type Service = RateLimitService<L, I, S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = RateLimitService::new(
            service,
            Arc::clone(&self.limiter),
            Arc::clone(&self.identify),
        )
        .with_fail_fast(self.fail_fast);
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
