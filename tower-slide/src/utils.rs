use std::sync::Arc;
use std::time::Duration;

use slide_limit::Strategy;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::RateLimitLayer;

type DynStrategy = dyn Strategy + Send + Sync + 'static;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a layer that holds requests back until admitted, up to `timeout`
    fn throughput_rate_limit<I>(
        self,
        limiter: Arc<DynStrategy>,
        identify: I,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<RateLimitLayer<DynStrategy, I>, L>>;

    /// Add a layer that rejects over-limit requests immediately
    fn latency_rate_limit<I>(
        self,
        limiter: Arc<DynStrategy>,
        identify: I,
    ) -> ServiceBuilder<Stack<RateLimitLayer<DynStrategy, I>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn throughput_rate_limit<I>(
        self,
        limiter: Arc<DynStrategy>,
        identify: I,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<RateLimitLayer<DynStrategy, I>, L>> {
        self.layer(RateLimitLayer::new(limiter, identify).with_timeout(timeout))
    }

    fn latency_rate_limit<I>(
        self,
        limiter: Arc<DynStrategy>,
        identify: I,
    ) -> ServiceBuilder<Stack<RateLimitLayer<DynStrategy, I>, L>> {
        self.layer(RateLimitLayer::new(limiter, identify).with_fail_fast(true))
    }
}
