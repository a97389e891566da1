use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use slide_limit::Admission;
use slide_limit::Strategy;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::GateError;
use crate::gate::wait_for_admission;
use crate::identity::Identify;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    waited: Counter<u64>,
}

impl RateLimitServiceMetrics {
    fn new() -> Self {
        let meter = global::meter("rate_limit_service");
        Self {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
            waited: meter.u64_counter("waited").build(),
        }
    }

    fn admit(&self, admission: Admission) {
        // Unidentified passes bypass metering and are reported under their own label.
        self.admitted
            .add(1, &[KeyValue::new("admission", admission.as_str())]);
    }
}

type BoxResponse<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

pin_project! {
    /// The future returned by [`RateLimitService`].
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F, T> {
        // Admitted straight away; polls the inner future directly.
        Admitted {
            #[pin]
            inner: F,
        },
        // Waiting for capacity or running under a deadline.
        Waiting {
            inner: BoxResponse<T>,
        },
        // Rejected in fail-fast mode.
        Rejected {
            error: GateError,
        },
    }
}

impl<F, T> Future for ResponseFuture<F, T>
where
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Admitted { inner } => inner.poll(cx),
            ResponseFutureProj::Waiting { inner } => inner.as_mut().poll(cx),
            ResponseFutureProj::Rejected { error } => Poll::Ready(Err(Box::new(error.clone()))),
        }
    }
}

/// Applies per-requester rate limits to an inner service.
///
/// Admission depends on the request, so it is decided in `call` rather than `poll_ready`.
#[derive(Debug)]
pub struct RateLimitService<L, I, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    identify: Arc<I>,
    fail_fast: bool,
    timeout: Option<Duration>,
    instruments: RateLimitServiceMetrics,
}

impl<L, I, S> Clone for RateLimitService<L, I, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            identify: Arc::clone(&self.identify),
            fail_fast: self.fail_fast,
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, I, S, Req> Service<Req> for RateLimitService<L, I, S>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    I: Identify<Req> + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let requester = self.identify.identify(&req);

        let retry_after = match self.limiter.process(requester.as_deref()) {
            ControlFlow::Continue(admission) => {
                self.instruments.admit(admission);
                let inner = self.inner.call(req);
                return match self.timeout {
                    None => ResponseFuture::Admitted { inner },
                    Some(limit) => ResponseFuture::Waiting {
                        inner: Box::pin(with_deadline(limit, inner)),
                    },
                };
            }
            ControlFlow::Break(reason) => reason.retry_after(),
        };

        if self.fail_fast {
            self.instruments.rejected.add(1, &[]);
            return ResponseFuture::Rejected {
                error: GateError::RateLimited { retry_after },
            };
        }

        self.instruments.waited.add(1, &[]);
        debug!(?requester, ?retry_after, "Holding request for rate limit capacity");

        // The ready service goes into the future; keep a fresh clone for the next caller.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);
        let instruments = self.instruments.clone();

        let waiting = async move {
            let admission =
                wait_for_admission(limiter.as_ref(), requester.as_deref(), retry_after).await;
            instruments.admit(admission);
            inner.call(req).await
        };

        ResponseFuture::Waiting {
            inner: match self.timeout {
                None => Box::pin(waiting),
                Some(limit) => Box::pin(with_deadline(limit, waiting)),
            },
        }
    }
}

async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, BoxError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Box::new(GateError::Timeout)),
    }
}

impl<L, I, S> RateLimitService<L, I, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>, identify: Arc<I>) -> Self {
        Self {
            inner,
            limiter,
            identify,
            fail_fast: false,
            timeout: None,
            instruments: RateLimitServiceMetrics::new(),
        }
    }

    /// Set whether the service should fail immediately when a requester is over its limits.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a unified timeout for both waiting for admission and request execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
