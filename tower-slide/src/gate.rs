use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use slide_limit::Admission;
use slide_limit::Strategy;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::GateError;
use crate::Identify;

/// What a gate does with a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Fail immediately with [`GateError::RateLimited`].
    #[default]
    Reject,
    /// Sleep for the wait hint and check again until admitted.
    Wait,
}

/// Runs an async action only once its requester has been admitted.
///
/// The requester is derived from the action's argument by an [`Identify`] implementation.
#[derive(Debug)]
pub struct Gate<L, I>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    identify: I,
    mode: Mode,
    max_wait: Option<Duration>,
}

impl<L, I> Clone for Gate<L, I>
where
    L: ?Sized,
    I: Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            identify: self.identify.clone(),
            mode: self.mode,
            max_wait: self.max_wait,
        }
    }
}

impl<L, I> Gate<L, I>
where
    L: Strategy + ?Sized,
{
    /// Create a gate in [`Mode::Reject`].
    pub fn new(limiter: Arc<L>, identify: I) -> Self {
        Self {
            limiter,
            identify,
            mode: Mode::default(),
            max_wait: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound how long [`Mode::Wait`] may hold a request back.
    ///
    /// If admission takes longer, the gate returns `GateError::Timeout` and the action
    /// never runs.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Admit `arg`'s requester, then run `action(arg)` exactly once.
    ///
    /// Dropping the returned future while it waits records nothing and never runs the
    /// action.
    pub async fn invoke<A, F, Fut>(&self, arg: A, action: F) -> Result<Fut::Output, GateError>
    where
        I: Identify<A>,
        F: FnOnce(A) -> Fut,
        Fut: Future,
    {
        let requester = self.identify.identify(&arg);

        if let ControlFlow::Break(reason) = self.limiter.process(requester.as_deref()) {
            match self.mode {
                Mode::Reject => {
                    return Err(GateError::RateLimited {
                        retry_after: reason.retry_after(),
                    });
                }
                Mode::Wait => {
                    let waiting = wait_for_admission(
                        self.limiter.as_ref(),
                        requester.as_deref(),
                        reason.retry_after(),
                    );
                    match self.max_wait {
                        Some(max_wait) => {
                            timeout(max_wait, waiting).await.map_err(|_| {
                                warn!(
                                    ?requester,
                                    ?max_wait,
                                    "Gave up waiting for rate limit capacity"
                                );
                                GateError::Timeout
                            })?;
                        }
                        None => {
                            waiting.await;
                        }
                    }
                }
            }
        }

        Ok(action(arg).await)
    }
}

/// Sleep out each wait hint until `requester` is admitted. No lock is held while sleeping.
pub(crate) async fn wait_for_admission<L>(
    limiter: &L,
    requester: Option<&str>,
    mut retry_after: Duration,
) -> Admission
where
    L: Strategy + ?Sized,
{
    loop {
        debug!(?requester, ?retry_after, "Waiting for rate limit capacity");
        sleep(retry_after).await;
        match limiter.process(requester) {
            ControlFlow::Continue(admission) => return admission,
            ControlFlow::Break(reason) => retry_after = reason.retry_after(),
        }
    }
}
