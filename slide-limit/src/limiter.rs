use std::fmt;
use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::Admission;
use crate::Reason;
use crate::RuleSet;
use crate::RuleSource;
use crate::Strategy;
use crate::history::Queues;
use crate::history::RequestHistory;

/// When idle requester histories are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepPolicy {
    /// Only when [`Limiter::sweep`] is called, e.g. from a scheduled task.
    #[default]
    Manual,
    /// Sweep inline on every n-th metered check.
    EveryNChecks(NonZeroU64),
}

/// Which violated threshold determines the reported wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitHintPolicy {
    /// Stop at the first violated threshold in configured order.
    #[default]
    FirstViolated,
    /// Evaluate every threshold and report the longest wait among the violated ones.
    LongestViolated,
}

/// A keyed sliding-log limiter enforcing several windows per requester.
///
/// Each requester's history is guarded by its own lock, so checks for different
/// requesters never contend. Within one requester the read of the clock, the aging of
/// stale stamps, the threshold checks and the commit all happen under that lock.
pub struct Limiter {
    rules: Box<dyn RuleSource>,
    history: RequestHistory,
    sweep_policy: SweepPolicy,
    wait_hint: WaitHintPolicy,
    checks: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("requesters", &self.history.len())
            .field("sweep_policy", &self.sweep_policy)
            .field("wait_hint", &self.wait_hint)
            .finish_non_exhaustive()
    }
}

impl Limiter {
    /// Creates a new `Limiter` resolving thresholds through `rules`.
    pub fn new(rules: impl RuleSource + 'static) -> Self {
        Self::with_clock(rules, Clock::new())
    }

    pub fn with_clock(rules: impl RuleSource + 'static, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            rules: Box::new(rules),
            history: RequestHistory::new(),
            sweep_policy: SweepPolicy::default(),
            wait_hint: WaitHintPolicy::default(),
            checks: AtomicU64::new(0),
            clock,
            anchor,
        }
    }

    pub fn with_sweep_policy(mut self, policy: SweepPolicy) -> Self {
        self.sweep_policy = policy;
        self
    }

    pub fn with_wait_hint(mut self, policy: WaitHintPolicy) -> Self {
        self.wait_hint = policy;
        self
    }

    pub fn history(&self) -> &RequestHistory {
        &self.history
    }

    /// Checks every threshold for `requester` and records the event if all of them pass.
    ///
    /// Unidentified callers (`None` or an empty id) are admitted without being metered.
    /// A rejection leaves the requester's history without any new stamp.
    pub fn check_and_record(&self, requester: Option<&str>) -> ControlFlow<Reason, Admission> {
        let Some(requester) = requester.filter(|id| !id.is_empty()) else {
            debug!("Unidentified requester, admitting without metering");
            return ControlFlow::Continue(Admission::Unidentified);
        };

        let Some(rules) = self
            .rules
            .resolve(requester)
            .filter(|rules| !rules.is_unlimited())
        else {
            trace!(requester, "No thresholds configured");
            return ControlFlow::Continue(Admission::Unlimited);
        };

        let outcome = loop {
            let entry = self.history.get_or_create(requester, rules.len());
            let mut queues = entry.lock();
            if queues.evicted {
                // Swept between lookup and lock; start over on a live entry.
                continue;
            }
            break self.evaluate(&mut queues, &rules);
        };

        match outcome {
            ControlFlow::Continue(_) => trace!(requester, "Request admitted"),
            ControlFlow::Break(Reason::Overloaded {
                retry_after,
                threshold,
            }) => debug!(requester, threshold, ?retry_after, "Rate limit exceeded"),
        }

        self.maybe_sweep();
        outcome
    }

    /// Drops every requester whose history has fully aged out. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let evicted = self.history.sweep(self.now());
        if evicted > 0 {
            info!(
                evicted,
                remaining = self.history.len(),
                "Swept idle requesters"
            );
        }
        evicted
    }

    fn evaluate(&self, queues: &mut Queues, rules: &RuleSet) -> ControlFlow<Reason, Admission> {
        queues.align(rules.len());
        queues.horizon = nanos(rules.longest_window());

        // Clock reads on different cores may regress slightly; stamps must never do so.
        let now = self.now().max(queues.newest().unwrap_or(0));

        let mut violation: Option<Reason> = None;
        for (index, (threshold, stamps)) in rules
            .thresholds()
            .iter()
            .zip(queues.stamps.iter_mut())
            .enumerate()
        {
            let window = nanos(threshold.window());
            while let Some(&front) = stamps.front() {
                if now - front >= window {
                    stamps.pop_front();
                } else {
                    break;
                }
            }

            if stamps.len() >= threshold.max_count().get()
                && let Some(&front) = stamps.front()
            {
                let reason = Reason::Overloaded {
                    retry_after: Duration::from_nanos(window - (now - front)),
                    threshold: index,
                };
                match self.wait_hint {
                    WaitHintPolicy::FirstViolated => return ControlFlow::Break(reason),
                    WaitHintPolicy::LongestViolated => {
                        if violation.is_none_or(|v| reason.retry_after() > v.retry_after()) {
                            violation = Some(reason);
                        }
                    }
                }
            }
        }

        if let Some(reason) = violation {
            return ControlFlow::Break(reason);
        }

        for stamps in queues.stamps.iter_mut() {
            stamps.push_back(now);
        }
        ControlFlow::Continue(Admission::Recorded)
    }

    fn maybe_sweep(&self) {
        if let SweepPolicy::EveryNChecks(every) = self.sweep_policy {
            let count = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
            if count % every.get() == 0 {
                self.sweep();
            }
        }
    }

    fn now(&self) -> u64 {
        nanos(self.clock.now().duration_since(self.anchor))
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Strategy for Limiter {
    #[inline]
    fn process(&self, requester: Option<&str>) -> ControlFlow<Reason, Admission> {
        self.check_and_record(requester)
    }
}
