//! # slide-limit
//!
//! `slide-limit` provides per-requester admission control under several rolling-window
//! quotas at once.
//!
//! ## Core Philosophy
//!
//! Each requester owns a small log of admission timestamps, one FIFO queue per configured
//! threshold. A check ages out expired entries, compares every queue against its limit and
//! either commits the new event to *all* queues or rejects without recording anything.
//!
//! ## Key Concepts
//!
//! * **Per-Requester Locking**: Every requester's queues sit behind their own mutex inside a
//!   sharded map. Two different requesters never wait on each other.
//! * **Lazy Evaluation**: Windows are recalculated at the moment of the request, so there is no
//!   background timer. Idle requesters can be swept explicitly or on access.
//! * **Strategy Trait**: A unified interface so that middleware can be driven by any keyed
//!   limiting algorithm.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use slide_limit::Limiter;
//! use slide_limit::RuleSet;
//! use slide_limit::RuleTable;
//!
//! let rules = RuleSet::from_pairs([(100, Duration::from_secs(60)), (5, Duration::from_secs(1))])
//!     .unwrap();
//! let limiter = Limiter::new(RuleTable::shared(rules));
//!
//! if limiter.check_and_record(Some("alice")).is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod error;
mod history;
mod limiter;
mod rules;

pub use config::RulesConfig;
pub use config::ThresholdConfig;
pub use error::Error;
pub use history::HistoryEntry;
pub use history::RequestHistory;
pub use limiter::Limiter;
pub use limiter::SweepPolicy;
pub use limiter::WaitHintPolicy;
pub use rules::Lookup;
pub use rules::RuleSet;
pub use rules::RuleSource;
pub use rules::RuleTable;
pub use rules::Threshold;
pub use rules::lookup;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Overloaded {
        /// How long until the violated threshold admits another event.
        retry_after: Duration,
        /// Index of the violated threshold within the requester's rule set.
        threshold: usize,
    },
}

impl Reason {
    pub fn retry_after(&self) -> Duration {
        match self {
            Reason::Overloaded { retry_after, .. } => *retry_after,
        }
    }
}

/// How an admitted request got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// The request was metered and recorded against every threshold.
    Recorded,
    /// No requester could be identified; the request bypassed metering entirely.
    Unidentified,
    /// The requester has no thresholds configured.
    Unlimited,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Recorded => "recorded",
            Admission::Unidentified => "unidentified",
            Admission::Unlimited => "unlimited",
        }
    }
}

/// Flattened view of a check: whether it was allowed and how long to back off if not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub wait_hint: Duration,
}

impl From<ControlFlow<Reason, Admission>> for Decision {
    fn from(outcome: ControlFlow<Reason, Admission>) -> Self {
        match outcome {
            ControlFlow::Continue(_) => Decision {
                allowed: true,
                wait_hint: Duration::ZERO,
            },
            ControlFlow::Break(reason) => Decision {
                allowed: false,
                wait_hint: reason.retry_after(),
            },
        }
    }
}

/// The core trait for keyed rate-limiting algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to admit a single request for `requester`.
    ///
    /// `None` (or an empty id) means the caller could not be identified.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the rate limit has been reached. Nothing is recorded in that case.
    fn process(&self, requester: Option<&str>) -> ControlFlow<Reason, Admission>;
}
