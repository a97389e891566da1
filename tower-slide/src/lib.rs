//! # Tower Slide
//!
//! `tower-slide` puts the per-requester limiter from [`slide_limit`] in front of async
//! work, either as a plain [`Gate`] around an action or as
//! [Tower](https://github.com/tower-rs/tower) middleware.
//!
//! ## Two ways to handle a rejection
//!
//! 1. **Reject (fail fast)**: the request is refused immediately with
//!    `GateError::RateLimited`, carrying the wait hint for a `Retry-After` value.
//! 2. **Wait**: the request sleeps for the wait hint, without holding any lock, and is
//!    re-checked until admitted. An optional deadline bounds the wait with
//!    `GateError::Timeout`.
//!
//! Requests whose requester cannot be identified are let through unmetered.
//!
//! ## The Managed Stack
//! [`ManagedRateLimitLayer`] is a pre-composed waiting stack with a hard deadline that
//! maps every error into the cloneable [`GateError`] domain.
//!
//! ## Feature Flags
//!
//! - `http`: Enables [`BearerSubject`], identifying requests by their bearer token's
//!   `sub` claim.
//! - `axum`: Enables `IntoResponse` for [`GateError`]; rejections become
//!   `429 Too Many Requests` with a fixed body and a `Retry-After` header.

mod error;
mod gate;
mod identity;
mod layer;
mod managed_layer;
mod service;
mod sweeper;
mod utils;


pub use error::GateError;
pub use error::REJECTION_BODY;
pub use gate::Gate;
pub use gate::Mode;
#[cfg(feature = "http")]
pub use identity::BearerSubject;
pub use identity::Identify;
#[cfg(feature = "http")]
pub use identity::bearer_subject;
pub use layer::RateLimitLayer;
pub use managed_layer::ManagedRateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;
pub use sweeper::spawn_sweeper;
pub use utils::ServiceBuilderExt;
