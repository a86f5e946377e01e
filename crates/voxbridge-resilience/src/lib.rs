//! Failure isolation for voxbridge's downstream dependencies.
//!
//! - [`CircuitBreaker`]: per-dependency closed/open/half-open guard. One
//!   instance per [`Dependency`](voxbridge_types::Dependency), shared by every
//!   call in the process so that a provider outage is detected once and
//!   surfaced to readiness rather than rediscovered call by call.
//! - [`reconnect`]: exponential-backoff loop for re-establishing provider
//!   sessions, cooperatively cancellable.
//! - [`CancelToken`]: call-scoped cancellation built on `tokio::sync::watch`.
//! - [`ResilienceManager`]: process-wide registry that owns the breakers and
//!   the reconnect policy and is injected into clients at construction.

pub mod breaker;
pub mod cancel;
mod error;
pub mod manager;
pub mod reconnect;

pub use breaker::{BreakerConfig, BreakerError, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cancel::CancelToken;
pub use error::ResilienceError;
pub use manager::ResilienceManager;
pub use reconnect::{reconnect, ReconnectPolicy};
