//! Host selection with punishment, refresh, and short-lived affinity pinning.
//!
//! [`HostPool`] rotates over a mutable list of candidate endpoints, suppressing
//! hosts that recently failed for a configurable period. [`HostPin`] remembers
//! the last host a caller succeeded on so the next request can reuse a warm
//! connection, without collapsing a parallel burst onto a single endpoint.

mod pin;
mod pool;

pub use pin::HostPin;
pub use pool::{HostPool, HostPoolConfig, HostPoolError};
