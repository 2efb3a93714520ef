//! Watch tokens and the host readiness interface.
//!
//! The binding layer never polls file descriptors itself.  It hands a
//! backend's *pollable* (a readiness probe) and a callback to a
//! [`ReadinessHost`], and gets back a [`WatchToken`] it can later revoke.
//!
//! A host implementation must honour one rule: once [`ReadinessHost::remove`]
//! returns, the callback for that token is never invoked again, even if the
//! host had already queued a readiness signal for it.

use std::fmt;
use std::num::NonZeroU64;

use super::event::{WatchCondition, WatchControl};

/// Probe that reports which conditions are currently ready on a resource.
pub type Pollable = Box<dyn Fn() -> WatchCondition + Send + Sync>;

/// Callback invoked by the host with the conditions that became ready.
pub type WatchCallback = Box<dyn FnMut(WatchCondition) -> WatchControl + Send>;

/// Revocable handle to a watch registered with a [`ReadinessHost`].
///
/// Tokens are never zero.  APIs that can fail to register a watch return
/// `Option<WatchToken>`, with `None` playing the role of the zero sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchToken(NonZeroU64);

impl WatchToken {
    pub fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Rebuilds a token from its raw value; `0` yields `None`.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The readiness mechanism a host event loop exposes to the binding layer.
pub trait ReadinessHost: Send + Sync {
    /// Registers `callback` to fire whenever `pollable` reports any of `condition`.
    fn attach(
        &self,
        pollable: Pollable,
        condition: WatchCondition,
        callback: WatchCallback,
    ) -> WatchToken;

    /// Revokes a watch.  Returns `false` if the token was not live.
    fn remove(&self, token: WatchToken) -> bool;

    /// Returns `true` while the token is registered.
    fn is_live(&self, token: WatchToken) -> bool;

    /// Wakes the loop so it re-evaluates readiness soon.
    fn wakeup(&self) {}
}
