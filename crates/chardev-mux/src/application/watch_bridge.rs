//! Watch bridge: backend pollables in, revocable host registrations out.
//!
//! Two kinds of watch pass through here:
//!
//! - The **read watch**, one per chardev, installed whenever the delivery
//!   target has callbacks and the backend has something pollable for input.
//!   When it fires, the chardev pulls at most `can_read` bytes and delivers
//!   them.  It is always retired before a replacement is installed, so a
//!   chardev never has two read watches live at once.
//! - **Frontend watches**, requested through [`Chardev::add_watch`], e.g. to
//!   wait until the transport becomes writable again.
//!
//! A read watch that fires while the delivery target cannot take input
//! (no focus, or `can_read` is 0) retires itself.  It comes back when the
//! frontend calls `accept_input`, when a mux focus is set, or when a new
//! callback set is installed.
//!
//! Every read callback carries the generation it was installed under and
//! re-checks it before touching the frontend, so a readiness signal that
//! was queued before a rebind or unbind is discarded.

use std::sync::Arc;

use chardev_core::{
    ChardevEvent, ReadinessHost, WatchCallback, WatchCondition, WatchControl, WatchToken,
};
use tracing::{debug, warn};

use super::chardev::Chardev;
use super::lock;

/// A live read-watch registration.
pub(crate) struct ReadWatch {
    host: Arc<dyn ReadinessHost>,
    token: WatchToken,
}

impl ReadWatch {
    pub(crate) fn token(&self) -> WatchToken {
        self.token
    }

    pub(crate) fn revoke(self) -> bool {
        self.host.remove(self.token)
    }
}

impl Chardev {
    /// Token of the currently installed read watch, if any.
    pub fn read_watch_token(&self) -> Option<WatchToken> {
        lock(&self.state).read_watch.as_ref().map(ReadWatch::token)
    }

    /// Cancels the outstanding read watch without invoking it.
    ///
    /// Returns `true` if a watch was live.
    pub fn remove_pending(&self) -> bool {
        let watch = {
            let mut state = lock(&self.state);
            state.read_generation = state.read_generation.wrapping_add(1);
            state.read_watch.take()
        };
        match watch {
            Some(watch) => {
                let token = watch.token();
                watch.revoke();
                debug!("chardev '{}': read watch {token} removed", self.label());
                true
            }
            None => false,
        }
    }

    /// Re-registers the read watch on `context` (or the default host).
    ///
    /// The previous registration is fully retired first.  A new one is only
    /// installed when the delivery target has callbacks and the backend
    /// exposes an input pollable; multiplexers never pull directly, their
    /// underlying chardev does.
    pub(crate) fn update_read_handler(self: &Arc<Self>, context: Option<Arc<dyn ReadinessHost>>) {
        self.remove_pending();

        let (host, generation) = {
            let mut state = lock(&self.state);
            state.context = context;
            let host = state
                .context
                .clone()
                .unwrap_or_else(|| Arc::clone(self.host()));
            (host, state.read_generation)
        };

        self.backend().refresh_read_handler(&host);

        if self.is_mux() || !self.target_wants_input() {
            return;
        }
        let Some(pollable) = self.backend().add_watch(WatchCondition::IN) else {
            return;
        };

        let weak = Arc::downgrade(self);
        let token = host.attach(
            pollable,
            WatchCondition::IN | WatchCondition::HUP,
            Box::new(move |cond| match weak.upgrade() {
                Some(chr) => chr.pump_input(generation, cond),
                None => WatchControl::Remove,
            }),
        );

        let mut state = lock(&self.state);
        if state.read_generation == generation && state.read_watch.is_none() {
            state.read_watch = Some(ReadWatch {
                host: Arc::clone(&host),
                token,
            });
            drop(state);
            debug!("chardev '{}': read watch {token} installed", self.label());
        } else {
            // Superseded while attaching.
            drop(state);
            host.remove(token);
        }
    }

    /// Read-watch body: pull what the frontend can take and deliver it.
    fn pump_input(&self, generation: u64, _cond: WatchCondition) -> WatchControl {
        if lock(&self.state).read_generation != generation {
            return WatchControl::Remove;
        }

        let max = self.be_can_write().min(self.policy().read_buf_len);
        if max == 0 {
            self.retire_read_watch(generation);
            debug!("chardev '{}': read watch parked, target is full", self.label());
            return WatchControl::Remove;
        }

        let mut buf = vec![0u8; max];
        match self.backend().sync_read(&mut buf) {
            Ok(0) => {
                self.retire_read_watch(generation);
                self.be_event(ChardevEvent::Closed);
                WatchControl::Remove
            }
            Ok(n) => {
                self.be_write(&buf[..n]);
                WatchControl::Continue
            }
            Err(e) if e.is_transient() => WatchControl::Continue,
            Err(e) => {
                warn!("chardev '{}': read watch failed: {e}", self.label());
                self.retire_read_watch(generation);
                WatchControl::Remove
            }
        }
    }

    /// Reinstalls a read watch that was parked while the target was full.
    ///
    /// A mux forwards this to its underlying chardev, which owns the watch.
    pub(crate) fn resume_input(self: &Arc<Self>) {
        if let Some(underlying) = self.underlying() {
            underlying.resume_input();
            return;
        }
        let context = {
            let state = lock(&self.state);
            if state.read_watch.is_some() {
                return;
            }
            state.context.clone()
        };
        self.update_read_handler(context);
    }

    /// Forgets the read watch record when the callback retires itself.
    fn retire_read_watch(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.read_generation == generation {
            state.read_watch = None;
        }
    }

    /// Registers `callback` for `condition` on the backend's pollable.
    ///
    /// Returns `None` when the backend has nothing pollable for it.
    pub fn add_watch(&self, condition: WatchCondition, callback: WatchCallback) -> Option<WatchToken> {
        let pollable = self.backend().add_watch(condition)?;
        let token = self.host().attach(pollable, condition, callback);
        {
            let host = self.host();
            let mut state = lock(&self.state);
            state.watches.retain(|t| host.is_live(*t));
            state.watches.push(token);
        }
        debug!("chardev '{}': watch {token} added for {condition}", self.label());
        Some(token)
    }

    /// Revokes a watch returned by [`Chardev::add_watch`].
    ///
    /// Tokens this chardev did not hand out, its own read watch included,
    /// are left alone and yield `false`.
    pub fn remove_watch(&self, token: WatchToken) -> bool {
        {
            let mut state = lock(&self.state);
            let Some(pos) = state.watches.iter().position(|t| *t == token) else {
                return false;
            };
            state.watches.swap_remove(pos);
        }
        self.host().remove(token)
    }
}
