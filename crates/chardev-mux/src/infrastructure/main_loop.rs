//! MainLoop: a cooperative readiness loop implementing [`ReadinessHost`].
//!
//! Each registered watch is a pollable probe, the conditions it is
//! interested in, and a callback.  One [`MainLoop::iterate`] evaluates every
//! probe, queues the ready tokens, then dispatches the queue.
//!
//! ```text
//!   attach() ──► sources { token → (pollable, condition, callback) }
//!                    │
//!   poll()   ───────►│ pollable() ∩ condition ≠ ∅  ──► pending queue
//!                    │
//!   dispatch() ◄─────┘ pop token; still registered? ──► callback(cond)
//! ```
//!
//! A token removed after it was queued is dropped at dispatch time, so a
//! revoked watch never fires.  Callbacks run with the loop's lock released
//! and may attach or remove watches (including their own).

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chardev_core::{
    IdCounter, Pollable, ReadinessHost, WatchCallback, WatchCondition, WatchControl, WatchToken,
};

struct Source {
    pollable: Pollable,
    condition: WatchCondition,
    /// `None` while the callback is running.
    callback: Option<WatchCallback>,
}

#[derive(Default)]
struct LoopState {
    sources: BTreeMap<WatchToken, Source>,
    pending: VecDeque<(WatchToken, WatchCondition)>,
    wakeups: u64,
}

/// Single-threaded readiness loop.
#[derive(Default)]
pub struct MainLoop {
    state: Mutex<LoopState>,
    tokens: IdCounter,
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `token` as ready for `condition`, as if the poller had seen it.
    ///
    /// Unknown tokens are ignored.
    pub fn signal(&self, token: WatchToken, condition: WatchCondition) {
        let mut state = self.state();
        if state.sources.contains_key(&token) {
            state.pending.push_back((token, condition));
        }
    }

    /// Evaluates every probe and queues the ready tokens.
    ///
    /// Returns how many tokens were queued.
    pub fn poll(&self) -> usize {
        let mut guard = self.state();
        let state = &mut *guard;
        let mut queued = 0;
        for (token, source) in &state.sources {
            if source.callback.is_none() {
                continue;
            }
            let ready = (source.pollable)() & source.condition;
            if ready.is_empty() || state.pending.iter().any(|(t, _)| t == token) {
                continue;
            }
            state.pending.push_back((*token, ready));
            queued += 1;
        }
        queued
    }

    /// Runs the callbacks queued before this call.
    ///
    /// Returns how many callbacks actually ran.
    pub fn dispatch(&self) -> usize {
        let batch = self.state().pending.len();
        let mut ran = 0;
        for _ in 0..batch {
            let taken = {
                let mut state = self.state();
                let Some((token, condition)) = state.pending.pop_front() else {
                    break;
                };
                state
                    .sources
                    .get_mut(&token)
                    .and_then(|s| s.callback.take())
                    .map(|cb| (token, condition, cb))
            };
            let Some((token, condition, mut callback)) = taken else {
                continue;
            };

            let control = callback(condition);
            ran += 1;

            let stale: Option<(Option<Source>, WatchCallback)> = {
                let mut state = self.state();
                let live = state.sources.contains_key(&token);
                match (control, live) {
                    (WatchControl::Continue, true) => {
                        if let Some(source) = state.sources.get_mut(&token) {
                            source.callback = Some(callback);
                        }
                        None
                    }
                    (WatchControl::Remove, true) => {
                        state.pending.retain(|(t, _)| *t != token);
                        Some((state.sources.remove(&token), callback))
                    }
                    // Revoked while running.
                    (_, false) => Some((None, callback)),
                }
            };
            // Closures may own chardevs whose drop re-enters the loop.
            drop(stale);
        }
        ran
    }

    /// One poll + dispatch round.
    pub fn iterate(&self) -> usize {
        self.poll();
        self.dispatch()
    }

    /// Drives [`MainLoop::iterate`] every `period` until `shutdown` resolves.
    ///
    /// Returns the number of iterations run.
    pub async fn run(&self, period: Duration, shutdown: impl Future<Output = ()>) -> u64 {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        let mut iterations = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.iterate();
                    iterations += 1;
                }
            }
        }
        iterations
    }

    /// Number of registered watches.
    pub fn live_count(&self) -> usize {
        self.state().sources.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// How many times [`ReadinessHost::wakeup`] was called.
    pub fn wakeups(&self) -> u64 {
        self.state().wakeups
    }
}

impl ReadinessHost for MainLoop {
    fn attach(
        &self,
        pollable: Pollable,
        condition: WatchCondition,
        callback: WatchCallback,
    ) -> WatchToken {
        let token = WatchToken::new(self.tokens.next());
        self.state().sources.insert(
            token,
            Source {
                pollable,
                condition,
                callback: Some(callback),
            },
        );
        token
    }

    fn remove(&self, token: WatchToken) -> bool {
        let removed = {
            let mut state = self.state();
            state.pending.retain(|(t, _)| *t != token);
            state.sources.remove(&token)
        };
        removed.is_some()
    }

    fn is_live(&self, token: WatchToken) -> bool {
        self.state().sources.contains_key(&token)
    }

    fn wakeup(&self) {
        self.state().wakeups += 1;
    }
}
