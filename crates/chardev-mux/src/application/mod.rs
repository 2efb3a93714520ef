//! Application layer for the chardev binding stack.
//!
//! Everything here runs on the single logical I/O thread and depends only on
//! the `chardev_core` vocabulary.  Concrete transports and the concrete host
//! loop live in `infrastructure` and are injected through the `Backend` and
//! `ReadinessHost` traits.
//!
//! # Sub-modules
//!
//! - **`handlers`**     – the frontend callback set and its atomic swap cell.
//! - **`chardev`**      – per-backend record: open flag, bound frontend or
//!   slot table, inbound delivery, bounded read/write loops.
//! - **`binding`**      – the frontend handle and every attach / detach /
//!   rebind / hot-swap operation.
//! - **`mux`**          – multiplexer slot table, focus, and the wiring onto
//!   the shared underlying backend.
//! - **`watch_bridge`** – read-watch installation and revocation, plus
//!   frontend-requested watches.
//! - **`registry`**     – label-keyed store of live chardevs.
//!
//! No mutex in this layer is ever held while a consumer callback runs.
//! Callbacks may re-enter the binding manager.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod binding;
pub mod chardev;
pub mod handlers;
pub mod mux;
pub mod registry;
pub mod watch_bridge;

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this layer leaves its state consistent before
/// any code that could panic runs, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
