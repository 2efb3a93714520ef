//! The frontend callback set.
//!
//! A [`Handlers`] value bundles the three delivery callbacks (can-read
//! predicate, read sink, event sink) with the optional backend-changed
//! notifier.  Context that C-style APIs pass as an opaque pointer is simply
//! captured by the closures.
//!
//! The set is installed into a [`FrontendLink`], which is shared between
//! the frontend handle and whichever backend it is bound to.  Replacement
//! swaps one `Arc<Handlers>` for another under a short lock, so a delivery
//! either sees the whole old set or the whole new set, never a mix.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

use chardev_core::{ChardevEvent, IdCounter};

use super::lock;

type CanReadFn = Box<dyn Fn() -> usize + Send + Sync>;
type ReadFn = Box<dyn Fn(&[u8]) + Send + Sync>;
type EventFn = Box<dyn Fn(ChardevEvent) + Send + Sync>;
type BackendChangedFn = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

static FRONTEND_IDS: IdCounter = IdCounter::new();

/// Process-unique identity of a frontend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrontendId(NonZeroU64);

impl FrontendId {
    pub(crate) fn next() -> Self {
        Self(FRONTEND_IDS.next())
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for FrontendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fe{}", self.0)
    }
}

/// Callback set owned by exactly one frontend handle.
///
/// Built with the `on_*` methods:
///
/// ```rust
/// use chardev_mux::Handlers;
///
/// let handlers = Handlers::new()
///     .on_can_read(|| 64)
///     .on_read(|bytes| println!("got {} bytes", bytes.len()));
/// assert!(handlers.wants_open());
/// ```
#[derive(Default)]
pub struct Handlers {
    can_read: Option<CanReadFn>,
    read: Option<ReadFn>,
    event: Option<EventFn>,
    backend_changed: Option<BackendChangedFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The empty set.  Installing it closes the frontend.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the predicate reporting how many bytes the frontend can take.
    pub fn on_can_read(mut self, f: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.can_read = Some(Box::new(f));
        self
    }

    /// Sets the sink for inbound bytes.
    pub fn on_read(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.read = Some(Box::new(f));
        self
    }

    /// Sets the sink for backend events.
    pub fn on_event(mut self, f: impl Fn(ChardevEvent) + Send + Sync + 'static) -> Self {
        self.event = Some(Box::new(f));
        self
    }

    /// Subscribes to backend hot swaps.  An `Err` vetoes the swap.
    pub fn on_backend_changed(
        mut self,
        f: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.backend_changed = Some(Box::new(f));
        self
    }

    /// `true` when any delivery callback is present.
    pub fn wants_open(&self) -> bool {
        self.can_read.is_some() || self.read.is_some() || self.event.is_some()
    }

    /// `true` when nothing at all is registered.
    pub fn is_empty(&self) -> bool {
        !self.wants_open() && self.backend_changed.is_none()
    }

    pub fn has_backend_changed(&self) -> bool {
        self.backend_changed.is_some()
    }

    /// Capacity reported by the can-read predicate; 0 when absent.
    pub(crate) fn can_read(&self) -> usize {
        self.can_read.as_ref().map_or(0, |f| f())
    }

    pub(crate) fn read(&self, buf: &[u8]) {
        if let Some(f) = &self.read {
            f(buf);
        }
    }

    pub(crate) fn event(&self, event: ChardevEvent) {
        if let Some(f) = &self.event {
            f(event);
        }
    }

    pub(crate) fn notify_backend_changed(&self) -> Result<(), String> {
        match &self.backend_changed {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("can_read", &self.can_read.is_some())
            .field("read", &self.read.is_some())
            .field("event", &self.event.is_some())
            .field("backend_changed", &self.backend_changed.is_some())
            .finish()
    }
}

/// The part of a frontend that its backend can see.
///
/// Backends hold an `Arc<FrontendLink>` in their bound slot; the frontend
/// handle holds the same `Arc`.  Delivery clones the current handler set out
/// of the cell and invokes it with the lock released.
#[derive(Debug)]
pub(crate) struct FrontendLink {
    id: FrontendId,
    handlers: Mutex<Option<Arc<Handlers>>>,
}

impl FrontendLink {
    pub(crate) fn new(id: FrontendId) -> Self {
        Self {
            id,
            handlers: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> FrontendId {
        self.id
    }

    /// Returns the current handler set, if any.
    pub(crate) fn snapshot(&self) -> Option<Arc<Handlers>> {
        lock(&self.handlers).clone()
    }

    /// Installs `next` and returns the previous set.
    pub(crate) fn replace(&self, next: Option<Arc<Handlers>>) -> Option<Arc<Handlers>> {
        std::mem::replace(&mut *lock(&self.handlers), next)
    }

    /// `true` when the installed set has any delivery callback.
    pub(crate) fn wants_input(&self) -> bool {
        lock(&self.handlers)
            .as_ref()
            .is_some_and(|h| h.wants_open())
    }

    pub(crate) fn can_read(&self) -> usize {
        self.snapshot().map_or(0, |h| h.can_read())
    }

    pub(crate) fn deliver(&self, buf: &[u8]) {
        if let Some(h) = self.snapshot() {
            h.read(buf);
        }
    }

    pub(crate) fn send_event(&self, event: ChardevEvent) {
        if let Some(h) = self.snapshot() {
            h.event(event);
        }
    }
}
