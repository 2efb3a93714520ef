//! Multiplexer: several frontends sharing one underlying backend.
//!
//! A mux is itself a [`Chardev`] whose binding is a fixed-capacity
//! [`SlotTable`] instead of a single frontend reference.  Internally it owns
//! one ordinary [`CharFrontend`] bound to the *underlying* chardev, through
//! which it writes and from which it receives input.
//!
//! ```text
//!  frontend A ─┐ slot 0
//!  frontend B ─┼ slot 1 ──► mux chardev ──(inner frontend)──► underlying chardev ──► transport
//!  frontend C ─┘ slot 2        │ focus = 1
//!                              └─ inbound bytes go to slot 1 only
//! ```
//!
//! Outbound writes from any slot pass straight through.  Inbound bytes go to
//! the focused slot only; backend events go to every occupied slot.
//!
//! Which keystroke or command moves the focus is not decided here; this
//! module only keeps the slot bookkeeping and redirects delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chardev_core::{
    Backend, ChardevError, ChardevEvent, IoctlCommand, IoctlReply, Pollable, ReadinessHost,
    SlotTag, WatchCondition, MAX_SLOTS,
};
use tracing::{debug, info};

use super::binding::CharFrontend;
use super::chardev::{Binding, Chardev, ReadPolicy};
use super::handlers::{FrontendId, FrontendLink, Handlers};
use super::lock;
use super::registry::RegistryInner;

// ── Slot table ────────────────────────────────────────────────────────────────

/// Fixed arena of frontend slots with one delivery focus.
///
/// Detaching clears a slot in place; indices of the remaining frontends never
/// move.
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: [Option<Arc<FrontendLink>>; MAX_SLOTS],
    focus: Option<SlotTag>,
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            focus: None,
        }
    }

    /// Places `link` in the first free slot.
    pub(crate) fn attach(&mut self, link: Arc<FrontendLink>) -> Option<SlotTag> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(link);
        SlotTag::new(index)
    }

    /// Clears `tag` if it holds `id`.  Losing the focused slot leaves the
    /// mux without focus until someone sets it again.
    pub(crate) fn detach(&mut self, tag: SlotTag, id: FrontendId) -> bool {
        let slot = &mut self.slots[tag.index()];
        if !slot.as_ref().is_some_and(|l| l.id() == id) {
            return false;
        }
        *slot = None;
        if self.focus == Some(tag) {
            self.focus = None;
        }
        true
    }

    pub(crate) fn slot(&self, tag: SlotTag) -> Option<&Arc<FrontendLink>> {
        self.slots[tag.index()].as_ref()
    }

    pub(crate) fn focus(&self) -> Option<SlotTag> {
        self.focus
    }

    pub(crate) fn focused_link(&self) -> Option<Arc<FrontendLink>> {
        self.focus.and_then(|tag| self.slot(tag).cloned())
    }

    /// Moves focus to `tag`; returns the previously focused link when the
    /// focus actually changed.
    pub(crate) fn set_focus(
        &mut self,
        tag: SlotTag,
    ) -> Result<Option<Option<Arc<FrontendLink>>>, ChardevError> {
        if self.slot(tag).is_none() {
            return Err(ChardevError::InvalidSlot(tag));
        }
        if self.focus == Some(tag) {
            return Ok(None);
        }
        let previous = self.focused_link();
        self.focus = Some(tag);
        Ok(Some(previous))
    }

    pub(crate) fn occupied(&self) -> impl Iterator<Item = (SlotTag, &Arc<FrontendLink>)> {
        SlotTag::all().filter_map(move |tag| self.slot(tag).map(|l| (tag, l)))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// `true` when any occupied slot has delivery callbacks.
    pub(crate) fn any_interested(&self) -> bool {
        self.occupied().any(|(_, l)| l.wants_input())
    }
}

// ── Mux wiring onto the underlying chardev ────────────────────────────────────

/// The mux's own attachment to its underlying chardev.
pub(crate) struct MuxLink {
    underlying: Arc<Chardev>,
    /// Taken out while a rewire is in progress so callbacks fired by the
    /// rewire never run under this lock.
    inner: Mutex<Option<CharFrontend>>,
    rewire_pending: AtomicBool,
}

/// Passthrough driver installed as the mux chardev's backend.
struct MuxBackend {
    underlying: Arc<Chardev>,
}

impl Backend for MuxBackend {
    fn write(&self, buf: &[u8], blocking: bool) -> Result<usize, ChardevError> {
        self.underlying.write_bytes(buf, blocking)
    }

    fn ioctl(&self, cmd: IoctlCommand) -> Result<IoctlReply, ChardevError> {
        self.underlying.backend().ioctl(cmd)
    }

    fn add_watch(&self, condition: WatchCondition) -> Option<Pollable> {
        self.underlying.backend().add_watch(condition)
    }

    fn accept_input(&self) {
        self.underlying.backend().accept_input();
    }

    fn wait_connected(&self) -> Result<(), ChardevError> {
        self.underlying.backend().wait_connected()
    }
}

impl Chardev {
    /// Creates a multiplexer on top of `underlying`.
    ///
    /// Fails with `Unavailable` if `underlying` already has a frontend.
    pub fn new_mux(
        label: impl Into<String>,
        underlying: &Arc<Chardev>,
        host: Arc<dyn ReadinessHost>,
    ) -> Result<Arc<Chardev>, ChardevError> {
        Self::build_mux(label.into(), underlying, host, *underlying.policy(), Weak::new())
    }

    pub(crate) fn build_mux(
        label: String,
        underlying: &Arc<Chardev>,
        host: Arc<dyn ReadinessHost>,
        policy: ReadPolicy,
        registry: Weak<RegistryInner>,
    ) -> Result<Arc<Chardev>, ChardevError> {
        let mut inner = CharFrontend::new();
        inner.bind(underlying)?;
        let link = MuxLink {
            underlying: Arc::clone(underlying),
            inner: Mutex::new(Some(inner)),
            rewire_pending: AtomicBool::new(false),
        };
        let driver = MuxBackend {
            underlying: Arc::clone(underlying),
        };
        debug!("mux '{label}' created over '{}'", underlying.label());
        Ok(Self::build(
            label,
            Box::new(driver),
            host,
            policy,
            Some(link),
            registry,
        ))
    }

    /// The chardev a mux forwards to.
    pub fn underlying(&self) -> Option<&Arc<Chardev>> {
        self.mux.as_ref().map(|m| &m.underlying)
    }

    /// Slot currently receiving inbound delivery.
    pub fn focus(&self) -> Option<SlotTag> {
        match &lock(&self.state).binding {
            Binding::Mux(table) => table.focus(),
            Binding::Single(_) => None,
        }
    }

    /// Occupied slots in ascending order.
    pub fn occupied_slots(&self) -> Vec<SlotTag> {
        match &lock(&self.state).binding {
            Binding::Mux(table) => table.occupied().map(|(tag, _)| tag).collect(),
            Binding::Single(_) => Vec::new(),
        }
    }

    /// Redirects inbound delivery to `tag`.
    ///
    /// The previous focus receives `MuxOut`, the new one `MuxIn`, and a read
    /// watch parked while nobody had focus is reinstalled.  Setting the focus
    /// that is already current does nothing.
    pub fn set_focus(&self, tag: SlotTag) -> Result<(), ChardevError> {
        let (previous, next) = {
            let mut state = lock(&self.state);
            let Binding::Mux(table) = &mut state.binding else {
                return Err(ChardevError::NotSupported);
            };
            match table.set_focus(tag)? {
                None => return Ok(()),
                Some(previous) => (previous, table.focused_link()),
            }
        };
        info!("mux '{}': focus -> slot {tag}", self.label());
        if let Some(previous) = previous {
            previous.send_event(ChardevEvent::MuxOut);
        }
        if let Some(next) = next {
            next.send_event(ChardevEvent::MuxIn);
        }
        if let Some(underlying) = self.underlying() {
            underlying.resume_input();
        }
        Ok(())
    }

    /// Callback set the mux installs on its underlying chardev.
    fn mux_handlers(self: &Arc<Self>) -> Handlers {
        let can_read = Arc::downgrade(self);
        let read = Arc::downgrade(self);
        let event = Arc::downgrade(self);
        Handlers::new()
            .on_can_read(move || can_read.upgrade().map_or(0, |m| m.be_can_write()))
            .on_read(move |buf| {
                if let Some(m) = read.upgrade() {
                    m.be_write(buf);
                }
            })
            .on_event(move |ev| {
                if let Some(m) = event.upgrade() {
                    m.be_event(ev);
                }
            })
    }

    /// Re-derives the mux's wiring onto its underlying chardev.
    ///
    /// The mux listens on the underlying chardev exactly while at least one
    /// slot has callbacks.  When that union does not change, only the
    /// underlying read watch is refreshed so it re-evaluates `can_read`.
    pub(crate) fn rewire_mux(self: &Arc<Self>) {
        let Some(link) = &self.mux else {
            return;
        };
        let taken = lock(&link.inner).take();
        let Some(mut inner) = taken else {
            // A rewire further up the stack will pick this up.
            link.rewire_pending.store(true, Ordering::SeqCst);
            return;
        };

        loop {
            link.rewire_pending.store(false, Ordering::SeqCst);
            let (wanted, context) = {
                let state = lock(&self.state);
                let wanted = match &state.binding {
                    Binding::Mux(table) => table.any_interested(),
                    Binding::Single(_) => false,
                };
                (wanted, state.context.clone())
            };

            match (wanted, inner.has_handlers()) {
                (true, false) => {
                    debug!("mux '{}': wiring onto '{}'", self.label(), link.underlying.label());
                    inner.set_handlers(self.mux_handlers(), context, true);
                }
                (false, true) => {
                    debug!("mux '{}': unwiring from '{}'", self.label(), link.underlying.label());
                    inner.set_handlers(Handlers::none(), context, true);
                    lock(&self.state).be_open = false;
                }
                (true, true) => link.underlying.update_read_handler(context),
                (false, false) => {}
            }

            if !link.rewire_pending.load(Ordering::SeqCst) {
                break;
            }
        }

        *lock(&link.inner) = Some(inner);
    }
}
