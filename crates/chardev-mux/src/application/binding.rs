//! Binding manager: the frontend handle and every attach / detach / rebind
//! operation on it.
//!
//! A [`CharFrontend`] is owned by its consumer.  It starts unbound; every
//! operation on an unbound handle has a neutral result (`Ok(0)`, `None`, a
//! no-op) except connection establishment, which reports
//! [`ChardevError::MissingBackend`].
//!
//! # Ordering rules
//!
//! - Installing a callback set retires the previous read watch before the
//!   new one is registered.
//! - `unbind` clears the callbacks first, then the backend's reference to
//!   this handle, and clears the handle's own backend reference last.
//! - No lock is held while a consumer callback runs.

use std::fmt;
use std::sync::Arc;

use chardev_core::{
    ChardevError, ChardevEvent, IoctlCommand, IoctlReply, MsgFd, ReadinessHost, SlotTag,
    WatchCallback, WatchCondition, WatchToken,
};
use tracing::{debug, info, warn};

use super::chardev::Chardev;
use super::handlers::{FrontendId, FrontendLink, Handlers};

/// A consumer's binding to a chardev (or to one slot of a mux).
pub struct CharFrontend {
    chr: Option<Arc<Chardev>>,
    tag: SlotTag,
    fe_open: bool,
    link: Arc<FrontendLink>,
    /// Set while the installed callback set carries a backend-changed
    /// notifier; gates [`CharFrontend::backend`].
    change_subscribed: bool,
    context: Option<Arc<dyn ReadinessHost>>,
    watches: Vec<(Arc<dyn ReadinessHost>, WatchToken)>,
}

impl CharFrontend {
    /// Creates an unbound handle.
    pub fn new() -> Self {
        Self {
            chr: None,
            tag: SlotTag::SINGLE,
            fe_open: false,
            link: Arc::new(FrontendLink::new(FrontendId::next())),
            change_subscribed: false,
            context: None,
            watches: Vec::new(),
        }
    }

    pub fn id(&self) -> FrontendId {
        self.link.id()
    }

    /// Slot assigned at bind time; always slot 0 on a plain chardev.
    pub fn tag(&self) -> SlotTag {
        self.tag
    }

    /// The frontend's own open flag.
    pub fn is_open(&self) -> bool {
        self.fe_open
    }

    /// `true` while a callback set is installed.
    pub fn has_handlers(&self) -> bool {
        self.link.snapshot().is_some()
    }

    /// `true` while bound.
    pub fn backend_connected(&self) -> bool {
        self.chr.is_some()
    }

    /// `true` while bound to a chardev whose backend reports open.
    pub fn backend_open(&self) -> bool {
        self.chr.as_ref().is_some_and(|c| c.is_open())
    }

    /// Raw access to the bound chardev.
    ///
    /// # Panics
    ///
    /// Panics if the installed callback set has a backend-changed notifier:
    /// the chardev behind a subscribed handle may be swapped at any time.
    pub fn backend(&self) -> Option<&Arc<Chardev>> {
        assert!(
            !self.change_subscribed,
            "raw chardev access while subscribed to backend changes"
        );
        self.chr.as_ref()
    }

    // ── Attach / detach ──────────────────────────────────────────────────────

    /// Binds this handle to `chr`.
    ///
    /// Returns the assigned slot.  Fails with `Unavailable` if a plain
    /// chardev already has a frontend or a mux has no free slot, and with
    /// `AlreadyBound` if this handle is bound elsewhere.  The chardev's own
    /// open flag is left alone.
    pub fn bind(&mut self, chr: &Arc<Chardev>) -> Result<SlotTag, ChardevError> {
        if let Some(current) = &self.chr {
            return Err(ChardevError::AlreadyBound(current.label().to_string()));
        }
        let tag = chr.attach_frontend(&self.link)?;
        self.chr = Some(Arc::clone(chr));
        self.tag = tag;
        self.fe_open = false;
        debug!("{} bound to '{}' slot {tag}", self.id(), chr.label());
        Ok(tag)
    }

    /// Detaches this handle.  Calling it on an unbound handle does nothing.
    ///
    /// With `destroy` set the chardev is also dropped from the registry that
    /// created it.
    pub fn unbind(&mut self, destroy: bool) {
        let Some(chr) = self.chr.clone() else {
            return;
        };

        self.apply_handlers(None, None, true);
        self.revoke_watches();
        chr.detach_frontend(self.id(), self.tag);
        if destroy {
            chr.release();
        }

        debug!("{} unbound from '{}'", self.id(), chr.label());
        self.tag = SlotTag::SINGLE;
        self.chr = None;
    }

    // ── Callback set ─────────────────────────────────────────────────────────

    /// Replaces the callback set.
    ///
    /// `context` selects the host the read watch is registered on; `None`
    /// uses the chardev's default host.  With `update_open` set, the
    /// frontend's open flag follows whether `handlers` has any delivery
    /// callback.  Installing a set on a chardev that is already open
    /// delivers one `Opened` event before returning.
    pub fn set_handlers(
        &mut self,
        handlers: Handlers,
        context: Option<Arc<dyn ReadinessHost>>,
        update_open: bool,
    ) {
        let handlers = (!handlers.is_empty()).then(|| Arc::new(handlers));
        self.apply_handlers(handlers, context, update_open);
    }

    fn apply_handlers(
        &mut self,
        handlers: Option<Arc<Handlers>>,
        context: Option<Arc<dyn ReadinessHost>>,
        update_open: bool,
    ) {
        let Some(chr) = self.chr.clone() else {
            return;
        };

        let wants_open = handlers.as_ref().is_some_and(|h| h.wants_open());
        if !wants_open {
            chr.remove_pending();
        }

        self.change_subscribed = handlers.as_ref().is_some_and(|h| h.has_backend_changed());
        self.context = context.clone();
        self.link.replace(handlers);
        chr.update_read_handler(context);

        if update_open {
            self.set_open(wants_open);
        }

        if wants_open {
            self.take_focus();
            if chr.is_open() {
                chr.send_event_to(&self.link, ChardevEvent::Opened);
            }
        }

        if chr.is_mux() {
            chr.rewire_mux();
        }
    }

    /// Sets the frontend's open flag and tells the backend about changes.
    pub fn set_open(&mut self, open: bool) {
        let Some(chr) = &self.chr else {
            return;
        };
        if self.fe_open == open {
            return;
        }
        self.fe_open = open;
        chr.backend().frontend_open_changed(open);
    }

    /// Makes this handle the mux's delivery target.  No-op on a plain chardev.
    pub fn take_focus(&self) {
        let Some(chr) = self.chr.as_ref().filter(|c| c.is_mux()) else {
            return;
        };
        if let Err(e) = chr.set_focus(self.tag) {
            debug!("{}: cannot take focus on '{}': {e}", self.id(), chr.label());
        }
    }

    // ── Connection ───────────────────────────────────────────────────────────

    /// Blocks until the backend has a peer.
    pub fn wait_connected(&self) -> Result<(), ChardevError> {
        self.chr
            .as_ref()
            .ok_or(ChardevError::MissingBackend)?
            .backend()
            .wait_connected()
    }

    /// Drops the backend's peer connection if it has one.
    pub fn disconnect(&self) {
        let Some(chr) = &self.chr else {
            return;
        };
        match chr.backend().disconnect() {
            Ok(()) | Err(ChardevError::NotSupported) => {}
            Err(e) => warn!("'{}': disconnect failed: {e}", chr.label()),
        }
    }

    pub fn set_echo(&self, echo: bool) {
        if let Some(chr) = &self.chr {
            if let Err(e) = chr.backend().set_echo(echo) {
                debug!("'{}': set_echo({echo}) ignored: {e}", chr.label());
            }
        }
    }

    // ── Watches ──────────────────────────────────────────────────────────────

    /// Watches the backend for `condition`.
    ///
    /// Returns `None` when unbound or when the backend has nothing pollable
    /// for `condition`.  Watches still live at unbind are revoked then.
    pub fn add_watch(
        &mut self,
        condition: WatchCondition,
        callback: WatchCallback,
    ) -> Option<WatchToken> {
        let chr = self.chr.as_ref()?;
        let token = chr.add_watch(condition, callback)?;
        self.watches.retain(|(host, t)| host.is_live(*t));
        self.watches.push((Arc::clone(chr.host()), token));
        Some(token)
    }

    /// Revokes a watch returned by [`CharFrontend::add_watch`].
    pub fn remove_watch(&mut self, token: WatchToken) -> bool {
        let Some(pos) = self.watches.iter().position(|(_, t)| *t == token) else {
            return false;
        };
        let (host, token) = self.watches.swap_remove(pos);
        host.remove(token)
    }

    fn revoke_watches(&mut self) {
        for (host, token) in self.watches.drain(..) {
            host.remove(token);
        }
    }

    // ── Data passthroughs ────────────────────────────────────────────────────

    /// Non-blocking write.  Returns `Ok(0)` when unbound.
    pub fn write(&self, buf: &[u8]) -> Result<usize, ChardevError> {
        match &self.chr {
            Some(chr) => chr.write_bytes(buf, false),
            None => Ok(0),
        }
    }

    /// Writes all of `buf`, retrying transient failures a bounded number of
    /// times.  Returns `Ok(0)` when unbound.
    pub fn write_all(&self, buf: &[u8]) -> Result<usize, ChardevError> {
        match &self.chr {
            Some(chr) => chr.write_bytes(buf, true),
            None => Ok(0),
        }
    }

    /// Fills `buf` with a bounded synchronous read.  Returns `Ok(0)` when
    /// unbound.
    pub fn read_all(&self, buf: &mut [u8]) -> Result<usize, ChardevError> {
        match &self.chr {
            Some(chr) => chr.read_all(buf),
            None => Ok(0),
        }
    }

    /// Formats `args` and writes the result, truncated to one byte less than
    /// the chardev's read buffer.
    pub fn print(&self, args: fmt::Arguments<'_>) -> Result<usize, ChardevError> {
        let Some(chr) = &self.chr else {
            return Ok(0);
        };
        let text = fmt::format(args);
        let limit = chr.policy().read_buf_len.saturating_sub(1);
        let bytes = text.as_bytes();
        chr.write_bytes(&bytes[..bytes.len().min(limit)], true)
    }

    pub fn ioctl(&self, cmd: IoctlCommand) -> Result<IoctlReply, ChardevError> {
        match &self.chr {
            Some(chr) => chr.backend().ioctl(cmd),
            None => Err(ChardevError::NotSupported),
        }
    }

    pub fn get_msgfds(&self, max: usize) -> Result<Vec<MsgFd>, ChardevError> {
        self.chr
            .as_ref()
            .ok_or(ChardevError::MissingBackend)?
            .backend()
            .get_msgfds(max)
    }

    /// First descriptor received with the last message, if any.
    pub fn get_msgfd(&self) -> Option<MsgFd> {
        self.get_msgfds(1).ok()?.first().copied()
    }

    pub fn set_msgfds(&self, fds: &[MsgFd]) -> Result<(), ChardevError> {
        self.chr
            .as_ref()
            .ok_or(ChardevError::MissingBackend)?
            .backend()
            .set_msgfds(fds)
    }

    /// Tells the backend the frontend can take input again, reinstalls a
    /// parked read watch, and wakes the host loop so it re-polls.
    pub fn accept_input(&self) {
        let Some(chr) = &self.chr else {
            return;
        };
        chr.backend().accept_input();
        chr.resume_input();
        match &self.context {
            Some(host) => host.wakeup(),
            None => chr.host().wakeup(),
        }
    }

    // ── Hot swap ─────────────────────────────────────────────────────────────

    /// Moves this handle from its current chardev onto `next` while keeping
    /// the installed callback set.
    ///
    /// The callback set must carry a backend-changed notifier.  If the
    /// notifier vetoes the change, the handle is put back on the previous
    /// chardev and `ChangeFailed` is returned.  On success the previous
    /// chardev is handed back to the caller.
    pub fn hot_swap(&mut self, next: &Arc<Chardev>) -> Result<Arc<Chardev>, ChardevError> {
        let prev = self.chr.clone().ok_or(ChardevError::MissingBackend)?;
        if prev.is_mux() {
            return Err(ChardevError::NotSupported);
        }
        if next.is_mux() {
            return Err(ChardevError::Unavailable {
                label: next.label().to_string(),
            });
        }
        let handlers = self.link.snapshot();
        let Some(current) = handlers.clone().filter(|h| h.has_backend_changed()) else {
            return Err(ChardevError::NotSupported);
        };

        let next_tag = next.attach_frontend(&self.link)?;

        if prev.is_open() && !next.is_open() {
            prev.send_event_to(&self.link, ChardevEvent::Closed);
        }
        if self.fe_open {
            prev.backend().frontend_open_changed(false);
        }
        prev.remove_pending();
        self.revoke_watches();
        prev.detach_frontend(self.id(), self.tag);

        self.chr = Some(Arc::clone(next));
        self.tag = next_tag;
        self.fe_open = false;
        let context = self.context.clone();
        self.apply_handlers(handlers.clone(), context.clone(), true);

        if let Err(reason) = current.notify_backend_changed() {
            warn!(
                "{}: swap '{}' -> '{}' rejected: {reason}",
                self.id(),
                prev.label(),
                next.label()
            );
            next.remove_pending();
            self.set_open(false);
            next.detach_frontend(self.id(), self.tag);
            match prev.attach_frontend(&self.link) {
                Ok(tag) => {
                    self.chr = Some(Arc::clone(&prev));
                    self.tag = tag;
                    self.apply_handlers(handlers, context, true);
                }
                Err(e) => {
                    warn!("{}: cannot return to '{}': {e}", self.id(), prev.label());
                    self.link.replace(None);
                    self.change_subscribed = false;
                    self.tag = SlotTag::SINGLE;
                    self.chr = None;
                }
            }
            return Err(ChardevError::ChangeFailed {
                label: next.label().to_string(),
                reason,
            });
        }

        info!("{}: swapped '{}' -> '{}'", self.id(), prev.label(), next.label());
        Ok(prev)
    }
}

impl Default for CharFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CharFrontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharFrontend")
            .field("id", &self.id())
            .field("chardev", &self.chr.as_ref().map(|c| c.label().to_string()))
            .field("tag", &self.tag)
            .field("open", &self.fe_open)
            .finish()
    }
}

impl Drop for CharFrontend {
    fn drop(&mut self) {
        self.unbind(false);
    }
}
