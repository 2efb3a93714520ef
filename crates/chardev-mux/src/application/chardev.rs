//! Chardev: the per-backend registry entry.
//!
//! A [`Chardev`] wraps one [`Backend`] driver with the state the binding
//! layer needs: the backend's open flag, the single bound frontend (or the
//! multiplexer slot table), and the currently installed read watch.
//!
//! It also exposes the *backend-side* entry points a transport uses to push
//! data and events towards its frontend: [`Chardev::be_can_write`],
//! [`Chardev::be_write`], and [`Chardev::be_event`].

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chardev_core::{Backend, ChardevError, ChardevEvent, ReadinessHost, SlotTag, WatchToken};
use tracing::{debug, warn};

use super::handlers::{FrontendId, FrontendLink};
use super::lock;
use super::mux::{MuxLink, SlotTable};
use super::registry::RegistryInner;
use super::watch_bridge::ReadWatch;

/// Bounds for the synchronous read and blocking write loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Successful chunks `read_all` accepts before returning a short count.
    pub chunk_limit: u32,
    /// EAGAIN-class retries allowed per `read_all` / `write_all` call.
    pub transient_retry_limit: u32,
    /// Pause between transient retries.
    pub retry_yield: Duration,
    /// Most bytes the read watch pulls per readiness event.
    pub read_buf_len: usize,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            chunk_limit: 10,
            transient_retry_limit: 10,
            retry_yield: Duration::from_micros(100),
            read_buf_len: 4096,
        }
    }
}

impl ReadPolicy {
    /// Cooperative pause between two transient retries.
    pub(crate) fn pause(&self) {
        std::thread::yield_now();
        if !self.retry_yield.is_zero() {
            std::thread::sleep(self.retry_yield);
        }
    }
}

/// Who a backend delivers to.
#[derive(Debug)]
pub(crate) enum Binding {
    /// Plain backend: at most one bound frontend.
    Single(Option<Arc<FrontendLink>>),
    /// Multiplexer: fixed slot table with one focus.
    Mux(SlotTable),
}

pub(crate) struct ChardevState {
    pub(crate) be_open: bool,
    pub(crate) binding: Binding,
    pub(crate) read_watch: Option<ReadWatch>,
    /// Bumped on every read-handler refresh; a read callback whose
    /// generation no longer matches has been retired.
    pub(crate) read_generation: u64,
    /// Host passed with the last callback set, `None` for the default host.
    pub(crate) context: Option<Arc<dyn ReadinessHost>>,
    /// Tokens handed out by `add_watch` on the default host.
    pub(crate) watches: Vec<WatchToken>,
}

/// One backend together with its binding bookkeeping.
pub struct Chardev {
    label: String,
    driver: Box<dyn Backend>,
    host: Arc<dyn ReadinessHost>,
    policy: ReadPolicy,
    pub(crate) mux: Option<MuxLink>,
    registry: Weak<RegistryInner>,
    pub(crate) state: Mutex<ChardevState>,
}

/// Bounded-iteration state for [`Chardev::read_all`].
struct ReadAll {
    offset: usize,
    chunks_left: u32,
    transient_left: u32,
}

impl Chardev {
    /// Creates a plain (non-mux) chardev with the default [`ReadPolicy`].
    pub fn new(
        label: impl Into<String>,
        backend: impl Backend + 'static,
        host: Arc<dyn ReadinessHost>,
    ) -> Arc<Self> {
        Self::with_policy(label, backend, host, ReadPolicy::default())
    }

    /// Creates a plain chardev with an explicit retry policy.
    pub fn with_policy(
        label: impl Into<String>,
        backend: impl Backend + 'static,
        host: Arc<dyn ReadinessHost>,
        policy: ReadPolicy,
    ) -> Arc<Self> {
        Self::build(
            label.into(),
            Box::new(backend),
            host,
            policy,
            None,
            Weak::new(),
        )
    }

    pub(crate) fn build(
        label: String,
        driver: Box<dyn Backend>,
        host: Arc<dyn ReadinessHost>,
        policy: ReadPolicy,
        mux: Option<MuxLink>,
        registry: Weak<RegistryInner>,
    ) -> Arc<Self> {
        let binding = if mux.is_some() {
            Binding::Mux(SlotTable::new())
        } else {
            Binding::Single(None)
        };
        Arc::new(Self {
            label,
            driver,
            host,
            policy,
            mux,
            registry,
            state: Mutex::new(ChardevState {
                be_open: false,
                binding,
                read_watch: None,
                read_generation: 0,
                context: None,
                watches: Vec::new(),
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_mux(&self) -> bool {
        self.mux.is_some()
    }

    /// The backend's own open flag.
    pub fn is_open(&self) -> bool {
        lock(&self.state).be_open
    }

    pub fn policy(&self) -> &ReadPolicy {
        &self.policy
    }

    /// Default host used when a callback set is installed without a context.
    pub fn host(&self) -> &Arc<dyn ReadinessHost> {
        &self.host
    }

    /// The capability interface of the underlying transport.
    pub fn backend(&self) -> &dyn Backend {
        self.driver.as_ref()
    }

    /// `true` while any frontend is bound.
    pub fn has_frontend(&self) -> bool {
        match &lock(&self.state).binding {
            Binding::Single(slot) => slot.is_some(),
            Binding::Mux(table) => table.len() > 0,
        }
    }

    /// Identity of the frontend bound to a plain chardev.
    pub fn bound_frontend(&self) -> Option<FrontendId> {
        match &lock(&self.state).binding {
            Binding::Single(slot) => slot.as_ref().map(|l| l.id()),
            Binding::Mux(_) => None,
        }
    }

    // ── Binding bookkeeping (driven by the binding manager) ──────────────────

    pub(crate) fn attach_frontend(&self, link: &Arc<FrontendLink>) -> Result<SlotTag, ChardevError> {
        let mut state = lock(&self.state);
        match &mut state.binding {
            Binding::Single(Some(_)) => Err(ChardevError::Unavailable {
                label: self.label.clone(),
            }),
            Binding::Single(slot) => {
                *slot = Some(Arc::clone(link));
                Ok(SlotTag::SINGLE)
            }
            Binding::Mux(table) => table.attach(Arc::clone(link)).ok_or_else(|| {
                ChardevError::Unavailable {
                    label: self.label.clone(),
                }
            }),
        }
    }

    /// Clears the bound reference or slot if it still belongs to `id`.
    pub(crate) fn detach_frontend(&self, id: FrontendId, tag: SlotTag) -> bool {
        let mut state = lock(&self.state);
        match &mut state.binding {
            Binding::Single(slot) => {
                if slot.as_ref().is_some_and(|l| l.id() == id) {
                    *slot = None;
                    true
                } else {
                    false
                }
            }
            Binding::Mux(table) => table.detach(tag, id),
        }
    }

    /// Drops this chardev from the registry that created it, if any.
    pub(crate) fn release(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(&self.label);
            debug!("chardev '{}' released from registry", self.label);
        }
    }

    /// The frontend inbound bytes currently go to.
    fn delivery_target(&self) -> Option<Arc<FrontendLink>> {
        match &lock(&self.state).binding {
            Binding::Single(slot) => slot.clone(),
            Binding::Mux(table) => table.focused_link(),
        }
    }

    /// `true` when the delivery target has callbacks installed.
    pub(crate) fn target_wants_input(&self) -> bool {
        self.delivery_target().is_some_and(|l| l.wants_input())
    }

    // ── Backend-side entry points ────────────────────────────────────────────

    /// How many bytes the current delivery target can accept right now.
    pub fn be_can_write(&self) -> usize {
        self.delivery_target().map_or(0, |l| l.can_read())
    }

    /// Delivers inbound bytes to the bound (or focused) frontend.
    ///
    /// Bytes are dropped when nobody is listening.
    pub fn be_write(&self, buf: &[u8]) {
        if let Some(link) = self.delivery_target() {
            link.deliver(buf);
        }
    }

    /// Reports a backend event.
    ///
    /// `Opened` and `Closed` update the backend open flag.  A plain chardev
    /// forwards the event to its frontend; a multiplexer forwards it to every
    /// occupied slot.
    pub fn be_event(&self, event: ChardevEvent) {
        let targets: Vec<Arc<FrontendLink>> = {
            let mut state = lock(&self.state);
            if let Some(open) = event.open_state() {
                state.be_open = open;
            }
            match &state.binding {
                Binding::Single(slot) => slot.iter().cloned().collect(),
                Binding::Mux(table) => table.occupied().map(|(_, l)| Arc::clone(l)).collect(),
            }
        };
        for link in targets {
            link.send_event(event);
        }
    }

    pub(crate) fn send_event_to(&self, link: &FrontendLink, event: ChardevEvent) {
        link.send_event(event);
    }

    // ── Bounded data-path loops ──────────────────────────────────────────────

    /// Writes `buf`; with `all` set, keeps writing until every byte is taken.
    ///
    /// Transient failures are retried up to the policy's limit.  An error
    /// after some bytes went out returns the short count instead.
    pub(crate) fn write_bytes(&self, buf: &[u8], all: bool) -> Result<usize, ChardevError> {
        if !all {
            return self.driver.write(buf, false);
        }

        let mut offset = 0;
        let mut retries = self.policy.transient_retry_limit;
        while offset < buf.len() {
            match self.driver.write(&buf[offset..], true) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(e) if e.is_transient() && retries > 0 => {
                    retries -= 1;
                    self.policy.pause();
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "chardev '{}': write stalled after {offset}/{} bytes",
                        self.label,
                        buf.len()
                    );
                    break;
                }
                Err(e) if offset == 0 => return Err(e),
                Err(e) => {
                    debug!("chardev '{}': short write after {offset} bytes: {e}", self.label);
                    break;
                }
            }
        }
        Ok(offset)
    }

    /// Fills `buf` through the backend's synchronous read.
    ///
    /// Stops at end of stream, after `chunk_limit` successful chunks, or once
    /// the transient retry budget is spent, returning however many bytes
    /// arrived.  Backends without synchronous read yield 0.
    pub(crate) fn read_all(&self, buf: &mut [u8]) -> Result<usize, ChardevError> {
        let mut st = ReadAll {
            offset: 0,
            chunks_left: self.policy.chunk_limit,
            transient_left: self.policy.transient_retry_limit,
        };

        while st.offset < buf.len() {
            match self.driver.sync_read(&mut buf[st.offset..]) {
                Ok(0) => break,
                Ok(n) => {
                    st.offset += n;
                    if st.chunks_left == 0 {
                        break;
                    }
                    st.chunks_left -= 1;
                }
                Err(e) if e.is_transient() && st.transient_left > 0 => {
                    st.transient_left -= 1;
                    self.policy.pause();
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "chardev '{}': read gave up after {} transient retries",
                        self.label, self.policy.transient_retry_limit
                    );
                    break;
                }
                Err(ChardevError::NotSupported) => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        Ok(st.offset)
    }
}

impl std::fmt::Debug for Chardev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chardev")
            .field("label", &self.label)
            .field("mux", &self.is_mux())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Chardev {
    fn drop(&mut self) {
        let watch = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .read_watch
            .take();
        if let Some(watch) = watch {
            watch.revoke();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::Handlers;
    use crate::infrastructure::backends::memory::MemoryBackend;
    use crate::infrastructure::main_loop::MainLoop;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_chardev(backend: MemoryBackend) -> Arc<Chardev> {
        let host: Arc<dyn ReadinessHost> = Arc::new(MainLoop::new());
        let policy = ReadPolicy {
            retry_yield: Duration::ZERO,
            ..ReadPolicy::default()
        };
        Chardev::with_policy("test0", backend, host, policy)
    }

    fn link_with_counter(counter: Arc<AtomicUsize>) -> Arc<FrontendLink> {
        let link = Arc::new(FrontendLink::new(FrontendId::next()));
        link.replace(Some(Arc::new(
            Handlers::new()
                .on_can_read(|| 16)
                .on_read(move |b| {
                    counter.fetch_add(b.len(), Ordering::SeqCst);
                }),
        )));
        link
    }

    #[test]
    fn test_attach_second_frontend_is_unavailable() {
        // Arrange
        let chr = make_chardev(MemoryBackend::new());
        let first = Arc::new(FrontendLink::new(FrontendId::next()));
        let second = Arc::new(FrontendLink::new(FrontendId::next()));
        chr.attach_frontend(&first).expect("first bind");

        // Act
        let result = chr.attach_frontend(&second);

        // Assert
        assert!(matches!(result, Err(ChardevError::Unavailable { .. })));
        assert_eq!(chr.bound_frontend(), Some(first.id()));
    }

    #[test]
    fn test_detach_ignores_foreign_frontend() {
        let chr = make_chardev(MemoryBackend::new());
        let owner = Arc::new(FrontendLink::new(FrontendId::next()));
        chr.attach_frontend(&owner).unwrap();

        assert!(!chr.detach_frontend(FrontendId::next(), SlotTag::SINGLE));
        assert!(chr.has_frontend());
        assert!(chr.detach_frontend(owner.id(), SlotTag::SINGLE));
        assert!(!chr.has_frontend());
    }

    #[test]
    fn test_be_event_tracks_open_flag() {
        let chr = make_chardev(MemoryBackend::new());
        chr.be_event(ChardevEvent::Opened);
        assert!(chr.is_open());
        chr.be_event(ChardevEvent::Break);
        assert!(chr.is_open());
        chr.be_event(ChardevEvent::Closed);
        assert!(!chr.is_open());
    }

    #[test]
    fn test_be_write_reaches_bound_frontend() {
        // Arrange
        let received = Arc::new(AtomicUsize::new(0));
        let chr = make_chardev(MemoryBackend::new());
        chr.attach_frontend(&link_with_counter(Arc::clone(&received)))
            .unwrap();

        // Act
        chr.be_write(b"hello");

        // Assert
        assert_eq!(received.load(Ordering::SeqCst), 5);
        assert_eq!(chr.be_can_write(), 16);
    }

    #[test]
    fn test_be_write_without_frontend_is_dropped() {
        let chr = make_chardev(MemoryBackend::new());
        chr.be_write(b"nobody home");
        assert_eq!(chr.be_can_write(), 0);
    }

    #[test]
    fn test_write_all_retries_transient_then_completes() {
        // Arrange
        let backend = MemoryBackend::new();
        backend.inject_transient_writes(3);
        backend.limit_write_chunk(2);
        let chr = make_chardev(backend.clone());

        // Act
        let written = chr.write_bytes(b"abcdef", true).unwrap();

        // Assert
        assert_eq!(written, 6);
        assert_eq!(backend.output(), b"abcdef");
    }

    #[test]
    fn test_write_all_gives_up_after_retry_budget() {
        let backend = MemoryBackend::new();
        backend.inject_transient_writes(u32::MAX);
        let chr = make_chardev(backend.clone());

        let written = chr.write_bytes(b"abc", true).unwrap();

        assert_eq!(written, 0);
        assert!(backend.output().is_empty());
    }

    #[test]
    fn test_read_all_collects_chunks() {
        // Arrange
        let backend = MemoryBackend::new();
        backend.push_input(b"0123456789");
        backend.limit_read_chunk(3);
        let chr = make_chardev(backend);
        let mut buf = [0u8; 10];

        // Act
        let n = chr.read_all(&mut buf).unwrap();

        // Assert
        assert_eq!(n, 10);
        assert_eq!(&buf, b"0123456789");
    }

    #[test]
    fn test_read_all_stops_after_chunk_limit() {
        // Arrange – 1-byte chunks, limit 10 extra chunks after the first
        let backend = MemoryBackend::new();
        backend.push_input(&[7u8; 32]);
        backend.limit_read_chunk(1);
        let chr = make_chardev(backend);
        let mut buf = [0u8; 32];

        // Act
        let n = chr.read_all(&mut buf).unwrap();

        // Assert
        assert_eq!(n, 11);
    }

    #[test]
    fn test_read_all_returns_short_count_when_transient_budget_spent() {
        // Arrange – three bytes available, then the backend stays not-ready
        let backend = MemoryBackend::new();
        backend.push_input(b"abc");
        let chr = make_chardev(backend);
        let mut buf = [0u8; 8];

        // Act
        let n = chr.read_all(&mut buf).unwrap();

        // Assert
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_read_all_retries_transient_then_completes() {
        // Arrange
        let backend = MemoryBackend::new();
        backend.inject_transient_reads(3);
        backend.push_input(b"abc");
        let chr = make_chardev(backend);
        let mut buf = [0u8; 3];

        // Act
        let n = chr.read_all(&mut buf).unwrap();

        // Assert
        assert_eq!(n, 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_read_all_tolerates_exactly_the_retry_budget() {
        // Arrange
        let budget = ReadPolicy::default().transient_retry_limit;
        let within = MemoryBackend::new();
        within.inject_transient_reads(budget);
        within.push_input(b"ok");
        let beyond = MemoryBackend::new();
        beyond.inject_transient_reads(budget + 1);
        beyond.push_input(b"ok");
        let mut buf = [0u8; 2];

        // Act
        let within_n = make_chardev(within).read_all(&mut buf).unwrap();
        let beyond_n = make_chardev(beyond.clone()).read_all(&mut buf).unwrap();

        // Assert
        assert_eq!(within_n, 2);
        assert_eq!(beyond_n, 0, "one failure past the budget gives a short count");
        let mut rest = [0u8; 2];
        assert_eq!(beyond.sync_read(&mut rest), Ok(2), "input was left unread");
    }

    #[test]
    fn test_read_all_stops_at_end_of_stream() {
        let backend = MemoryBackend::new();
        backend.push_input(b"xy");
        backend.close_input();
        let chr = make_chardev(backend);
        let mut buf = [0u8; 8];

        assert_eq!(chr.read_all(&mut buf).unwrap(), 2);
    }

    #[test]
    fn test_read_all_on_write_only_backend_is_zero() {
        struct WriteOnly;
        impl Backend for WriteOnly {
            fn write(&self, buf: &[u8], _blocking: bool) -> Result<usize, ChardevError> {
                Ok(buf.len())
            }
        }
        let host: Arc<dyn ReadinessHost> = Arc::new(MainLoop::new());
        let chr = Chardev::new("wo", WriteOnly, host);
        let mut buf = [0u8; 4];

        assert_eq!(chr.read_all(&mut buf).unwrap(), 0);
    }
}
