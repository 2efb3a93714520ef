//! Integration tests for the binding discipline: exclusive binding, mux slot
//! capacity, open-event synthesis, watch revocation on unbind, single live
//! read watch, and the end-to-end write path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chardev_core::{
    ChardevError, ChardevEvent, Pollable, ReadinessHost, SlotTag, WatchCallback, WatchCondition,
    WatchToken, MAX_SLOTS,
};
use chardev_mux::infrastructure::backends::memory::MemoryBackend;
use chardev_mux::infrastructure::main_loop::MainLoop;
use chardev_mux::{CharFrontend, Chardev, Handlers};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn main_loop() -> (Arc<MainLoop>, Arc<dyn ReadinessHost>) {
    let main_loop = Arc::new(MainLoop::new());
    let host: Arc<dyn ReadinessHost> = main_loop.clone();
    (main_loop, host)
}

fn recording_handlers() -> (Handlers, Arc<Mutex<Vec<ChardevEvent>>>, Arc<Mutex<Vec<u8>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let bytes = Arc::new(Mutex::new(Vec::new()));
    let ev = Arc::clone(&events);
    let by = Arc::clone(&bytes);
    let handlers = Handlers::new()
        .on_can_read(|| 64)
        .on_read(move |b| by.lock().unwrap().extend_from_slice(b))
        .on_event(move |e| ev.lock().unwrap().push(e));
    (handlers, events, bytes)
}

/// Host wrapper that records the highest number of simultaneously live
/// registrations it ever saw.
struct RecordingHost {
    inner: MainLoop,
    live: Mutex<HashSet<WatchToken>>,
    max_live: AtomicUsize,
}

impl RecordingHost {
    fn new() -> Self {
        Self {
            inner: MainLoop::new(),
            live: Mutex::new(HashSet::new()),
            max_live: AtomicUsize::new(0),
        }
    }
}

impl ReadinessHost for RecordingHost {
    fn attach(
        &self,
        pollable: Pollable,
        condition: WatchCondition,
        callback: WatchCallback,
    ) -> WatchToken {
        let token = self.inner.attach(pollable, condition, callback);
        let mut live = self.live.lock().unwrap();
        live.insert(token);
        self.max_live.fetch_max(live.len(), Ordering::SeqCst);
        token
    }

    fn remove(&self, token: WatchToken) -> bool {
        self.live.lock().unwrap().remove(&token);
        self.inner.remove(token)
    }

    fn is_live(&self, token: WatchToken) -> bool {
        self.inner.is_live(token)
    }
}

// ── Property 1: exclusive binding ─────────────────────────────────────────────

#[test]
fn test_second_frontend_on_plain_chardev_is_unavailable() {
    // Arrange
    let (_loop, host) = main_loop();
    let chr = Chardev::new("serial0", MemoryBackend::new(), host);
    let mut g = CharFrontend::new();
    let mut f = CharFrontend::new();
    g.bind(&chr).unwrap();

    // Act
    let result = f.bind(&chr);

    // Assert
    assert!(matches!(result, Err(ChardevError::Unavailable { .. })));
    assert_eq!(chr.bound_frontend(), Some(g.id()));
    assert!(!f.backend_connected());
}

// ── Property 2: mux capacity and stable slots ─────────────────────────────────

#[test]
fn test_mux_accepts_max_slots_then_refuses() {
    // Arrange
    let (_loop, host) = main_loop();
    let raw = Chardev::new("raw", MemoryBackend::new(), Arc::clone(&host));
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut frontends: Vec<CharFrontend> = (0..=MAX_SLOTS).map(|_| CharFrontend::new()).collect();

    // Act
    let results: Vec<_> = frontends.iter_mut().map(|fe| fe.bind(&mux)).collect();

    // Assert
    let tags: Vec<SlotTag> = results[..MAX_SLOTS]
        .iter()
        .map(|r| *r.as_ref().expect("within capacity"))
        .collect();
    let distinct: HashSet<SlotTag> = tags.iter().copied().collect();
    assert_eq!(distinct.len(), MAX_SLOTS);
    assert!(matches!(
        results[MAX_SLOTS],
        Err(ChardevError::Unavailable { .. })
    ));

    // Tags stay put when an earlier slot is vacated.
    frontends[0].unbind(false);
    for (fe, tag) in frontends[1..MAX_SLOTS].iter().zip(&tags[1..]) {
        assert_eq!(fe.tag(), *tag);
    }
    assert_eq!(mux.occupied_slots(), tags[1..].to_vec());
}

// ── Property 3: one synthesized Opened ────────────────────────────────────────

#[test]
fn test_set_handlers_on_open_backend_sends_exactly_one_opened() {
    // Arrange
    let (main_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let chr = Chardev::new("serial0", backend.clone(), host);
    chr.be_event(ChardevEvent::Opened);
    let mut fe = CharFrontend::new();
    fe.bind(&chr).unwrap();
    let (handlers, events, bytes) = recording_handlers();

    // Act
    fe.set_handlers(handlers, None, true);
    let after_install = events.lock().unwrap().clone();
    backend.push_input(b"hi");
    main_loop.iterate();

    // Assert
    assert_eq!(after_install, vec![ChardevEvent::Opened]);
    assert_eq!(events.lock().unwrap().as_slice(), &[ChardevEvent::Opened]);
    assert_eq!(bytes.lock().unwrap().as_slice(), b"hi");
}

#[test]
fn test_mux_frontend_gets_one_opened_when_underlying_already_open() {
    // Arrange
    let (_loop, host) = main_loop();
    let raw = Chardev::new("raw", MemoryBackend::new(), Arc::clone(&host));
    raw.be_event(ChardevEvent::Opened);
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut fe = CharFrontend::new();
    fe.bind(&mux).unwrap();
    let (handlers, events, _bytes) = recording_handlers();

    // Act
    fe.set_handlers(handlers, None, true);

    // Assert – focus first, then the open notification from the mux wiring
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[ChardevEvent::MuxIn, ChardevEvent::Opened]
    );
    assert!(mux.is_open());
}

// ── Property 4: unbind revokes the pending watch ──────────────────────────────

#[test]
fn test_unbind_then_pending_signal_invokes_nothing() {
    // Arrange
    let (main_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let chr = Chardev::new("serial0", backend.clone(), host);
    let mut fe = CharFrontend::new();
    fe.bind(&chr).unwrap();
    let (handlers, events, bytes) = recording_handlers();
    fe.set_handlers(handlers, None, true);
    let token = chr.read_watch_token().expect("read watch installed");
    backend.push_input(b"late");

    // Act
    fe.unbind(false);
    main_loop.signal(token, WatchCondition::IN);
    main_loop.iterate();

    // Assert
    assert!(bytes.lock().unwrap().is_empty());
    assert!(events.lock().unwrap().is_empty());
    assert!(!main_loop.is_live(token));
}

// ── Property 5: never two read watches ────────────────────────────────────────

#[test]
fn test_handler_replacement_never_has_two_live_registrations() {
    // Arrange
    let recording = Arc::new(RecordingHost::new());
    let host: Arc<dyn ReadinessHost> = recording.clone();
    let chr = Chardev::new("serial0", MemoryBackend::new(), host);
    let mut fe = CharFrontend::new();
    fe.bind(&chr).unwrap();

    // Act
    for _ in 0..3 {
        fe.set_handlers(Handlers::none(), None, true);
        fe.set_handlers(Handlers::new().on_can_read(|| 1).on_read(|_| {}), None, true);
        fe.set_handlers(Handlers::new().on_can_read(|| 2).on_read(|_| {}), None, true);
    }

    // Assert
    assert_eq!(recording.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(recording.live.lock().unwrap().len(), 1);
}

// ── Property 6: end-to-end write path ─────────────────────────────────────────

#[test]
fn test_write_all_then_unbind_then_write_all() {
    // Arrange
    let (_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let chr = Chardev::new("serial0", backend.clone(), host);
    let mut fe = CharFrontend::new();
    fe.bind(&chr).unwrap();

    // Act
    let first = fe.write_all(b"abc");
    fe.unbind(false);
    let second = fe.write_all(b"x");

    // Assert
    assert_eq!(first, Ok(3));
    assert_eq!(backend.output(), b"abc");
    assert_eq!(second, Ok(0));
    assert!(!chr.has_frontend());
}

// ── Mux delivery ──────────────────────────────────────────────────────────────

#[test]
fn test_mux_routes_input_to_focus_and_events_to_all() {
    // Arrange
    let (main_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let raw = Chardev::new("raw", backend.clone(), Arc::clone(&host));
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut a = CharFrontend::new();
    let mut b = CharFrontend::new();
    let tag_a = a.bind(&mux).unwrap();
    b.bind(&mux).unwrap();
    let (ha, events_a, bytes_a) = recording_handlers();
    let (hb, events_b, bytes_b) = recording_handlers();
    a.set_handlers(ha, None, true);
    b.set_handlers(hb, None, true);

    // Act – b took focus last, so input goes to b
    backend.push_input(b"to-b");
    main_loop.iterate();
    mux.set_focus(tag_a).unwrap();
    backend.push_input(b"to-a");
    main_loop.iterate();
    raw.be_event(ChardevEvent::Break);

    // Assert
    assert_eq!(bytes_b.lock().unwrap().as_slice(), b"to-b");
    assert_eq!(bytes_a.lock().unwrap().as_slice(), b"to-a");
    assert_eq!(
        events_b.lock().unwrap().as_slice(),
        &[ChardevEvent::MuxIn, ChardevEvent::MuxOut, ChardevEvent::Break]
    );
    assert_eq!(
        events_a.lock().unwrap().as_slice(),
        &[
            ChardevEvent::MuxIn,
            ChardevEvent::MuxOut,
            ChardevEvent::MuxIn,
            ChardevEvent::Break
        ]
    );
}

#[test]
fn test_mux_writes_pass_through_from_any_slot() {
    let (_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let raw = Chardev::new("raw", backend.clone(), Arc::clone(&host));
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut a = CharFrontend::new();
    let mut b = CharFrontend::new();
    a.bind(&mux).unwrap();
    b.bind(&mux).unwrap();

    a.write_all(b"one ").unwrap();
    b.write_all(b"two").unwrap();

    assert_eq!(backend.output(), b"one two");
}

#[test]
fn test_detaching_focused_slot_drops_input_until_refocused() {
    // Arrange
    let (main_loop, host) = main_loop();
    let backend = MemoryBackend::new();
    let raw = Chardev::new("raw", backend.clone(), Arc::clone(&host));
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut a = CharFrontend::new();
    let mut b = CharFrontend::new();
    let tag_a = a.bind(&mux).unwrap();
    b.bind(&mux).unwrap();
    let (ha, _events_a, bytes_a) = recording_handlers();
    a.set_handlers(ha, None, true);
    let (hb, _events_b, _bytes_b) = recording_handlers();
    b.set_handlers(hb, None, true);

    // Act
    b.unbind(false);
    assert_eq!(mux.focus(), None);
    backend.push_input(b"lost?");
    main_loop.iterate();
    let before_refocus = bytes_a.lock().unwrap().clone();
    let parked = raw.read_watch_token().is_none() && main_loop.live_count() == 0;
    mux.set_focus(tag_a).unwrap();
    main_loop.iterate();

    // Assert – nothing was delivered while unfocused and the read watch was
    // parked; the queued bytes arrive once a focus exists again
    assert!(before_refocus.is_empty());
    assert!(parked, "read watch must not keep firing without a focus");
    assert_eq!(bytes_a.lock().unwrap().as_slice(), b"lost?");
}

#[test]
fn test_last_interested_slot_leaving_unwires_mux() {
    // Arrange
    let (main_loop, host) = main_loop();
    let raw = Chardev::new("raw", MemoryBackend::new(), Arc::clone(&host));
    let mux = Chardev::new_mux("mux", &raw, host).unwrap();
    let mut fe = CharFrontend::new();
    fe.bind(&mux).unwrap();
    fe.set_handlers(Handlers::new().on_read(|_| {}), None, true);
    assert!(raw.read_watch_token().is_some());

    // Act
    fe.set_handlers(Handlers::none(), None, true);

    // Assert
    assert!(raw.read_watch_token().is_none());
    assert_eq!(main_loop.live_count(), 0);
}
