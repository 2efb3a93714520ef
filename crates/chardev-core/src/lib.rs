//! # chardev-core
//!
//! Domain types shared by every layer of the character-device binding stack:
//! the error taxonomy, the backend capability interface, inbound events,
//! readiness conditions and watch tokens, multiplexer slot tags, and the
//! interface a host readiness loop must provide.
//!
//! # Architecture overview
//!
//! A *backend* is one physical or virtual transport (a socket, a pty, a
//! file, an in-memory ring).  A *frontend* is a consumer of that transport,
//! typically an emulated device.  The binding layer in `chardev-mux` decides
//! which frontend owns which backend, multiplexes several frontends over one
//! backend, and routes inbound bytes to whichever frontend currently has
//! focus.
//!
//! This crate holds no state machines and performs no I/O.  It only defines
//! the vocabulary:
//!
//! - **`error`** – [`ChardevError`], returned by every fallible operation.
//! - **`backend`** – the [`Backend`] capability trait.  Optional operations
//!   have default bodies that resolve to `NotSupported` or a no-op, so
//!   callers never have to probe for a capability before using it.
//! - **`event`** – [`ChardevEvent`] and the [`WatchCondition`] bit set.
//! - **`watch`** – [`WatchToken`] and the [`ReadinessHost`] interface.
//! - **`slot`** – [`SlotTag`] and the fixed multiplexer capacity.
//! - **`id`** – a non-zero id counter used for tokens and frontend ids.

pub mod domain;

pub use domain::backend::{Backend, IoctlCommand, IoctlReply, MsgFd, Parity, SerialParams};
pub use domain::error::ChardevError;
pub use domain::event::{ChardevEvent, WatchCondition, WatchControl};
pub use domain::id::IdCounter;
pub use domain::slot::{SlotTag, MAX_SLOTS};
pub use domain::watch::{Pollable, ReadinessHost, WatchCallback, WatchToken};
