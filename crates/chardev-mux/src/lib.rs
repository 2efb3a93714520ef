//! chardev-mux library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`,
//! the benchmarks, and the binary entry point in `main.rs` share the same
//! module tree.
//!
//! # What does this crate do?
//!
//! A *frontend* (an emulated serial port, a console, a monitor) talks to
//! the outside world through a *backend* (a socket, a pty, a file).  This
//! crate owns the bookkeeping between the two:
//!
//! 1. Binding a frontend to a backend, or to one slot of a multiplexer that
//!    shares a single backend between several frontends.
//! 2. Installing and replacing the frontend's callback set without ever
//!    letting a stale callback fire.
//! 3. Bridging backend readiness into a host event loop through revocable
//!    watch tokens.
//! 4. Swapping the backend under a live frontend.

/// Application layer: binding manager, multiplexer, watch bridge.
pub mod application;

/// Infrastructure layer: host loop, concrete test/demo transports, config.
pub mod infrastructure;

pub use application::binding::CharFrontend;
pub use application::chardev::{Chardev, ReadPolicy};
pub use application::handlers::{FrontendId, Handlers};
pub use application::registry::ChardevRegistry;
