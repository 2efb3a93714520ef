//! Infrastructure layer for the chardev stack.
//!
//! Contains the concrete host readiness loop, the in-process transports used
//! by the demo binary and the tests, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `chardev_core`, but MUST NOT be imported by the `application` or domain
//! layers outside of their tests.

pub mod backends;
pub mod main_loop;
pub mod storage;
