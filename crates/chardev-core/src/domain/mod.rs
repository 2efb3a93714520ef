//! Domain entities for the character-device binding layer.
//!
//! Nothing in here touches the operating system.  Every type can be built
//! and tested on any platform without a transport or an event loop.

pub mod backend;
pub mod error;
pub mod event;
pub mod id;
pub mod slot;
pub mod watch;
