//! In-process transports.
//!
//! - **`memory`** – loopback buffers with fault injection; used by the demo
//!   binary and throughout the tests.
//! - **`null`**   – discards every write and never has input.
//!
//! Real transports (sockets, ptys, files) implement the same
//! [`chardev_core::Backend`] trait outside this crate.

pub mod memory;
pub mod null;

use serde::{Deserialize, Serialize};

use chardev_core::Backend;

/// Transport kinds the configuration file can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Null,
}

impl BackendKind {
    /// Builds a fresh transport of this kind.
    pub fn build(self) -> Box<dyn Backend> {
        match self {
            BackendKind::Memory => Box::new(memory::MemoryBackend::new()),
            BackendKind::Null => Box::new(null::NullBackend),
        }
    }
}
