//! NullBackend: accepts and discards every byte.

use chardev_core::{Backend, ChardevError};

/// Sink transport with no input side.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn write(&self, buf: &[u8], _blocking: bool) -> Result<usize, ChardevError> {
        Ok(buf.len())
    }
}
