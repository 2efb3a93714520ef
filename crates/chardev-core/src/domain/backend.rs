//! The backend capability interface.
//!
//! Every transport implements [`Backend`].  Only [`Backend::write`] is
//! mandatory; every other operation has a default body that resolves to
//! [`ChardevError::NotSupported`] or a no-op.  A missing capability is
//! therefore decided once, inside the trait, and callers simply invoke the
//! method and handle the result.

use std::sync::Arc;

use super::error::ChardevError;
use super::event::WatchCondition;
use super::watch::{Pollable, ReadinessHost};

/// Raw descriptor passed alongside a message (ancillary data).
pub type MsgFd = i32;

/// Parity setting for [`SerialParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Line settings for a serial-like backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    pub speed: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            speed: 115_200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}

/// Device-control requests a frontend may forward to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCommand {
    /// Apply line settings.
    SetParams(SerialParams),
    /// Assert (`true`) or clear a serial break.
    SetBreak(bool),
    /// Read the modem control lines.
    GetTiocm,
    /// Write the modem control lines.
    SetTiocm(u32),
}

/// Result of a successful [`IoctlCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlReply {
    Done,
    Tiocm(u32),
}

/// A transport that a frontend can be bound to.
///
/// Implementations must be cheap to call from the I/O thread.  The only
/// methods allowed to block are [`Backend::wait_connected`] and
/// [`Backend::write`] with `blocking = true`.
pub trait Backend: Send + Sync {
    /// Writes as much of `buf` as the transport accepts.
    ///
    /// Returns the number of bytes consumed.  With `blocking = false` an
    /// implementation may return [`ChardevError::Transient`] instead of waiting.
    fn write(&self, buf: &[u8], blocking: bool) -> Result<usize, ChardevError>;

    /// Reads up to `buf.len()` bytes without going through the read watch.
    ///
    /// `Ok(0)` means end of stream.  [`ChardevError::Transient`] means "try
    /// again shortly".
    fn sync_read(&self, _buf: &mut [u8]) -> Result<usize, ChardevError> {
        Err(ChardevError::NotSupported)
    }

    fn ioctl(&self, _cmd: IoctlCommand) -> Result<IoctlReply, ChardevError> {
        Err(ChardevError::NotSupported)
    }

    /// Returns up to `max` descriptors received with the last message.
    fn get_msgfds(&self, _max: usize) -> Result<Vec<MsgFd>, ChardevError> {
        Err(ChardevError::NotSupported)
    }

    /// Queues descriptors to travel with the next write.
    fn set_msgfds(&self, _fds: &[MsgFd]) -> Result<(), ChardevError> {
        Err(ChardevError::NotSupported)
    }

    /// Returns a readiness probe for `condition`, or `None` if the backend
    /// has nothing pollable for it.
    fn add_watch(&self, _condition: WatchCondition) -> Option<Pollable> {
        None
    }

    /// Drops the current peer connection, if the transport has one.
    fn disconnect(&self) -> Result<(), ChardevError> {
        Err(ChardevError::NotSupported)
    }

    fn set_echo(&self, _echo: bool) -> Result<(), ChardevError> {
        Err(ChardevError::NotSupported)
    }

    /// Signals that the frontend can take more input after refusing some.
    fn accept_input(&self) {}

    /// Notifies the backend that its frontend opened or closed.
    fn frontend_open_changed(&self, _open: bool) {}

    /// Lets the backend re-register any private watches on a new host.
    fn refresh_read_handler(&self, _host: &Arc<dyn ReadinessHost>) {}

    /// Blocks until the transport has a peer.  Transports that are always
    /// connected return immediately.
    fn wait_connected(&self) -> Result<(), ChardevError> {
        Ok(())
    }
}

/// Forwards to the boxed transport, so a backend picked at runtime can be
/// handed to anything generic over [`Backend`].
impl Backend for Box<dyn Backend> {
    fn write(&self, buf: &[u8], blocking: bool) -> Result<usize, ChardevError> {
        (**self).write(buf, blocking)
    }

    fn sync_read(&self, buf: &mut [u8]) -> Result<usize, ChardevError> {
        (**self).sync_read(buf)
    }

    fn ioctl(&self, cmd: IoctlCommand) -> Result<IoctlReply, ChardevError> {
        (**self).ioctl(cmd)
    }

    fn get_msgfds(&self, max: usize) -> Result<Vec<MsgFd>, ChardevError> {
        (**self).get_msgfds(max)
    }

    fn set_msgfds(&self, fds: &[MsgFd]) -> Result<(), ChardevError> {
        (**self).set_msgfds(fds)
    }

    fn add_watch(&self, condition: WatchCondition) -> Option<Pollable> {
        (**self).add_watch(condition)
    }

    fn disconnect(&self) -> Result<(), ChardevError> {
        (**self).disconnect()
    }

    fn set_echo(&self, echo: bool) -> Result<(), ChardevError> {
        (**self).set_echo(echo)
    }

    fn accept_input(&self) {
        (**self).accept_input()
    }

    fn frontend_open_changed(&self, open: bool) {
        (**self).frontend_open_changed(open)
    }

    fn refresh_read_handler(&self, host: &Arc<dyn ReadinessHost>) {
        (**self).refresh_read_handler(host)
    }

    fn wait_connected(&self) -> Result<(), ChardevError> {
        (**self).wait_connected()
    }
}
