//! MemoryBackend: an in-process loopback transport.
//!
//! Writes land in an output buffer; reads come from an input queue that the
//! owner fills with [`MemoryBackend::push_input`].  The handle is cheap to
//! clone and every clone shares the same buffers, so a test can keep one
//! clone for inspection after moving another into a chardev.
//!
//! Fault injection (transient failures, short chunks, connection errors)
//! lets the bounded retry loops be driven deterministically.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chardev_core::{
    Backend, ChardevError, IoctlCommand, IoctlReply, MsgFd, Pollable, SerialParams,
    WatchCondition,
};

#[derive(Debug, Default)]
struct MemoryState {
    output: Vec<u8>,
    input: VecDeque<u8>,
    eof: bool,

    transient_writes: u32,
    transient_reads: u32,
    write_chunk: Option<usize>,
    read_chunk: Option<usize>,
    fail_connect: bool,

    echo: Option<bool>,
    open_changes: Vec<bool>,
    accept_input_calls: usize,
    disconnects: usize,
    ioctls: Vec<IoctlCommand>,
    params: SerialParams,
    tiocm: u32,
    received_fds: VecDeque<MsgFd>,
    sent_fds: Vec<MsgFd>,
}

/// Shared-buffer transport for the demo binary and the tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Peer side ────────────────────────────────────────────────────────────

    /// Makes `bytes` available to the next reads.
    pub fn push_input(&self, bytes: &[u8]) {
        self.state().input.extend(bytes);
    }

    /// Marks end of stream once the queued input is drained.
    pub fn close_input(&self) {
        self.state().eof = true;
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.state().output.clone()
    }

    /// Descriptors the next `get_msgfds` will hand out.
    pub fn queue_msgfds(&self, fds: &[MsgFd]) {
        self.state().received_fds.extend(fds);
    }

    // ── Fault injection ──────────────────────────────────────────────────────

    /// The next `count` writes fail with `Transient`.
    pub fn inject_transient_writes(&self, count: u32) {
        self.state().transient_writes = count;
    }

    /// The next `count` reads fail with `Transient`.
    pub fn inject_transient_reads(&self, count: u32) {
        self.state().transient_reads = count;
    }

    /// Caps how many bytes a single write accepts.
    pub fn limit_write_chunk(&self, max: usize) {
        self.state().write_chunk = Some(max.max(1));
    }

    /// Caps how many bytes a single read returns.
    pub fn limit_read_chunk(&self, max: usize) {
        self.state().read_chunk = Some(max.max(1));
    }

    /// Makes `wait_connected` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Values passed to `frontend_open_changed`, in order.
    pub fn open_changes(&self) -> Vec<bool> {
        self.state().open_changes.clone()
    }

    pub fn accept_input_calls(&self) -> usize {
        self.state().accept_input_calls
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    /// Last value passed to `set_echo`.
    pub fn echo(&self) -> Option<bool> {
        self.state().echo
    }

    pub fn ioctls(&self) -> Vec<IoctlCommand> {
        self.state().ioctls.clone()
    }

    pub fn params(&self) -> SerialParams {
        self.state().params
    }

    /// Descriptors passed to `set_msgfds`.
    pub fn sent_msgfds(&self) -> Vec<MsgFd> {
        self.state().sent_fds.clone()
    }
}

impl Backend for MemoryBackend {
    fn write(&self, buf: &[u8], _blocking: bool) -> Result<usize, ChardevError> {
        let mut state = self.state();
        if state.transient_writes > 0 {
            state.transient_writes -= 1;
            return Err(ChardevError::Transient);
        }
        let n = state.write_chunk.map_or(buf.len(), |c| c.min(buf.len()));
        state.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn sync_read(&self, buf: &mut [u8]) -> Result<usize, ChardevError> {
        let mut state = self.state();
        if state.transient_reads > 0 {
            state.transient_reads -= 1;
            return Err(ChardevError::Transient);
        }
        if state.input.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(ChardevError::Transient)
            };
        }
        let limit = state.read_chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(limit).min(state.input.len());
        for (dst, src) in buf.iter_mut().zip(state.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn ioctl(&self, cmd: IoctlCommand) -> Result<IoctlReply, ChardevError> {
        let mut state = self.state();
        state.ioctls.push(cmd);
        match cmd {
            IoctlCommand::SetParams(params) => {
                state.params = params;
                Ok(IoctlReply::Done)
            }
            IoctlCommand::SetBreak(_) => Ok(IoctlReply::Done),
            IoctlCommand::GetTiocm => Ok(IoctlReply::Tiocm(state.tiocm)),
            IoctlCommand::SetTiocm(bits) => {
                state.tiocm = bits;
                Ok(IoctlReply::Done)
            }
        }
    }

    fn get_msgfds(&self, max: usize) -> Result<Vec<MsgFd>, ChardevError> {
        let mut state = self.state();
        let n = max.min(state.received_fds.len());
        Ok(state.received_fds.drain(..n).collect())
    }

    fn set_msgfds(&self, fds: &[MsgFd]) -> Result<(), ChardevError> {
        self.state().sent_fds = fds.to_vec();
        Ok(())
    }

    fn add_watch(&self, condition: WatchCondition) -> Option<Pollable> {
        if condition.intersects(WatchCondition::IN) {
            let inner = Arc::clone(&self.inner);
            Some(Box::new(move || {
                let state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                let mut ready = WatchCondition::NONE;
                if !state.input.is_empty() || state.eof {
                    ready |= WatchCondition::IN;
                }
                if state.eof {
                    ready |= WatchCondition::HUP;
                }
                ready
            }))
        } else if condition.intersects(WatchCondition::OUT) {
            Some(Box::new(|| WatchCondition::OUT))
        } else {
            None
        }
    }

    fn disconnect(&self) -> Result<(), ChardevError> {
        self.state().disconnects += 1;
        Ok(())
    }

    fn set_echo(&self, echo: bool) -> Result<(), ChardevError> {
        self.state().echo = Some(echo);
        Ok(())
    }

    fn accept_input(&self) {
        self.state().accept_input_calls += 1;
    }

    fn frontend_open_changed(&self, open: bool) {
        self.state().open_changes.push(open);
    }

    fn wait_connected(&self) -> Result<(), ChardevError> {
        if self.state().fail_connect {
            Err(ChardevError::Io("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}
