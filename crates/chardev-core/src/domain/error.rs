//! Error taxonomy for binding and data-path operations.

use thiserror::Error;

use super::slot::SlotTag;

/// Errors returned by chardev binding and passthrough operations.
///
/// None of these are fatal.  Transport failures travel back to the caller as
/// values; the binding layer never terminates the process on its own account.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChardevError {
    /// The backend already has a bound frontend, or the mux slot table is full.
    #[error("device '{label}' is in use")]
    Unavailable { label: String },

    /// The frontend handle is not bound to any backend.
    #[error("missing associated backend")]
    MissingBackend,

    /// The backend does not implement the requested capability.
    #[error("operation not supported by backend")]
    NotSupported,

    /// EAGAIN-class condition; the operation may succeed if retried.
    #[error("backend temporarily not ready")]
    Transient,

    /// The frontend handle is already bound; unbind it first.
    #[error("frontend is already bound to '{0}'")]
    AlreadyBound(String),

    /// The slot index is out of range or holds no frontend.
    #[error("invalid mux slot {0}")]
    InvalidSlot(SlotTag),

    /// No chardev with this label is registered.
    #[error("chardev '{0}' not found")]
    UnknownLabel(String),

    /// A chardev with this label already exists in the registry.
    #[error("chardev '{0}' already exists")]
    DuplicateLabel(String),

    /// The chardev still has a bound frontend and cannot be torn down.
    #[error("chardev '{0}' still has a bound frontend")]
    InUse(String),

    /// A hot swap was rejected by the frontend's change notifier.
    #[error("chardev '{label}' change failed: {reason}")]
    ChangeFailed { label: String, reason: String },

    /// Transport-level failure reported by the backend.
    #[error("backend I/O error: {0}")]
    Io(String),
}

impl ChardevError {
    /// Returns `true` for errors worth retrying after a short pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChardevError::Transient)
    }
}

impl From<std::io::Error> for ChardevError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
                ChardevError::Transient
            }
            std::io::ErrorKind::Unsupported => ChardevError::NotSupported,
            _ => ChardevError::Io(e.to_string()),
        }
    }
}
