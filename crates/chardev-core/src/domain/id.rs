//! Thread-safe counter for non-zero identifiers.
//!
//! Watch tokens and frontend ids are handed out from an [`IdCounter`].  Zero
//! is reserved as the "no registration" sentinel, so the counter starts at 1
//! and skips 0 when it wraps.
//!
//! # Thread safety
//!
//! The counter is a single `AtomicU64`.  `fetch_add` reads, increments, and
//! writes in one indivisible step, so two threads calling [`IdCounter::next`]
//! at the same time never receive the same value (until the 64-bit space
//! wraps, which in practice never happens).

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing source of non-zero ids.
///
/// # Examples
///
/// ```rust
/// use chardev_core::IdCounter;
///
/// let counter = IdCounter::new();
/// assert_eq!(counter.next().get(), 1);
/// assert_eq!(counter.next().get(), 2);
/// ```
#[derive(Debug)]
pub struct IdCounter {
    inner: AtomicU64,
}

impl IdCounter {
    /// Creates a new counter whose first id is 1.
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next id and advances the counter.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be unique, they do
    /// not publish any other memory.
    pub fn next(&self) -> NonZeroU64 {
        loop {
            let raw = self.inner.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = NonZeroU64::new(raw) {
                return id;
            }
        }
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
