//! Backend events and readiness conditions.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Out-of-band events a backend delivers to its frontend(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChardevEvent {
    /// The transport is up (peer connected, file opened, ...).
    Opened,
    /// The transport went away.
    Closed,
    /// A serial break was received.
    Break,
    /// This frontend just received multiplexer focus.
    MuxIn,
    /// This frontend just lost multiplexer focus.
    MuxOut,
}

impl ChardevEvent {
    /// Returns the backend open flag implied by this event, if any.
    pub fn open_state(self) -> Option<bool> {
        match self {
            ChardevEvent::Opened => Some(true),
            ChardevEvent::Closed => Some(false),
            _ => None,
        }
    }
}

/// Bit set of readiness conditions a watch can wait for.
///
/// Mirrors the usual poll flags: readable, writable, hang-up, error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WatchCondition(pub u8);

impl WatchCondition {
    pub const NONE: Self = Self(0);
    pub const IN: Self = Self(1 << 0);
    pub const OUT: Self = Self(1 << 1);
    pub const HUP: Self = Self(1 << 2);
    pub const ERR: Self = Self(1 << 3);

    /// Returns `true` if every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit of `other` is set in `self`.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for WatchCondition {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for WatchCondition {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for WatchCondition {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for WatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::IN, "IN"),
            (Self::OUT, "OUT"),
            (Self::HUP, "HUP"),
            (Self::ERR, "ERR"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// What a watch callback wants to happen to its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchControl {
    /// Keep the watch registered.
    Continue,
    /// Retire the watch; the callback will not be invoked again.
    Remove,
}
