//! Multiplexer slot tags.
//!
//! A frontend bound to a plain backend always carries slot 0.  A frontend
//! bound to a multiplexer carries the index of the slot it was given at bind
//! time, and keeps it until it is unbound.  Slots are never compacted, so a
//! tag stays valid for as long as the binding lives.

use std::fmt;

/// Maximum number of frontends one multiplexer can fan out to.
pub const MAX_SLOTS: usize = 4;

/// Index of a frontend within its backend's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SlotTag(usize);

impl SlotTag {
    /// The tag every frontend of a non-mux backend receives.
    pub const SINGLE: SlotTag = SlotTag(0);

    /// Returns the tag for `index`, or `None` if it exceeds [`MAX_SLOTS`].
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_SLOTS).then_some(SlotTag(index))
    }

    /// Returns the raw slot index.
    pub fn index(self) -> usize {
        self.0
    }

    /// Iterates every valid tag in ascending order.
    pub fn all() -> impl Iterator<Item = SlotTag> {
        (0..MAX_SLOTS).map(SlotTag)
    }
}

impl fmt::Display for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_indices_below_capacity() {
        for i in 0..MAX_SLOTS {
            assert_eq!(SlotTag::new(i).map(SlotTag::index), Some(i));
        }
    }

    #[test]
    fn test_new_rejects_index_at_capacity() {
        assert!(SlotTag::new(MAX_SLOTS).is_none());
    }

    #[test]
    fn test_all_yields_capacity_tags_in_order() {
        let tags: Vec<usize> = SlotTag::all().map(SlotTag::index).collect();
        assert_eq!(tags, (0..MAX_SLOTS).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_is_slot_zero() {
        assert_eq!(SlotTag::SINGLE.index(), 0);
        assert_eq!(SlotTag::default(), SlotTag::SINGLE);
    }
}
