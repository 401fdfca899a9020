//! Path-derived octant ids.
//!
//! The root is `0`. Each step down appends one decimal digit, the child's
//! octant index plus one, so every digit of a real id lies in `1..=8` and
//! the number of digits is the depth.

use std::fmt;

/// Deepest level whose ids still fit in a `u64`.
pub const MAX_DEPTH: u32 = 19;

/// Stable identifier of an octant, recomputable from its position in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OctantId(pub u64);

impl OctantId {
    pub const ROOT: Self = Self(0);

    /// Sentinel for an absent child. Contains the digits `0` and `9`, so it
    /// is never a valid id.
    pub const NONE: Self = Self(lodstar_codec::NO_CHILD);

    /// Id of the child in slot `index`, or `None` past [`MAX_DEPTH`].
    #[must_use]
    pub fn child(self, index: u8) -> Option<Self> {
        debug_assert!(index < 8);
        if self.depth() >= MAX_DEPTH {
            return None;
        }
        self.0
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(index) + 1))
            .map(Self)
    }

    #[must_use]
    pub fn parent(self) -> Option<Self> {
        (self.0 != 0).then_some(Self(self.0 / 10))
    }

    /// Slot this octant occupies in its parent.
    #[must_use]
    pub fn index_in_parent(self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        u8::try_from(self.0 % 10).ok()?.checked_sub(1)
    }

    #[must_use]
    pub fn depth(self) -> u32 {
        if self.0 == 0 {
            0
        } else {
            self.0.ilog10() + 1
        }
    }

    /// Octant indices from the root down to this octant.
    #[must_use]
    pub fn path(self) -> Vec<u8> {
        let mut path = Vec::with_capacity(self.depth() as usize);
        let mut id = self;
        while let Some(index) = id.index_in_parent() {
            path.push(index);
            id = Self(id.0 / 10);
        }
        path.reverse();
        path
    }

    /// Build an id from a root-first path of octant indices.
    #[must_use]
    pub fn from_path(path: &[u8]) -> Option<Self> {
        path.iter()
            .try_fold(Self::ROOT, |id, &index| (index < 8).then(|| id.child(index))?)
    }

    /// Whether this value could have been produced by [`OctantId::child`].
    #[must_use]
    pub fn is_valid(self) -> bool {
        let mut v = self.0;
        while v != 0 {
            if !(1..=8).contains(&(v % 10)) {
                return false;
            }
            v /= 10;
        }
        self.depth() <= MAX_DEPTH
    }
}

impl fmt::Display for OctantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_and_children() {
        assert_eq!(OctantId::ROOT.depth(), 0);
        assert_eq!(OctantId::ROOT.child(0), Some(OctantId(1)));
        assert_eq!(OctantId::ROOT.child(7), Some(OctantId(8)));
        assert_eq!(OctantId(3).child(5), Some(OctantId(36)));
        assert_eq!(OctantId(36).parent(), Some(OctantId(3)));
        assert_eq!(OctantId(36).index_in_parent(), Some(5));
        assert_eq!(OctantId::ROOT.parent(), None);
    }

    #[test]
    fn test_none_is_not_valid() {
        assert!(!OctantId::NONE.is_valid());
        assert!(!OctantId(10).is_valid());
        assert!(!OctantId(19).is_valid());
        assert!(OctantId(18).is_valid());
    }

    #[test]
    fn test_max_depth() {
        let deepest = OctantId::from_path(&[7; MAX_DEPTH as usize]).unwrap();
        assert_eq!(deepest.0, 8_888_888_888_888_888_888);
        assert_eq!(deepest.depth(), MAX_DEPTH);
        assert!(deepest.is_valid());
        assert_eq!(deepest.child(0), None);
    }

    proptest! {
        #[test]
        fn test_path_roundtrip(path in proptest::collection::vec(0u8..8, 0..=MAX_DEPTH as usize)) {
            let id = OctantId::from_path(&path).unwrap();
            prop_assert_eq!(id.depth() as usize, path.len());
            prop_assert_eq!(id.path(), path);
            prop_assert!(id.is_valid());
        }
    }
}
