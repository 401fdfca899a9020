//! Arena-backed octree.
//!
//! All octants are stored in one `Vec` and link to each other by index. The
//! root is always at index 0. Removing an octant only detaches it from its
//! parent; its slot stays allocated but is no longer reachable from the root,
//! and every traversal in this module starts at the root.

use std::ops::Index;
use std::sync::Arc;

use glam::DVec3;
use lodstar_codec::ParticleRecord;

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::id::OctantId;
use crate::octant::{LoadStatus, NodeIndex, ObjectGroup, Octant};

/// Octant and object totals for one depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub octants: u64,
    pub objects: u64,
}

/// Hierarchical spatial index over a point catalog.
#[derive(Debug)]
pub struct Octree {
    nodes: Vec<Octant>,
}

impl Octree {
    /// Arena index of the root.
    pub const ROOT: NodeIndex = 0;

    /// Create a tree holding only an empty root.
    #[must_use]
    pub fn new(bounds: Aabb) -> Self {
        Self {
            nodes: vec![Octant::new(OctantId::ROOT, bounds, Self::ROOT, None)],
        }
    }

    #[must_use]
    pub fn root(&self) -> &Octant {
        &self.nodes[Self::ROOT]
    }

    #[must_use]
    pub fn get(&self, index: NodeIndex) -> Option<&Octant> {
        self.nodes.get(index)
    }

    /// Return the child in `slot`, creating it if missing.
    pub fn create_child(&mut self, parent: NodeIndex, slot: u8) -> Result<NodeIndex> {
        let Some(node) = self.nodes.get(parent) else {
            return Err(Error::InvalidParams {
                detail: format!("no octant at index {parent}"),
            });
        };
        if slot >= 8 {
            return Err(Error::InvalidParams {
                detail: format!("octant slot {slot} out of range"),
            });
        }
        if let Some(existing) = node.child(slot) {
            return Ok(existing);
        }
        let id = node.id.child(slot).ok_or_else(|| Error::InvalidParams {
            detail: format!("octant {} is already at the maximum depth", node.id),
        })?;
        let bounds = node.bounds.child(slot);

        let index = self.nodes.len();
        self.nodes
            .push(Octant::new(id, bounds, index, Some(parent)));
        self.nodes[parent].children[usize::from(slot)] = Some(index);
        self.nodes[parent].own_children += 1;
        let mut current = Some(parent);
        while let Some(i) = current {
            self.nodes[i].recursive_children += 1;
            current = self.nodes[i].parent;
        }
        Ok(index)
    }

    /// Replace the records an octant owns, keeping counts consistent.
    ///
    /// The octant becomes `Loaded` if it now holds records and `NotLoaded`
    /// otherwise, and its stored count follows the new payload.
    pub(crate) fn set_objects(&mut self, index: NodeIndex, records: Vec<ParticleRecord>) {
        let octant = &mut self.nodes[index];
        let count = records.len() as u64;
        let delta = signed(count) - signed(octant.own_objects());
        octant.stored_objects = count;
        if records.is_empty() {
            octant.replace_payload(None);
            octant.set_status(LoadStatus::NotLoaded);
        } else {
            octant.replace_payload(Some(Arc::new(ObjectGroup::new(records))));
            octant.set_status(LoadStatus::Loaded);
        }
        self.touch(index, delta);
    }

    /// Add `delta` to the own count of `index` and to the recursive count of
    /// it and every ancestor.
    ///
    /// Each node is updated atomically on its own; there is no lock over the
    /// whole chain, so concurrent readers may briefly see a partial update.
    pub fn touch(&self, index: NodeIndex, delta: i64) {
        let Some(octant) = self.nodes.get(index) else {
            return;
        };
        octant.add_own(delta);
        let mut current = Some(index);
        while let Some(i) = current {
            let node = &self.nodes[i];
            node.add_recursive(delta);
            current = node.parent;
        }
    }

    /// Detach an octant and its subtree from the tree.
    ///
    /// Returns the payload the octant held.
    pub fn remove(&mut self, index: NodeIndex) -> Result<Option<Arc<ObjectGroup>>> {
        let Some(parent) = self.nodes.get(index).and_then(|o| o.parent) else {
            return Err(Error::InvalidParams {
                detail: format!("octant {index} is the root or already detached"),
            });
        };
        let Some(slot) = self.nodes[parent]
            .children
            .iter()
            .position(|c| *c == Some(index))
        else {
            return Err(Error::Integrity {
                context: "octree",
                detail: format!("octant {index} missing from its parent's slots"),
            });
        };

        let removed = &self.nodes[index];
        let objects = signed(removed.recursive_objects());
        let subtree = removed.recursive_children + 1;
        let payload = removed.replace_payload(None);
        removed.set_status(LoadStatus::NotLoaded);

        self.nodes[index].parent = None;
        let parent_node = &mut self.nodes[parent];
        parent_node.children[slot] = None;
        parent_node.own_children -= 1;
        let mut current = Some(parent);
        while let Some(i) = current {
            let node = &mut self.nodes[i];
            node.recursive_children -= subtree;
            node.add_recursive(-objects);
            current = node.parent;
        }
        Ok(payload)
    }

    /// Locate an octant by id, descending along the id's digits.
    #[must_use]
    pub fn find_octant(&self, id: OctantId) -> Option<NodeIndex> {
        if !id.is_valid() {
            return None;
        }
        id.path()
            .into_iter()
            .try_fold(Self::ROOT, |index, slot| self.nodes[index].child(slot))
    }

    /// Deepest existing octant whose box contains `point`.
    #[must_use]
    pub fn best_octant_containing(&self, point: DVec3) -> Option<NodeIndex> {
        let mut index = Self::ROOT;
        if !self.nodes[index].bounds.contains(point) {
            return None;
        }
        loop {
            let node = &self.nodes[index];
            match node.child(node.bounds.octant_index(point)) {
                Some(child) => index = child,
                None => return Some(index),
            }
        }
    }

    /// Depth of the deepest reachable octant.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.iter().map(Octant::depth).max().unwrap_or(0)
    }

    /// Number of octants reachable from the root.
    #[must_use]
    pub fn num_octants(&self) -> usize {
        self.iter().count()
    }

    /// Number of records in currently attached payloads.
    #[must_use]
    pub fn count_objects(&self) -> u64 {
        self.iter()
            .filter_map(Octant::payload)
            .map(|group| group.len() as u64)
            .sum()
    }

    /// Rederive every count from attached payloads and tree structure.
    pub fn update_counts(&mut self) {
        let order: Vec<NodeIndex> = self.iter().map(Octant::index).collect();
        for &index in order.iter().rev() {
            let node = &self.nodes[index];
            let own = node.payload().map_or(0, |group| group.len() as u64);
            let (objects, children, own_children) =
                node.children()
                    .fold((own, 0, 0), |(objects, children, count), c| {
                        let child = &self.nodes[c];
                        (
                            objects + child.recursive_objects(),
                            children + child.recursive_children,
                            count + 1,
                        )
                    });

            let node = &mut self.nodes[index];
            node.set_counts(own, objects);
            node.own_children = own_children;
            node.recursive_children = own_children + children;
        }
    }

    /// Octant and own-object totals per depth.
    #[must_use]
    pub fn stats(&self) -> Vec<LevelStats> {
        let mut levels: Vec<LevelStats> = Vec::new();
        for octant in self.iter() {
            let depth = octant.depth as usize;
            if levels.len() <= depth {
                levels.resize(depth + 1, LevelStats::default());
            }
            levels[depth].octants += 1;
            levels[depth].objects += octant.own_objects();
        }
        levels
    }

    /// Reachable octants in depth-first pre-order, children in slot order.
    #[must_use]
    pub fn iter(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: vec![Self::ROOT],
        }
    }

    /// Indices from `index` up to and including the root.
    pub fn ancestors(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(self.nodes.get(index).map(Octant::index), |&i| {
            self.nodes[i].parent
        })
    }

    /// Arena slots, including detached ones.
    pub(crate) fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut Octant {
        &mut self.nodes[index]
    }
}

pub(crate) fn signed(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl Index<NodeIndex> for Octree {
    type Output = Octant;

    fn index(&self, index: NodeIndex) -> &Octant {
        &self.nodes[index]
    }
}

/// Depth-first iterator over reachable octants.
pub struct DepthFirst<'a> {
    tree: &'a Octree,
    stack: Vec<NodeIndex>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a Octant;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let node = &self.tree.nodes[index];
        self.stack.extend(node.children.iter().rev().flatten());
        Some(node)
    }
}
