//! Post-process merge of small leaves.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::octant::NodeIndex;
use crate::octree::Octree;

/// Fold leaves holding at most `child_count` objects into parents holding at
/// most `parent_count`, deepest first.
///
/// A parent without objects counts as holding zero. Octants that become
/// leaves because all their children were merged are considered in turn.
/// Surviving octants keep their ids. Returns the number of merged octants and
/// the number of objects they carried.
pub fn merge_small_leaves(
    tree: &mut Octree,
    child_count: usize,
    parent_count: usize,
) -> Result<(u64, u64)> {
    let mut order: Vec<NodeIndex> = tree
        .iter()
        .filter(|o| o.parent().is_some())
        .map(|o| o.index())
        .collect();
    order.sort_by_key(|&i| Reverse(tree[i].depth()));

    let (mut nodes, mut objects) = (0, 0);
    for index in order {
        let octant = &tree[index];
        let Some(parent) = octant.parent() else {
            continue;
        };
        let own = octant.own_objects();
        if !octant.is_leaf()
            || own > child_count as u64
            || tree[parent].own_objects() > parent_count as u64
        {
            continue;
        }

        let mut records = tree[parent]
            .payload()
            .map(|group| group.records().to_vec())
            .unwrap_or_default();
        if let Some(group) = tree.remove(index)? {
            records.extend(Arc::unwrap_or_clone(group).into_records());
        }
        debug!("Merged octant {index} into {parent}");
        tree.set_objects(parent, records);
        nodes += 1;
        objects += own;
    }
    Ok((nodes, objects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Aabb;
    use crate::id::OctantId;
    use crate::octree::tests::{assert_consistent, record};
    use glam::DVec3;

    /// Root with 2 objects, child 1 with 1 object and grandchild 12 with
    /// 1 object, child 8 with 5 objects.
    fn sample_tree() -> Octree {
        let mut tree = Octree::new(Aabb::new(DVec3::ZERO, DVec3::splat(8.0)));
        let a = tree.create_child(Octree::ROOT, 0).unwrap();
        let a1 = tree.create_child(a, 1).unwrap();
        let b = tree.create_child(Octree::ROOT, 7).unwrap();
        tree.set_objects(Octree::ROOT, vec![record(1, DVec3::ZERO, 1.0); 2]);
        tree.set_objects(a, vec![record(2, DVec3::splat(-5.0), 2.0)]);
        tree.set_objects(a1, vec![record(3, DVec3::new(-5.0, -5.0, -3.0), 3.0)]);
        tree.set_objects(b, vec![record(4, DVec3::splat(5.0), 3.0); 5]);
        tree
    }

    #[test]
    fn test_merges_cascade_upwards() {
        let mut tree = sample_tree();
        let (nodes, objects) = merge_small_leaves(&mut tree, 2, 10).unwrap();
        assert_eq!((nodes, objects), (2, 3));
        assert_consistent(&tree);

        assert_eq!(tree.root().own_objects(), 4);
        assert_eq!(tree.root().recursive_objects(), 9);
        assert!(tree.find_octant(OctantId(1)).is_none());
        assert!(tree.find_octant(OctantId(12)).is_none());
        let b = tree.find_octant(OctantId(8)).unwrap();
        assert_eq!(tree[b].own_objects(), 5);
    }

    #[test]
    fn test_parent_limit_blocks_merge() {
        let mut tree = sample_tree();
        let (nodes, _) = merge_small_leaves(&mut tree, 2, 1).unwrap();
        // Only the grandchild fits under its one-object parent.
        assert_eq!(nodes, 1);
        let a = tree.find_octant(OctantId(1)).unwrap();
        assert_eq!(tree[a].own_objects(), 2);
        assert!(tree[a].is_leaf());
        assert_eq!(tree.root().recursive_objects(), 9);
        assert_consistent(&tree);
    }

    #[test]
    fn test_inner_octants_are_never_merged() {
        let mut tree = sample_tree();
        merge_small_leaves(&mut tree, 0, 100).unwrap();
        assert_eq!(tree.num_octants(), 4);
    }
}
