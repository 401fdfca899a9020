//! Magnitude-levelled generation.
//!
//! The catalog is sorted brightest first and streamed once. Points are added
//! to the octant containing them at the current level; as soon as any octant
//! on that level holds `max_part` points, every later (fainter) point goes
//! one level deeper. Octants, including missing ancestors, are created
//! lazily on the way down.

use glam::DVec3;
use tracing::{debug, info};

use lodstar_codec::ParticleRecord;

use super::BuildParams;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::id::OctantId;
use crate::octant::NodeIndex;
use crate::octree::Octree;

pub(super) fn build(
    mut catalog: Vec<ParticleRecord>,
    params: &BuildParams,
    bounds: Aabb,
) -> Result<Octree> {
    info!("Sorting catalog with {} objects", catalog.len());
    catalog.sort_by(|a, b| a.appmag.total_cmp(&b.appmag));

    let total = catalog.len();
    let mut tree = Octree::new(bounds);
    let mut pending: Vec<Vec<ParticleRecord>> = vec![Vec::new()];
    let mut level = 0;
    info!("Generating level 0 ({total} objects left)");

    for (placed, record) in catalog.into_iter().enumerate() {
        let point = DVec3::from_array(record.position);
        let index = descend(&mut tree, point, level)?;
        if pending.len() < tree.arena_len() {
            pending.resize_with(tree.arena_len(), Vec::new);
        }
        let list = &mut pending[index];
        list.push(record);

        if level < params.max_depth && list.len() >= params.max_part {
            level += 1;
            info!(
                "Generating level {level} ({} objects left)",
                total - placed - 1
            );
        }
    }

    for (index, records) in pending.into_iter().enumerate() {
        if !records.is_empty() {
            debug!("Octant {} holds {} objects", tree[index].id(), records.len());
            tree.set_objects(index, records);
        }
    }
    Ok(tree)
}

/// Walk down to `level` along `point`'s path, creating octants as needed.
fn descend(tree: &mut Octree, point: DVec3, level: u32) -> Result<NodeIndex> {
    let mut index = Octree::ROOT;
    for _ in 0..level {
        let slot = tree[index].bounds().octant_index(point);
        index = tree.create_child(index, slot)?;
    }

    let expected = position_id(tree.root().bounds(), point, level);
    let computed = tree[index].id();
    if Some(computed) != expected {
        return Err(Error::IdMismatch {
            computed: computed.0,
            expected: expected.map_or(OctantId::NONE.0, |id| id.0),
        });
    }
    Ok(index)
}

/// Id of the octant at `level` containing `point`, computed from boxes alone.
fn position_id(root: &Aabb, point: DVec3, level: u32) -> Option<OctantId> {
    let mut bounds = *root;
    let mut id = OctantId::ROOT;
    for _ in 0..level {
        let slot = bounds.octant_index(point);
        id = id.child(slot)?;
        bounds = bounds.child(slot);
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Generator, build as build_tree};
    use crate::octree::tests::{assert_consistent, record};

    fn params(max_part: usize) -> BuildParams {
        BuildParams {
            generator: Generator::MagnitudeLevelled,
            max_part,
            ..BuildParams::default()
        }
    }

    #[test]
    fn test_levels_follow_magnitude() {
        // Brightest two fill the root, the rest go one level down.
        let catalog = vec![
            record(1, DVec3::new(-4.0, -4.0, -4.0), 5.0),
            record(2, DVec3::new(4.0, 4.0, 4.0), 1.0),
            record(3, DVec3::new(-3.0, -3.0, -3.0), 6.0),
            record(4, DVec3::new(3.0, 3.0, 3.0), 2.0),
        ];
        let out = build_tree(catalog, &params(2)).unwrap();
        let tree = &out.octree;
        assert_consistent(tree);

        let root: Vec<i64> = tree.root().payload().unwrap().records().iter().map(|r| r.id).collect();
        assert_eq!(root, vec![2, 4]);
        let low = tree.find_octant(OctantId(1)).unwrap();
        let ids: Vec<i64> = tree[low].payload().unwrap().records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(out.stats.levels, vec![[1, 2], [1, 2]]);
    }

    #[test]
    fn test_magnitude_never_increases_with_depth() {
        let catalog: Vec<ParticleRecord> = (0..64i32)
            .map(|i| {
                let f = f64::from(i);
                record(
                    i64::from(i),
                    DVec3::new((f * 7.3) % 10.0 - 5.0, (f * 3.1) % 10.0 - 5.0, (f * 1.7) % 10.0 - 5.0),
                    (i % 13) as f32,
                )
            })
            .collect();
        let out = build_tree(catalog, &params(3)).unwrap();
        let tree = &out.octree;
        assert_consistent(tree);

        let mut faintest_by_level = vec![f32::NEG_INFINITY; tree.max_depth() as usize + 1];
        let mut brightest_by_level = vec![f32::INFINITY; tree.max_depth() as usize + 1];
        for octant in tree.iter() {
            if let Some(group) = octant.payload() {
                for r in group.records() {
                    let d = octant.depth() as usize;
                    faintest_by_level[d] = faintest_by_level[d].max(r.appmag);
                    brightest_by_level[d] = brightest_by_level[d].min(r.appmag);
                }
            }
        }
        for d in 1..faintest_by_level.len() {
            if brightest_by_level[d].is_finite() {
                assert!(faintest_by_level[d - 1] <= brightest_by_level[d]);
            }
        }
    }

    #[test]
    fn test_max_depth_lifts_the_cap() {
        let catalog: Vec<ParticleRecord> = (0..10)
            .map(|i| record(i, DVec3::splat(1.0), i as f32))
            .chain(std::iter::once(record(99, DVec3::splat(-1.0), 20.0)))
            .collect();
        let params = BuildParams {
            max_depth: 2,
            ..params(1)
        };
        let out = build_tree(catalog, &params).unwrap();
        assert_eq!(out.octree.max_depth(), 2);
        assert_eq!(out.stats.retained, 11);
        assert_eq!(out.stats.levels[2][1], 9);
    }

    #[test]
    fn test_position_id_matches_descent() {
        let bounds = Aabb::new(DVec3::ZERO, DVec3::splat(8.0));
        let p = DVec3::new(5.0, -1.0, 3.0);
        // x high, y low, z high: slot 5; then within that box x low, z low.
        assert_eq!(position_id(&bounds, p, 1), Some(OctantId(6)));
        let mut tree = Octree::new(bounds);
        let index = descend(&mut tree, p, 3).unwrap();
        assert_eq!(Some(tree[index].id()), position_id(&bounds, p, 3));
        assert_eq!(tree.num_octants(), 4);
    }
}
