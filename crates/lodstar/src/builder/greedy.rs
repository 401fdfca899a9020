//! Greedy breadth-first generation.
//!
//! The root only contains children. Each level splits every frontier
//! octant's unclaimed points over its eight child boxes and lets the
//! aggregation pick what each child keeps, scaled so the most crowded child
//! on the level keeps about `max_part` points. Children that are not leaves
//! form the next frontier.

use glam::DVec3;
use tracing::info;

use lodstar_codec::ParticleRecord;

use super::{BuildParams, BuildStats};
use crate::aggregation::ClaimTable;
use crate::error::Result;
use crate::geometry::Aabb;
use crate::octant::NodeIndex;
use crate::octree::Octree;

pub(super) fn build(
    catalog: Vec<ParticleRecord>,
    params: &BuildParams,
    bounds: Aabb,
    stats: &mut BuildStats,
) -> Result<Octree> {
    let aggregation = params.aggregation();
    let mut tree = Octree::new(bounds);
    let mut claims = ClaimTable::new(catalog.len());
    let mut assigned: Vec<(NodeIndex, Vec<usize>)> = Vec::new();
    let mut frontier: Vec<(NodeIndex, Vec<usize>)> = vec![(Octree::ROOT, (0..catalog.len()).collect())];
    let mut depth = 1;

    while !frontier.is_empty() {
        let mut split: Vec<(NodeIndex, u8, Vec<usize>)> = Vec::new();
        for (node, candidates) in frontier {
            let bounds = *tree[node].bounds();
            let mut buckets: [Vec<usize>; 8] = Default::default();
            for i in candidates.into_iter().filter(|&i| !claims.is_claimed(i)) {
                let slot = bounds.octant_index(DVec3::from_array(catalog[i].position));
                buckets[usize::from(slot)].push(i);
            }
            for (slot, bucket) in (0u8..).zip(buckets) {
                if !bucket.is_empty() {
                    split.push((node, slot, bucket));
                }
            }
        }
        let Some(crowded) = split.iter().map(|(_, _, b)| b.len()).max() else {
            break;
        };
        #[allow(clippy::cast_precision_loss)]
        let fraction = (params.max_part as f64 / crowded as f64).min(1.0);
        info!(
            "Generating level {depth}: {} octants, fraction {fraction:.4}, {} objects left",
            split.len(),
            claims.remaining()
        );

        let mut next = Vec::new();
        for (parent, slot, bucket) in split {
            let child = tree.create_child(parent, slot)?;
            let sample = aggregation.sample(&catalog, &bucket, &mut claims, depth, fraction);
            stats.discarded += sample.discarded as u64;
            let mut retained = sample.retained;

            if depth >= params.max_depth && !sample.is_leaf {
                // Nothing may go deeper; the rest stays here.
                for i in bucket {
                    if claims.claim(i) {
                        retained.push(i);
                    }
                }
            } else if !sample.is_leaf {
                next.push((child, bucket));
            }
            assigned.push((child, retained));
        }
        frontier = next;
        depth += 1;
    }

    let mut records: Vec<Option<ParticleRecord>> = catalog.into_iter().map(Some).collect();
    for (index, members) in assigned {
        let group: Vec<ParticleRecord> = members
            .into_iter()
            .filter_map(|i| records[i].take())
            .collect();
        if !group.is_empty() {
            tree.set_objects(index, group);
        }
    }
    Ok(tree)
}
