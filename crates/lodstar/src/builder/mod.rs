//! Offline octree generation.
//!
//! Two generators partition a catalog into an [`Octree`]:
//!
//! - [`Generator::MagnitudeLevelled`]: streams the catalog brightest first
//!   and fills one level until an octant saturates, then moves one level
//!   down. Every magnitude maps to a level, so there are no popping
//!   artifacts when descending.
//! - [`Generator::GreedyBreadthFirst`]: splits level by level, letting an
//!   [`Aggregation`] choose what each octant keeps. Kept for compatibility
//!   with older datasets.
//!
//! Both optionally finish with a merge pass folding small leaves into their
//! parents.

mod greedy;
mod magnitude;
mod merge;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::info;

use lodstar_codec::ParticleRecord;

use crate::aggregation::Aggregation;
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::id::MAX_DEPTH;
use crate::octree::Octree;

pub use merge::merge_small_leaves;

/// Octree generation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generator {
    #[default]
    MagnitudeLevelled,
    /// Level-by-level sampling. The level fraction and the aggregation's own
    /// leaf rules both limit what an octant keeps.
    GreedyBreadthFirst,
}

/// Aggregation family used by the greedy generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    #[default]
    Brightest,
    BrightestSimple,
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    pub generator: Generator,
    pub aggregation: AggregationKind,
    /// Objects per octant before the magnitude generator moves a level down,
    /// and the per-level budget of the greedy generator.
    pub max_part: usize,
    pub max_depth: u32,
    /// Leftover count at or below which an aggregation octant becomes a leaf.
    pub min_part: usize,
    /// Run the merge pass after generation.
    pub post_process: bool,
    /// Largest leaf the merge pass folds into its parent.
    pub child_count: usize,
    /// Largest parent the merge pass folds leaves into.
    pub parent_count: usize,
    /// Drop leftover points instead of keeping them in leaf octants.
    pub discard: bool,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            generator: Generator::default(),
            aggregation: AggregationKind::default(),
            max_part: 100_000,
            max_depth: MAX_DEPTH,
            min_part: 0,
            post_process: false,
            child_count: 100,
            parent_count: 1000,
            discard: false,
        }
    }
}

impl BuildParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_part == 0 {
            return Err(Error::InvalidParams {
                detail: "max_part must be at least 1".to_string(),
            });
        }
        if self.max_depth > MAX_DEPTH {
            return Err(Error::InvalidParams {
                detail: format!(
                    "max_depth {} exceeds the id limit of {MAX_DEPTH}",
                    self.max_depth
                ),
            });
        }
        Ok(())
    }

    /// Aggregation policy described by these parameters.
    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        match self.aggregation {
            AggregationKind::Brightest => Aggregation::Brightest {
                max_depth: self.max_depth,
                min_part: self.min_part,
                discard: self.discard,
            },
            AggregationKind::BrightestSimple => Aggregation::BrightestSimple {
                cap: self.max_part,
            },
        }
    }
}

/// Summary of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub octants: u64,
    /// Objects placed in the tree.
    pub retained: u64,
    /// Objects dropped by the aggregation.
    pub discarded: u64,
    pub merged_nodes: u64,
    pub merged_objects: u64,
    /// `[octant_count, object_count]` per depth.
    pub levels: Vec<[u64; 2]>,
}

/// Generated tree together with its statistics.
#[derive(Debug)]
pub struct BuildOutput {
    pub octree: Octree,
    pub stats: BuildStats,
}

/// Partition `catalog` into an octree.
pub fn build(catalog: Vec<ParticleRecord>, params: &BuildParams) -> Result<BuildOutput> {
    params.validate()?;
    let bounds = root_bounds(&catalog)?;
    info!(
        "Building octree from {} objects with {:?}",
        catalog.len(),
        params.generator
    );

    let mut stats = BuildStats::default();
    let mut octree = match params.generator {
        Generator::MagnitudeLevelled => magnitude::build(catalog, params, bounds)?,
        Generator::GreedyBreadthFirst => greedy::build(catalog, params, bounds, &mut stats)?,
    };

    if params.post_process {
        info!(
            "Post-processing octree: child_count={}, parent_count={}",
            params.child_count, params.parent_count
        );
        let (nodes, objects) =
            merge_small_leaves(&mut octree, params.child_count, params.parent_count)?;
        stats.merged_nodes = nodes;
        stats.merged_objects = objects;
        info!("Merged {nodes} octants holding {objects} objects");
    }
    octree.update_counts();

    stats.octants = octree.num_octants() as u64;
    stats.retained = octree.root().recursive_objects();
    stats.levels = octree
        .stats()
        .iter()
        .map(|level| [level.octants, level.objects])
        .collect();
    info!(
        "Octree ready: {} octants, {} objects, depth {}",
        stats.octants,
        stats.retained,
        octree.max_depth()
    );

    Ok(BuildOutput { octree, stats })
}

/// Cube around the catalog, rejecting empty or non-finite input.
fn root_bounds(catalog: &[ParticleRecord]) -> Result<Aabb> {
    if let Some(bad) = catalog
        .iter()
        .find(|r| !r.position.iter().all(|v| v.is_finite()))
    {
        return Err(Error::Catalog {
            detail: format!("object {} has a non-finite position", bad.id),
        });
    }
    let mut cube = Aabb::enclosing_cube(catalog.iter().map(|r| DVec3::from_array(r.position)))
        .ok_or_else(|| Error::Catalog {
            detail: "catalog is empty".to_string(),
        })?;
    // Identical points still need a volume to subdivide.
    if cube.half_size.x <= 0.0 {
        cube.half_size = DVec3::ONE;
    }
    Ok(cube)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::octree::tests::{assert_consistent, record};
    use proptest::prelude::*;

    /// Catalog with random positions in a 100-unit cube and random magnitudes.
    pub(crate) fn catalog_strategy() -> impl Strategy<Value = Vec<ParticleRecord>> {
        proptest::collection::vec(
            (-50.0f64..50.0, -50.0f64..50.0, -50.0f64..50.0, -2.0f32..15.0),
            1..200,
        )
        .prop_map(|points| {
            points
                .into_iter()
                .enumerate()
                .map(|(i, (x, y, z, mag))| record(i as i64, DVec3::new(x, y, z), mag))
                .collect()
        })
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(matches!(
            build(Vec::new(), &BuildParams::default()),
            Err(Error::Catalog { .. })
        ));
    }

    #[test]
    fn test_non_finite_position_is_rejected() {
        let catalog = vec![
            record(1, DVec3::ZERO, 1.0),
            record(2, DVec3::new(f64::NAN, 0.0, 0.0), 1.0),
        ];
        assert!(matches!(
            build(catalog, &BuildParams::default()),
            Err(Error::Catalog { .. })
        ));
    }

    #[test]
    fn test_params_are_validated() {
        let params = BuildParams {
            max_part: 0,
            ..BuildParams::default()
        };
        assert!(matches!(
            build(vec![record(1, DVec3::ZERO, 1.0)], &params),
            Err(Error::InvalidParams { .. })
        ));
        let params = BuildParams {
            max_depth: MAX_DEPTH + 1,
            ..BuildParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_single_point() {
        let out = build(vec![record(7, DVec3::splat(3.0), 1.0)], &BuildParams::default()).unwrap();
        assert_eq!(out.octree.num_octants(), 1);
        assert_eq!(out.stats.retained, 1);
        assert!(out.octree.root().bounds().contains(DVec3::splat(3.0)));
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: BuildParams =
            serde_json::from_str(r#"{"generator":"greedy_breadth_first","max_part":10}"#).unwrap();
        assert_eq!(params.generator, Generator::GreedyBreadthFirst);
        assert_eq!(params.max_part, 10);
        assert_eq!(params.parent_count, 1000);
    }

    proptest! {
        #[test]
        fn test_every_point_lands_in_its_box(
            catalog in catalog_strategy(),
            max_part in 1usize..20,
            greedy in any::<bool>(),
            post_process in any::<bool>(),
        ) {
            let params = BuildParams {
                generator: if greedy {
                    Generator::GreedyBreadthFirst
                } else {
                    Generator::MagnitudeLevelled
                },
                max_part,
                max_depth: 8,
                post_process,
                child_count: 3,
                parent_count: 10,
                ..BuildParams::default()
            };
            let n = catalog.len() as u64;
            let out = build(catalog, &params).unwrap();
            let tree = &out.octree;

            assert_consistent(tree);
            prop_assert_eq!(out.stats.retained + out.stats.discarded, n);
            prop_assert_eq!(tree.count_objects(), n);
            for octant in tree.iter() {
                let bounds = octant.bounds();
                let slack = Aabb::new(bounds.center, bounds.half_size * (1.0 + 1e-9) + 1e-9);
                if let Some(group) = octant.payload() {
                    for r in group.records() {
                        prop_assert!(slack.contains(DVec3::from_array(r.position)));
                    }
                }
            }
        }
    }
}
