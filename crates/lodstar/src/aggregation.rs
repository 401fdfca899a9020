//! Policies choosing which points an octant retains.
//!
//! Points are referenced by their position in the catalog slice. A
//! [`ClaimTable`] parallel to the catalog records which points already
//! belong to an octant (or were discarded), so no point is placed twice.

use serde::{Deserialize, Serialize};

use lodstar_codec::ParticleRecord;

/// Which catalog points have been placed or discarded.
#[derive(Debug, Clone)]
pub struct ClaimTable {
    claimed: Vec<bool>,
    remaining: usize,
}

impl ClaimTable {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            claimed: vec![false; len],
            remaining: len,
        }
    }

    #[must_use]
    pub fn is_claimed(&self, index: usize) -> bool {
        self.claimed[index]
    }

    /// Claim a point. Returns `false` if it was already claimed.
    pub fn claim(&mut self, index: usize) -> bool {
        if self.claimed[index] {
            return false;
        }
        self.claimed[index] = true;
        self.remaining -= 1;
        true
    }

    /// Points not yet claimed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// Outcome of sampling one octant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Catalog indices the octant keeps, brightest first.
    pub retained: Vec<usize>,
    /// Points dropped from the dataset altogether.
    pub discarded: usize,
    /// Nothing is left below this octant.
    pub is_leaf: bool,
}

/// Aggregation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Keep the brightest share of the unclaimed points.
    ///
    /// At `max_depth`, or once at most `min_part` points would remain, the
    /// octant becomes a leaf and takes (or, with `discard`, drops) the rest.
    Brightest {
        max_depth: u32,
        min_part: usize,
        discard: bool,
    },
    /// Keep at most `cap` of the brightest unclaimed points.
    BrightestSimple { cap: usize },
}

impl Default for Aggregation {
    fn default() -> Self {
        Self::Brightest {
            max_depth: crate::id::MAX_DEPTH,
            min_part: 0,
            discard: false,
        }
    }
}

impl Aggregation {
    /// Select the points an octant at `depth` retains out of `candidates`.
    ///
    /// Already-claimed candidates are ignored. Retained points, and discarded
    /// ones, are claimed before returning.
    pub fn sample(
        &self,
        catalog: &[ParticleRecord],
        candidates: &[usize],
        claims: &mut ClaimTable,
        depth: u32,
        fraction: f64,
    ) -> Sample {
        let mut unclaimed: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| !claims.is_claimed(i))
            .collect();
        if unclaimed.is_empty() {
            return Sample {
                is_leaf: true,
                ..Sample::default()
            };
        }
        unclaimed.sort_by(|&a, &b| catalog[a].appmag.total_cmp(&catalog[b].appmag));
        let n = unclaimed.len();

        let (retained, discarded, is_leaf) = match *self {
            Self::Brightest {
                max_depth,
                min_part,
                discard,
            } => {
                let k = retain_count(n, fraction);
                if depth >= max_depth || n - k <= min_part {
                    if discard {
                        let dropped = unclaimed.split_off(k);
                        for &i in &dropped {
                            claims.claim(i);
                        }
                        (unclaimed, dropped.len(), true)
                    } else {
                        (unclaimed, 0, true)
                    }
                } else {
                    unclaimed.truncate(k);
                    (unclaimed, 0, k == n)
                }
            }
            Self::BrightestSimple { cap } => {
                unclaimed.truncate(cap);
                let is_leaf = unclaimed.len() == n;
                (unclaimed, 0, is_leaf)
            }
        };

        for &i in &retained {
            claims.claim(i);
        }
        Sample {
            retained,
            discarded,
            is_leaf,
        }
    }
}

/// `round(n * fraction)` clamped to `1..=n`.
fn retain_count(n: usize, fraction: f64) -> usize {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let k = (n as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
    k.clamp(1, n)
}
