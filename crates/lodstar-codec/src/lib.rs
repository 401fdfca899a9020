//! Binary encoding of streaming octree datasets.
//!
//! This crate provides pure synchronous encode/decode functions for the two
//! streams that make up a dataset: the octree metadata and the per-octant
//! particle payloads. It knows nothing about files or trees; the `lodstar`
//! crate maps streams to paths and reassembles the hierarchy.
//!
//! # Design principles
//!
//! - **Synchronous**: No threading primitives, callers decide parallelism
//! - **Fallible**: Malformed input is an error, never a panic
//! - **Little-endian**: Every multi-byte value on disk

mod bytes;
mod error;
pub mod legacy;
pub mod metadata;
pub mod particles;

use serde::{Deserialize, Serialize};

pub use error::{DecodeError, DecodeResult};
pub use metadata::{MetadataRecord, NO_CHILD, decode_metadata, write_metadata};
pub use particles::{PayloadEncoding, decode_particles, encode_particles};

/// A single catalog point with its photometric and kinematic attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Cartesian position.
    pub position: [f64; 3],
    /// Velocity vector derived from proper motion and radial velocity.
    #[serde(default)]
    pub velocity: [f32; 3],
    /// Proper motion in right ascension.
    #[serde(default)]
    pub mualpha: f32,
    /// Proper motion in declination.
    #[serde(default)]
    pub mudelta: f32,
    /// Radial velocity.
    #[serde(default)]
    pub radvel: f32,
    /// Apparent magnitude; lower is brighter.
    pub appmag: f32,
    #[serde(default)]
    pub absmag: f32,
    /// Packed color.
    #[serde(default)]
    pub color: f32,
    #[serde(default)]
    pub size: f32,
    /// Hipparcos number, or a non-positive value when unknown.
    #[serde(default)]
    pub hip: i32,
    pub id: i64,
    /// Aliases. Each must be non-empty and free of
    /// [`NAME_SEPARATOR`](crate::particles::NAME_SEPARATOR) to be encodable.
    #[serde(default)]
    pub names: Vec<String>,
}

impl ParticleRecord {
    /// Distance from the origin.
    #[must_use]
    pub fn distance(&self) -> f64 {
        let [x, y, z] = self.position;
        (x * x + y * y + z * z).sqrt()
    }
}
