//! Streaming spatial index for point catalogs too large to keep in memory.
//!
//! An offline [`builder`] partitions a catalog into an octree whose upper
//! octants hold the brightest objects, so a viewer that only loads what it
//! looks at still sees a plausible sky. The tree is written as one metadata
//! file plus one payload file per octant ([`dataset`]); at runtime the
//! metadata is read into an [`Octree`] skeleton and payloads are pulled in
//! by an [`OctantLoader`] driven by [`Octree::update_visibility`].
//!
//! # Design principles
//!
//! - **Arena tree**: octants live in one `Vec` and refer to each other by
//!   index; ids are derived from the root-to-node path
//! - **Shared at runtime**: the frame thread and loader threads share an
//!   `Arc<Octree>`; counts, status and payloads use per-node atomics and locks
//! - **No global state**: each traversal returns its own [`FrameResult`]
//!
//! # Example
//!
//! ```ignore
//! use lodstar::{BuildParams, NoLoader, PerspectiveCamera, VisibilityParams};
//!
//! let output = lodstar::build(catalog, &BuildParams::default())?;
//! lodstar::dataset::write_dataset(&output.octree, &dir)?;
//!
//! let camera = PerspectiveCamera::looking_at(position, DVec3::ZERO, 45.0);
//! let frame = output
//!     .octree
//!     .update_visibility(&camera, &NoLoader, &VisibilityParams::default());
//! ```

pub mod aggregation;
pub mod builder;
pub mod camera;
pub mod dataset;
mod error;
pub mod geometry;
pub mod id;
pub mod loader;
pub mod octant;
pub mod octree;
pub mod streaming;
pub mod visibility;

pub use aggregation::{Aggregation, ClaimTable, Sample};
pub use builder::{
    AggregationKind, BuildOutput, BuildParams, BuildStats, Generator, build, merge_small_leaves,
};
pub use camera::{Camera, PerspectiveCamera};
pub use error::{Error, Result};
pub use geometry::Aabb;
pub use id::{MAX_DEPTH, OctantId};
pub use loader::{NoLoader, OctantLoader};
pub use octant::{LoadStatus, NodeIndex, ObjectGroup, Octant, ViewState};
pub use octree::{LevelStats, Octree};
pub use streaming::{BatchReport, StreamingConfig, StreamingLoader};
pub use visibility::{FrameResult, RenderCandidate, VisibilityParams};

// Re-export the record type for convenience.
pub use lodstar_codec::ParticleRecord;
