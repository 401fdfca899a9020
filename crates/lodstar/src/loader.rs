//! Loader contract driven by the visibility traversal.

use crate::octant::Octant;

/// Receives load requests and usage hints from the frame traversal.
///
/// Both calls are made from the frame thread for every relevant octant on
/// every frame, so implementations must return quickly and do the actual
/// loading elsewhere.
pub trait OctantLoader {
    /// Request the payload of an octant that is visible but not loaded.
    fn queue(&self, octant: &Octant);

    /// Note that a loaded octant is still in use.
    fn touch(&self, octant: &Octant);
}

/// Loader that ignores every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoader;

impl OctantLoader for NoLoader {
    fn queue(&self, _octant: &Octant) {}

    fn touch(&self, _octant: &Octant) {}
}
