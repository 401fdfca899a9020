//! Per-frame visibility traversal.
//!
//! Walks the tree top-down from the root. An octant is expanded only if its
//! bounding sphere subtends a large enough angle and lies (at least partly)
//! in the field of view, so each frame touches a small part of the tree.
//! Visible octants that are not loaded are queued on the loader; loaded
//! ones are touched and handed back as render candidates.
//!
//! # Thresholds
//!
//! Both angle thresholds are scaled by `clamp(fov_factor * 2.5, 0.15, 1)`.
//! Below the first one an octant and its subtree are skipped; between the
//! first and the second the octant fades in when fading is enabled.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::loader::OctantLoader;
use crate::octant::{LoadStatus, NodeIndex, ObjectGroup, Octant, ViewState};
use crate::octree::Octree;

/// Traversal settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityParams {
    /// View angles in radians: `[cull below, fully opaque above]`.
    pub thresholds: [f64; 2],
    /// Fade octants in between the two thresholds.
    pub fade: bool,
    /// Queue visible octants that are not loaded.
    pub load_active: bool,
}

impl Default for VisibilityParams {
    fn default() -> Self {
        let cull = 30f64.to_radians();
        Self {
            thresholds: [cull, cull + 0.4],
            fade: true,
            load_active: true,
        }
    }
}

/// A loaded, observed octant to draw this frame.
#[derive(Debug, Clone)]
pub struct RenderCandidate {
    pub index: NodeIndex,
    pub opacity: f64,
    pub payload: Arc<ObjectGroup>,
}

/// Outcome of one traversal.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    /// Octants whose view state was computed.
    pub visited: usize,
    pub observed_octants: usize,
    /// Objects in the render candidates.
    pub observed_objects: u64,
    /// Requests sent to the loader.
    pub queued: usize,
    pub render: Vec<RenderCandidate>,
}

impl Octree {
    /// Compute visibility for one frame, queueing and touching octants on
    /// `loader` as needed.
    pub fn update_visibility(
        &self,
        camera: &impl Camera,
        loader: &impl OctantLoader,
        params: &VisibilityParams,
    ) -> FrameResult {
        let scale = (camera.fov_factor() * 2.5).clamp(0.15, 1.0);
        let th0 = params.thresholds[0] * scale;
        let th1 = params.thresholds[1] * scale;

        let mut result = FrameResult::default();
        let mut stack: Vec<(NodeIndex, f64)> = vec![(Self::ROOT, 1.0)];
        while let Some((index, parent_opacity)) = stack.pop() {
            let octant = &self[index];
            result.visited += 1;

            let bounds = octant.bounds();
            let radius = bounds.radius();
            let to_center = bounds.center - camera.position();
            let distance = to_center.length();
            let view_angle = 2.0 * (radius / distance).atan();
            if !distance.is_finite() || !view_angle.is_finite() {
                self.set_subtree_unobserved(index);
                continue;
            }

            let payload = octant.payload();
            let focus = payload
                .as_ref()
                .is_some_and(|g| g.records().iter().any(|r| camera.is_focus(r)));
            let mut view = ViewState {
                observed: false,
                view_angle,
                distance,
                opacity: 0.0,
            };

            if view_angle < th0 && !focus {
                octant.set_view(view);
                self.set_children_unobserved(octant);
                continue;
            }

            let observable = distance <= radius
                || camera.direction().angle_between(to_center)
                    < camera.fov_half_angle() + (radius / distance).atan();
            if !observable && !focus {
                octant.set_view(view);
                self.set_children_unobserved(octant);
                continue;
            }

            if octant.status() == LoadStatus::LoadingFailed {
                octant.set_view(view);
                self.set_children_unobserved(octant);
                if params.load_active {
                    loader.queue(octant);
                    result.queued += 1;
                }
                continue;
            }

            let alpha = if params.fade && view_angle < th1 && th1 > th0 {
                ((view_angle - th0) / (th1 - th0)).clamp(0.0, 1.0)
            } else {
                1.0
            };
            view.observed = true;
            view.opacity = parent_opacity * alpha;
            octant.set_view(view);
            result.observed_octants += 1;

            match octant.status() {
                LoadStatus::NotLoaded if params.load_active && octant.stored_objects() > 0 => {
                    loader.queue(octant);
                    result.queued += 1;
                }
                LoadStatus::Loaded => {
                    loader.touch(octant);
                    if let Some(payload) = payload {
                        result.observed_objects += payload.len() as u64;
                        result.render.push(RenderCandidate {
                            index,
                            opacity: view.opacity,
                            payload,
                        });
                    }
                }
                _ => {}
            }

            stack.extend(octant.children().rev().map(|c| (c, view.opacity)));
        }
        result
    }

    /// Mark an octant and everything below it as not observed.
    fn set_subtree_unobserved(&self, index: NodeIndex) {
        let octant = &self[index];
        octant.set_unobserved();
        self.set_children_unobserved(octant);
    }

    /// Clear the observed flag below `octant`.
    ///
    /// Only observed octants can have observed children, so the walk stops
    /// at the first unobserved one on each branch.
    fn set_children_unobserved(&self, octant: &Octant) {
        let mut stack: Vec<NodeIndex> = octant.children().collect();
        while let Some(index) = stack.pop() {
            let child = &self[index];
            if child.view().observed {
                child.set_unobserved();
                stack.extend(child.children());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use glam::DVec3;

    use super::*;
    use crate::camera::PerspectiveCamera;
    use crate::geometry::Aabb;
    use crate::id::OctantId;
    use crate::loader::NoLoader;
    use crate::octree::tests::record;

    #[derive(Default)]
    struct Recorder {
        queued: Mutex<Vec<OctantId>>,
        touched: Mutex<Vec<OctantId>>,
    }

    impl OctantLoader for Recorder {
        fn queue(&self, octant: &Octant) {
            self.queued.lock().unwrap().push(octant.id());
        }

        fn touch(&self, octant: &Octant) {
            self.touched.lock().unwrap().push(octant.id());
        }
    }

    /// Root of half-size 10 at the origin, loaded child 8 (upper corner)
    /// and unloaded child 1 (lower corner) that has a payload on disk.
    fn scene() -> Octree {
        let mut tree = Octree::new(Aabb::new(DVec3::ZERO, DVec3::splat(10.0)));
        let high = tree.create_child(Octree::ROOT, 7).unwrap();
        let low = tree.create_child(Octree::ROOT, 0).unwrap();
        tree.set_objects(Octree::ROOT, vec![record(1, DVec3::ZERO, 0.0)]);
        tree.set_objects(high, vec![record(2, DVec3::splat(5.0), 1.0); 3]);
        tree.node_mut(low).stored_objects = 4;
        tree
    }

    fn sharp() -> VisibilityParams {
        VisibilityParams {
            fade: false,
            ..VisibilityParams::default()
        }
    }

    #[test]
    fn test_inside_root_sees_everything_near() {
        let tree = scene();
        // Inside the upper child, looking towards the lower one.
        let cam = PerspectiveCamera::new(DVec3::new(1.0, 1.0, 1.0), DVec3::NEG_ONE, 60.0);
        let loader = Recorder::default();
        let frame = tree.update_visibility(&cam, &loader, &sharp());

        assert_eq!(frame.visited, 3);
        assert_eq!(frame.observed_octants, 3);
        assert_eq!(frame.observed_objects, 4);
        assert_eq!(frame.render.len(), 2);
        assert_eq!(*loader.queued.lock().unwrap(), vec![OctantId(1)]);
        assert_eq!(
            *loader.touched.lock().unwrap(),
            vec![OctantId::ROOT, OctantId(8)]
        );
        assert!(frame.render.iter().all(|c| (c.opacity - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_small_angle_prunes_subtree() {
        let tree = scene();
        let cam = PerspectiveCamera::looking_at(DVec3::splat(1e6), DVec3::ZERO, 60.0);
        let frame = tree.update_visibility(&cam, &NoLoader, &sharp());
        assert_eq!(frame.visited, 1);
        assert_eq!(frame.observed_octants, 0);
        assert!(frame.render.is_empty());
        assert!(!tree.root().view().observed);
    }

    #[test]
    fn test_behind_camera_is_not_observed() {
        let tree = scene();
        // Outside the root, looking away from it.
        let cam = PerspectiveCamera::new(DVec3::new(0.0, 0.0, 30.0), DVec3::Z, 60.0);
        let frame = tree.update_visibility(&cam, &NoLoader, &sharp());
        assert_eq!(frame.visited, 1);
        assert_eq!(frame.observed_octants, 0);
    }

    #[test]
    fn test_focus_keeps_octant_visible() {
        let tree = scene();
        let cam = PerspectiveCamera::looking_at(DVec3::splat(1e6), DVec3::ZERO, 60.0).with_focus(1);
        let frame = tree.update_visibility(&cam, &NoLoader, &sharp());
        assert_eq!(frame.observed_octants, 1);
        assert_eq!(frame.render.len(), 1);
        assert_eq!(frame.render[0].index, Octree::ROOT);
    }

    #[test]
    fn test_fade_between_thresholds() {
        let tree = scene();
        let radius = tree.root().bounds().radius();
        let params = VisibilityParams {
            thresholds: [0.2, 0.6],
            fade: true,
            load_active: false,
        };
        // fov 40 gives a scale of 1; an angle of 0.4 is halfway.
        let distance = radius / 0.2f64.tan();
        let cam = PerspectiveCamera::looking_at(DVec3::new(0.0, 0.0, -distance), DVec3::ZERO, 40.0);
        let frame = tree.update_visibility(&cam, &NoLoader, &params);

        let root = frame.render.iter().find(|c| c.index == Octree::ROOT).unwrap();
        assert!((root.opacity - 0.5).abs() < 1e-6);
        assert_eq!(frame.queued, 0);
        for c in &frame.render {
            assert!(c.opacity <= root.opacity + 1e-12);
        }
    }

    #[test]
    fn test_unobserved_state_propagates() {
        let tree = scene();
        let near = PerspectiveCamera::new(DVec3::splat(1.0), DVec3::X, 60.0);
        tree.update_visibility(&near, &NoLoader, &sharp());
        let high = tree.find_octant(OctantId(8)).unwrap();
        assert!(tree[high].view().observed);

        let far = PerspectiveCamera::looking_at(DVec3::splat(1e6), DVec3::ZERO, 60.0);
        tree.update_visibility(&far, &NoLoader, &sharp());
        assert!(!tree[high].view().observed);
    }

    #[test]
    fn test_failed_octant_is_requeued_not_rendered() {
        let tree = scene();
        let high = tree.find_octant(OctantId(8)).unwrap();
        tree[high].replace_payload(None);
        tree[high].set_status(LoadStatus::LoadingFailed);

        let cam = PerspectiveCamera::new(DVec3::splat(1.0), DVec3::X, 60.0);
        let loader = Recorder::default();
        let frame = tree.update_visibility(&cam, &loader, &sharp());
        assert!(loader.queued.lock().unwrap().contains(&OctantId(8)));
        assert!(frame.render.iter().all(|c| c.index != high));
        assert!(!tree[high].view().observed);
    }

    #[test]
    fn test_non_finite_camera_is_skipped() {
        let tree = scene();
        let cam = PerspectiveCamera::new(DVec3::splat(f64::NAN), DVec3::X, 60.0);
        let frame = tree.update_visibility(&cam, &NoLoader, &sharp());
        assert_eq!(frame.visited, 1);
        assert_eq!(frame.observed_octants, 0);
    }
}
