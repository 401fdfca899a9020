//! Camera contract consumed by the visibility traversal.

use glam::DVec3;

use lodstar_codec::ParticleRecord;

/// Field of view, in degrees, at which the threshold scale factor is 1.
const REFERENCE_FOV_DEG: f64 = 40.0;

/// What the traversal needs to know about the viewer.
pub trait Camera {
    fn position(&self) -> DVec3;

    /// Unit view direction.
    fn direction(&self) -> DVec3;

    /// Half of the field of view, in radians.
    fn fov_half_angle(&self) -> f64;

    /// Scale applied to the view-angle thresholds, relative to a 40° field of
    /// view.
    fn fov_factor(&self) -> f64 {
        2.0 * self.fov_half_angle().to_degrees() / REFERENCE_FOV_DEG
    }

    /// Whether `record` is the object the camera is following. Octants
    /// holding it are always visited.
    fn is_focus(&self, _record: &ParticleRecord) -> bool {
        false
    }
}

/// Plain perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub position: DVec3,
    pub direction: DVec3,
    pub fov_half_angle: f64,
    /// Id of the followed object.
    pub focus: Option<i64>,
}

impl PerspectiveCamera {
    /// Camera at `position` looking along `direction` with a full field of
    /// view of `fov_deg` degrees.
    #[must_use]
    pub fn new(position: DVec3, direction: DVec3, fov_deg: f64) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
            fov_half_angle: (fov_deg * 0.5).to_radians(),
            focus: None,
        }
    }

    #[must_use]
    pub fn looking_at(position: DVec3, target: DVec3, fov_deg: f64) -> Self {
        Self::new(position, target - position, fov_deg)
    }

    #[must_use]
    pub fn with_focus(mut self, id: i64) -> Self {
        self.focus = Some(id);
        self
    }
}

impl Camera for PerspectiveCamera {
    fn position(&self) -> DVec3 {
        self.position
    }

    fn direction(&self) -> DVec3 {
        self.direction
    }

    fn fov_half_angle(&self) -> f64 {
        self.fov_half_angle
    }

    fn is_focus(&self, record: &ParticleRecord) -> bool {
        self.focus == Some(record.id)
    }
}
