//! Axis-aligned boxes and octant-index arithmetic.

use glam::DVec3;

/// Axis-aligned box stored as center and half-size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub center: DVec3,
    pub half_size: DVec3,
}

impl Aabb {
    #[must_use]
    pub fn new(center: DVec3, half_size: DVec3) -> Self {
        Self { center, half_size }
    }

    #[must_use]
    pub fn min(&self) -> DVec3 {
        self.center - self.half_size
    }

    #[must_use]
    pub fn max(&self) -> DVec3 {
        self.center + self.half_size
    }

    /// Radius of the bounding sphere.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.half_size.length()
    }

    /// Closed-interval containment on all three axes.
    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        let (min, max) = (self.min(), self.max());
        point.cmpge(min).all() && point.cmple(max).all()
    }

    /// Index of the child octant a point falls in.
    ///
    /// Bit 2 is set for `x > center.x`, bit 1 for `y`, bit 0 for `z`.
    /// Points on a dividing plane go to the lower half.
    #[must_use]
    pub fn octant_index(&self, point: DVec3) -> u8 {
        let mut index = 0;
        if point.x > self.center.x {
            index |= 0b100;
        }
        if point.y > self.center.y {
            index |= 0b010;
        }
        if point.z > self.center.z {
            index |= 0b001;
        }
        index
    }

    /// Box of the child octant with the given index.
    #[must_use]
    pub fn child(&self, index: u8) -> Self {
        debug_assert!(index < 8);
        let half_size = self.half_size * 0.5;
        let sign = |bit: u8| if index & bit != 0 { 1.0 } else { -1.0 };
        let offset = DVec3::new(sign(0b100), sign(0b010), sign(0b001)) * half_size;
        Self {
            center: self.center + offset,
            half_size,
        }
    }

    /// Smallest cube around the bounding box of `points`.
    ///
    /// Returns `None` for an empty set.
    #[must_use]
    pub fn enclosing_cube(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        let center = (min + max) * 0.5;
        let half = ((max - min) * 0.5).max_element();
        Some(Self {
            center,
            half_size: DVec3::splat(half),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit() -> Aabb {
        Aabb::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn test_octant_index_bits() {
        let b = unit();
        assert_eq!(b.octant_index(DVec3::new(-0.5, -0.5, -0.5)), 0);
        assert_eq!(b.octant_index(DVec3::new(-0.5, -0.5, 0.5)), 1);
        assert_eq!(b.octant_index(DVec3::new(-0.5, 0.5, -0.5)), 2);
        assert_eq!(b.octant_index(DVec3::new(0.5, -0.5, -0.5)), 4);
        assert_eq!(b.octant_index(DVec3::new(0.5, 0.5, 0.5)), 7);
    }

    #[test]
    fn test_ties_go_to_lower_half() {
        assert_eq!(unit().octant_index(DVec3::ZERO), 0);
        assert_eq!(unit().octant_index(DVec3::new(0.0, 0.0, 0.1)), 1);
    }

    #[test]
    fn test_contains_is_closed() {
        let b = unit();
        assert!(b.contains(DVec3::ONE));
        assert!(b.contains(-DVec3::ONE));
        assert!(!b.contains(DVec3::new(1.0 + 1e-9, 0.0, 0.0)));
    }

    #[test]
    fn test_children_tile_parent() {
        let b = Aabb::new(DVec3::new(2.0, 4.0, 6.0), DVec3::splat(2.0));
        let volume: f64 = (0..8)
            .map(|i| {
                let c = b.child(i);
                assert!(b.contains(c.min()) && b.contains(c.max()));
                let size = c.half_size * 2.0;
                size.x * size.y * size.z
            })
            .sum();
        assert!((volume - 64.0).abs() < 1e-9);
        assert_eq!(b.child(7).center, DVec3::new(3.0, 5.0, 7.0));
        assert_eq!(b.child(0).center, DVec3::new(1.0, 3.0, 5.0));
    }

    #[test]
    fn test_enclosing_cube() {
        let cube = Aabb::enclosing_cube([
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(3.0, 1.0, 0.5),
        ])
        .unwrap();
        assert_eq!(cube.center, DVec3::new(1.0, 0.5, 0.25));
        assert_eq!(cube.half_size, DVec3::splat(2.0));
        assert!(Aabb::enclosing_cube(std::iter::empty()).is_none());
    }

    proptest! {
        #[test]
        fn test_point_lands_in_its_child(
            x in -1.0f64..=1.0,
            y in -1.0f64..=1.0,
            z in -1.0f64..=1.0,
        ) {
            let b = unit();
            let p = DVec3::new(x, y, z);
            let child = b.child(b.octant_index(p));
            prop_assert!(child.contains(p));
        }
    }
}
