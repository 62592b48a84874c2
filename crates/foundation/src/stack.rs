//! Image stack geometry.
//!
//! A stack is a tiled image volume registered in project space. Stack space
//! is measured in pixels along the stack's own axes; the third stack axis is
//! the depth axis (sections). Which project axis becomes the depth axis is
//! decided by the stack orientation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::StackId;
use crate::math::Vec3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Looking along project Z.
    Xy,
    /// Looking along project Y.
    Xz,
    /// Looking along project X.
    Zy,
}

impl Orientation {
    /// Numeric code used by the server (0 = XY, 1 = XZ, 2 = ZY).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Orientation::Xy),
            1 => Some(Orientation::Xz),
            2 => Some(Orientation::Zy),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Orientation::Xy => 0,
            Orientation::Xz => 1,
            Orientation::Zy => 2,
        }
    }

    /// Maps a project-space vector onto stack axes (x, y, depth).
    fn to_stack_axes(self, p: Vec3) -> Vec3 {
        match self {
            Orientation::Xy => Vec3::new(p.x, p.y, p.z),
            Orientation::Xz => Vec3::new(p.x, p.z, p.y),
            Orientation::Zy => Vec3::new(p.z, p.y, p.x),
        }
    }

    fn to_project_axes(self, s: Vec3) -> Vec3 {
        match self {
            Orientation::Xy => Vec3::new(s.x, s.y, s.z),
            Orientation::Xz => Vec3::new(s.x, s.z, s.y),
            Orientation::Zy => Vec3::new(s.z, s.y, s.x),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackError {
    EmptyDimension { axis: usize },
    InvalidResolution { axis: usize, value: f64 },
}

impl std::fmt::Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackError::EmptyDimension { axis } => {
                write!(f, "stack dimension along axis {axis} is zero")
            }
            StackError::InvalidResolution { axis, value } => {
                write!(f, "invalid stack resolution along axis {axis}: {value}")
            }
        }
    }
}

impl std::error::Error for StackError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub id: StackId,
    /// Size in pixels along stack x, y and depth.
    dimension: [u32; 3],
    /// Nanometers per pixel along stack x, y and depth.
    resolution: Vec3,
    /// Project-space offset of the stack origin, in stack axis order.
    translation: Vec3,
    orientation: Orientation,
    max_zoom_level: u32,
    broken_slices: BTreeSet<i64>,
}

impl Stack {
    pub fn new(
        id: StackId,
        dimension: [u32; 3],
        resolution: Vec3,
        translation: Vec3,
        orientation: Orientation,
    ) -> Result<Self, StackError> {
        if let Some(axis) = dimension.iter().position(|&d| d == 0) {
            return Err(StackError::EmptyDimension { axis });
        }
        for (axis, value) in [resolution.x, resolution.y, resolution.z]
            .into_iter()
            .enumerate()
        {
            if !(value.is_finite() && value > 0.0) {
                return Err(StackError::InvalidResolution { axis, value });
            }
        }

        Ok(Self {
            id,
            dimension,
            resolution,
            translation,
            orientation,
            max_zoom_level: 0,
            broken_slices: BTreeSet::new(),
        })
    }

    pub fn with_max_zoom_level(mut self, level: u32) -> Self {
        self.max_zoom_level = level;
        self
    }

    pub fn with_broken_slices(mut self, slices: impl IntoIterator<Item = i64>) -> Self {
        self.broken_slices = slices.into_iter().collect();
        self
    }

    pub fn dimension(&self) -> [u32; 3] {
        self.dimension
    }

    pub fn depth(&self) -> u32 {
        self.dimension[2]
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn max_zoom_level(&self) -> u32 {
        self.max_zoom_level
    }

    /// Pixel size of the stack's x/y plane at a zoom level (level 0 is full
    /// resolution, every level halves it).
    pub fn level_dimension(&self, zoom: u32) -> (u32, u32) {
        let div = 2f64.powi(zoom as i32);
        (
            (self.dimension[0] as f64 / div).ceil() as u32,
            (self.dimension[1] as f64 / div).ceil() as u32,
        )
    }

    /// Unclamped stack-space coordinates of a project-space point.
    pub fn project_to_stack(&self, p: Vec3) -> Vec3 {
        let s = self.orientation.to_stack_axes(p);
        Vec3::new(
            (s.x - self.translation.x) / self.resolution.x,
            (s.y - self.translation.y) / self.resolution.y,
            (s.z - self.translation.z) / self.resolution.z,
        )
    }

    pub fn stack_to_project(&self, s: Vec3) -> Vec3 {
        let scaled = Vec3::new(
            s.x * self.resolution.x + self.translation.x,
            s.y * self.resolution.y + self.translation.y,
            s.z * self.resolution.z + self.translation.z,
        );
        self.orientation.to_project_axes(scaled)
    }

    /// Section index of a project point, which may lie outside the stack.
    pub fn project_to_unclamped_stack_z(&self, p: Vec3) -> i64 {
        self.project_to_stack(p).z.round() as i64
    }

    /// Section index of a project point, clamped into the stack.
    pub fn project_to_stack_z(&self, p: Vec3) -> i64 {
        let max = self.dimension[2] as i64 - 1;
        self.project_to_unclamped_stack_z(p).clamp(0, max)
    }

    /// Section index for a project coordinate along the depth axis only.
    pub fn depth_to_stack_z(&self, depth: f64) -> i64 {
        let s = (depth - self.translation.z) / self.resolution.z;
        (s.round() as i64).clamp(0, self.dimension[2] as i64 - 1)
    }

    /// Project coordinate along this stack's depth axis.
    pub fn depth_of(&self, p: Vec3) -> f64 {
        self.orientation.to_stack_axes(p).z
    }

    /// Returns `p` with its depth coordinate replaced.
    pub fn with_depth(&self, p: Vec3, depth: f64) -> Vec3 {
        let mut s = self.orientation.to_stack_axes(p);
        s.z = depth;
        self.orientation.to_project_axes(s)
    }

    /// Project coordinate along the depth axis for a section index.
    pub fn section_to_depth(&self, section: i64) -> f64 {
        section as f64 * self.resolution.z + self.translation.z
    }

    pub fn is_broken(&self, section: i64) -> bool {
        self.broken_slices.contains(&section)
    }

    /// Signed distance to the closest valid section below `z`, if any.
    pub fn valid_z_distance_before(&self, z: i64) -> Option<i64> {
        (0..z)
            .rev()
            .find(|s| !self.is_broken(*s))
            .map(|s| s - z)
    }

    /// Signed distance to the closest valid section above `z`, if any.
    pub fn valid_z_distance_after(&self, z: i64) -> Option<i64> {
        let depth = self.dimension[2] as i64;
        (z + 1..depth).find(|s| !self.is_broken(*s)).map(|s| s - z)
    }
}

#[cfg(test)]
mod tests {
    use super::{Orientation, Stack, StackError};
    use crate::ids::StackId;
    use crate::math::Vec3;

    fn xy_stack() -> Stack {
        Stack::new(
            StackId(1),
            [2048, 1024, 100],
            Vec3::new(4.0, 4.0, 40.0),
            Vec3::new(0.0, 0.0, 400.0),
            Orientation::Xy,
        )
        .unwrap()
        .with_max_zoom_level(3)
        .with_broken_slices([5, 6])
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let err = Stack::new(
            StackId(1),
            [10, 0, 10],
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::default(),
            Orientation::Xy,
        )
        .unwrap_err();
        assert_eq!(err, StackError::EmptyDimension { axis: 1 });

        let err = Stack::new(
            StackId(1),
            [10, 10, 10],
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::default(),
            Orientation::Xy,
        )
        .unwrap_err();
        assert!(matches!(err, StackError::InvalidResolution { axis: 1, .. }));
    }

    #[test]
    fn project_stack_round_trip_for_xy() {
        let stack = xy_stack();
        let p = Vec3::new(400.0, 80.0, 800.0);
        let s = stack.project_to_stack(p);
        assert_eq!(s, Vec3::new(100.0, 20.0, 10.0));
        assert_eq!(stack.stack_to_project(s), p);
        assert_eq!(stack.project_to_unclamped_stack_z(p), 10);
    }

    #[test]
    fn depth_axis_follows_orientation() {
        let stack = Stack::new(
            StackId(2),
            [100, 100, 100],
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::default(),
            Orientation::Xz,
        )
        .unwrap();
        let p = Vec3::new(1.0, 7.0, 3.0);
        assert_eq!(stack.depth_of(p), 7.0);
        assert_eq!(stack.project_to_stack_z(p), 7);
        assert_eq!(stack.with_depth(p, 9.0), Vec3::new(1.0, 9.0, 3.0));
    }

    #[test]
    fn clamped_section_stays_inside_stack() {
        let stack = xy_stack();
        assert_eq!(stack.project_to_unclamped_stack_z(Vec3::new(0.0, 0.0, 0.0)), -10);
        assert_eq!(stack.project_to_stack_z(Vec3::new(0.0, 0.0, 0.0)), 0);
        assert_eq!(stack.project_to_stack_z(Vec3::new(0.0, 0.0, 1e9)), 99);
    }

    #[test]
    fn valid_distances_skip_broken_slices() {
        let stack = xy_stack();
        assert_eq!(stack.valid_z_distance_after(4), Some(3));
        assert_eq!(stack.valid_z_distance_before(7), Some(-3));
        assert_eq!(stack.valid_z_distance_before(0), None);
        assert_eq!(stack.valid_z_distance_after(99), None);
    }

    #[test]
    fn level_dimension_rounds_up() {
        let stack = xy_stack();
        assert_eq!(stack.level_dimension(0), (2048, 1024));
        assert_eq!(stack.level_dimension(3), (256, 128));
        let odd = Stack::new(
            StackId(3),
            [1001, 3, 1],
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::default(),
            Orientation::Xy,
        )
        .unwrap();
        assert_eq!(odd.level_dimension(1), (501, 2));
    }

    #[test]
    fn orientation_codes_round_trip() {
        for o in [Orientation::Xy, Orientation::Xz, Orientation::Zy] {
            assert_eq!(Orientation::from_code(o.code()), Some(o));
        }
        assert_eq!(Orientation::from_code(9), None);
    }
}
