//! Stack description as served by `{project}/stack/{stack}/info`.

use std::collections::BTreeMap;

use foundation::ids::StackId;
use foundation::math::Vec3;
use foundation::stack::{Orientation, Stack, StackError};
use serde::Deserialize;
use streaming::protocol::{TileSource, TileSourceError};

#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct Xyz<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StackInfo {
    pub sid: StackId,
    #[serde(default)]
    pub title: String,
    pub dimension: Xyz<u32>,
    pub resolution: Xyz<f64>,
    pub translation: Xyz<f64>,
    #[serde(default)]
    pub orientation: u8,
    /// Section number -> flag; only the keys matter.
    #[serde(default)]
    pub broken_slices: BTreeMap<String, serde_json::Value>,
    pub image_base: String,
    pub file_extension: String,
    pub tile_source_type: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub num_zoom_levels: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackInfoError {
    Orientation(u8),
    Stack(StackError),
    TileSource(TileSourceError),
}

impl std::fmt::Display for StackInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackInfoError::Orientation(code) => write!(f, "unknown orientation {code}"),
            StackInfoError::Stack(e) => write!(f, "stack: {e}"),
            StackInfoError::TileSource(e) => write!(f, "tile source: {e}"),
        }
    }
}

impl std::error::Error for StackInfoError {}

impl StackInfo {
    pub fn stack(&self) -> Result<Stack, StackInfoError> {
        let orientation = Orientation::from_code(self.orientation)
            .ok_or(StackInfoError::Orientation(self.orientation))?;
        let t = self.translation;
        let translation = match orientation {
            Orientation::Xy => Vec3::new(t.x, t.y, t.z),
            Orientation::Xz => Vec3::new(t.x, t.z, t.y),
            Orientation::Zy => Vec3::new(t.z, t.y, t.x),
        };
        let stack = Stack::new(
            self.sid,
            [self.dimension.x, self.dimension.y, self.dimension.z],
            Vec3::new(self.resolution.x, self.resolution.y, self.resolution.z),
            translation,
            orientation,
        )
        .map_err(StackInfoError::Stack)?;
        let broken = self
            .broken_slices
            .keys()
            .filter_map(|k| k.trim().parse::<i64>().ok());
        Ok(stack
            .with_max_zoom_level((self.num_zoom_levels - 1).max(0) as u32)
            .with_broken_slices(broken))
    }

    pub fn tile_source(&self) -> Result<TileSource, StackInfoError> {
        TileSource::from_type(
            self.tile_source_type,
            self.image_base.clone(),
            self.file_extension.clone(),
            self.tile_width,
            self.tile_height,
        )
        .map_err(StackInfoError::TileSource)
    }
}

#[cfg(test)]
mod tests {
    use foundation::ids::StackId;
    use foundation::stack::Orientation;
    use pretty_assertions::assert_eq;

    use super::{StackInfo, StackInfoError};

    const INFO: &str = r#"{
        "sid": 5, "pid": 1, "title": "EM",
        "dimension": {"x": 4096, "y": 4096, "z": 200},
        "resolution": {"x": 4.0, "y": 4.0, "z": 40.0},
        "translation": {"x": 0.0, "y": 0.0, "z": 0.0},
        "orientation": 0,
        "broken_slices": {"12": 1, "13": 1},
        "image_base": "https://tiles.example.org/em/",
        "file_extension": "jpg",
        "tile_source_type": 1,
        "tile_width": 512, "tile_height": 512,
        "num_zoom_levels": 4
    }"#;

    #[test]
    fn builds_stack_and_tile_source() {
        let info: StackInfo = serde_json::from_str(INFO).unwrap();
        let stack = info.stack().unwrap();
        assert_eq!(stack.id, StackId(5));
        assert_eq!(stack.orientation(), Orientation::Xy);
        assert_eq!(stack.max_zoom_level(), 3);
        assert!(stack.is_broken(12));
        assert!(!stack.is_broken(14));
        assert_eq!(info.tile_source().unwrap().tile_width, 512);
    }

    #[test]
    fn rejects_unknown_orientation() {
        let mut info: StackInfo = serde_json::from_str(INFO).unwrap();
        info.orientation = 7;
        assert_eq!(info.stack().unwrap_err(), StackInfoError::Orientation(7));
    }
}
