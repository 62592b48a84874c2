//! Which tiles intersect a viewport.

use foundation::math::Vec3;
use foundation::stack::Stack;

/// View state of one stack viewer.
///
/// `xc`/`yc` are the top-left corner in screen pixels at the current scale;
/// `scale` is the zoom level as a (possibly fractional or negative) power of
/// two, 0 being full resolution.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub xc: f64,
    pub yc: f64,
    pub z: i64,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Viewport of `width` x `height` pixels centred on project location `p`.
    pub fn centered_on(stack: &Stack, p: Vec3, scale: f64, width: u32, height: u32) -> Self {
        let s = stack.project_to_stack(p);
        let factor = 2f64.powf(-scale);
        Self {
            xc: (s.x * factor - width as f64 / 2.0).floor(),
            yc: (s.y * factor - height as f64 / 2.0).floor(),
            z: stack.project_to_stack_z(p),
            scale,
            width,
            height,
        }
    }

    /// Same depth and scale; only the offset may differ.
    pub fn is_pan_of(&self, other: &Viewport) -> bool {
        self.z == other.z && self.scale == other.scale
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileInfo {
    pub first_row: i64,
    pub first_col: i64,
    /// Last tile row/column of the stack at `zoom`.
    pub last_row: i64,
    pub last_col: i64,
    /// Image pyramid level the tiles are taken from.
    pub zoom: u32,
    /// Scale factor applied to tiles of `zoom` to reach the view scale.
    pub mag: f64,
}

impl TileInfo {
    pub fn contains(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && row <= self.last_row && col <= self.last_col
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileInfoError {
    InvalidScale(f64),
    EmptyTileSize,
}

impl std::fmt::Display for TileInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileInfoError::InvalidScale(s) => write!(f, "invalid view scale: {s}"),
            TileInfoError::EmptyTileSize => write!(f, "tile width and height must be non-zero"),
        }
    }
}

impl std::error::Error for TileInfoError {}

pub fn compute_tile_info(
    stack: &Stack,
    view: &Viewport,
    tile_width: u32,
    tile_height: u32,
) -> Result<TileInfo, TileInfoError> {
    // Beyond the coarsest level tiles would shrink below their size and the
    // grid would grow without bound.
    if !view.scale.is_finite() || view.scale > stack.max_zoom_level() as f64 {
        return Err(TileInfoError::InvalidScale(view.scale));
    }
    if tile_width == 0 || tile_height == 0 {
        return Err(TileInfoError::EmptyTileSize);
    }

    let zoom = view.scale.ceil().max(0.0) as u32;
    let mag = 2f64.powf(zoom as f64 - view.scale);
    let eff_w = tile_width as f64 * mag;
    let eff_h = tile_height as f64 * mag;
    let (level_w, level_h) = stack.level_dimension(zoom);

    Ok(TileInfo {
        first_row: (view.yc / eff_h).floor() as i64,
        first_col: (view.xc / eff_w).floor() as i64,
        last_row: (level_h as f64 / tile_height as f64).ceil() as i64 - 1,
        last_col: (level_w as f64 / tile_width as f64).ceil() as i64 - 1,
        zoom,
        mag,
    })
}

/// Offset of the tile container so that tile `first_col/first_row` lands at
/// the right screen position. Negative view coordinates wrap the same way as
/// positive ones.
pub fn container_offset(view: &Viewport, info: &TileInfo, tile_width: u32, tile_height: u32) -> (f64, f64) {
    let eff_w = tile_width as f64 * info.mag;
    let eff_h = tile_height as f64 * info.mag;
    (-view.xc.rem_euclid(eff_w), -view.yc.rem_euclid(eff_h))
}

/// Number of tile slots needed to cover `extent` pixels, plus one for the
/// partially visible tile at the edge.
/// Never more than `extent + 1`.
pub fn slots_needed(extent: u32, tile: u32, mag: f64) -> usize {
    let eff = (tile as f64 * mag.min(1.0)).max(1.0);
    ((extent as f64 / eff).ceil() as usize).saturating_add(1)
}
