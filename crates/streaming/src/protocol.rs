//! Tile source URL schemes.
//!
//! A tile source turns a tile address (section, row, column, zoom level) into
//! the URL of an image tile. The scheme is selected by the numeric tile
//! source type registered with a stack on the server.

use serde::{Deserialize, Serialize};

/// Address of one image tile in a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Section index along the depth axis.
    pub section: i64,
    pub row: i64,
    pub col: i64,
    /// Zoom level; 0 is full resolution.
    pub zoom: u32,
}

impl TileCoord {
    pub fn new(section: i64, row: i64, col: i64, zoom: u32) -> Self {
        Self {
            section,
            row,
            col,
            zoom,
        }
    }
}

/// Parameters of the on-the-fly tile combination service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedStacks {
    pub project_id: u64,
    /// `(stack id, threshold, intensity)` per combined stack.
    pub stacks: Vec<(u64, u32, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TileScheme {
    /// Type 1: `{base}{section}/{row}_{col}_{zoom}.{ext}`
    Default,
    /// Type 2: query parameters against a tile request service.
    RequestQuery,
    /// Type 4: `{base}{section}/{zoom}/{row}_{col}.{ext}`
    Backslash,
    /// Type 5: `{base}{zoom}/{section}/{row}/{col}.{ext}`
    LargeData,
    /// Processing service combining several stacks.
    Combined(CombinedStacks),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSourceError {
    UnknownType(u32),
    EmptyTileSize,
}

impl std::fmt::Display for TileSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileSourceError::UnknownType(t) => write!(f, "unknown tile source type: {t}"),
            TileSourceError::EmptyTileSize => write!(f, "tile width and height must be non-zero"),
        }
    }
}

impl std::error::Error for TileSourceError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSource {
    pub scheme: TileScheme,
    pub base_url: String,
    pub file_extension: String,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileSource {
    pub fn new(
        scheme: TileScheme,
        base_url: impl Into<String>,
        file_extension: impl Into<String>,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, TileSourceError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(TileSourceError::EmptyTileSize);
        }
        Ok(Self {
            scheme,
            base_url: base_url.into(),
            file_extension: file_extension.into(),
            tile_width,
            tile_height,
        })
    }

    /// Builds a tile source from the server's numeric tile source type.
    pub fn from_type(
        tile_source_type: u32,
        base_url: impl Into<String>,
        file_extension: impl Into<String>,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, TileSourceError> {
        let scheme = match tile_source_type {
            1 => TileScheme::Default,
            2 => TileScheme::RequestQuery,
            4 => TileScheme::Backslash,
            5 => TileScheme::LargeData,
            other => return Err(TileSourceError::UnknownType(other)),
        };
        Self::new(scheme, base_url, file_extension, tile_width, tile_height)
    }

    /// Stable identifier used to group this source's textures in the cache.
    pub fn cache_namespace(&self) -> String {
        format!("{}#{}x{}", self.base_url, self.tile_width, self.tile_height)
    }

    pub fn tile_url(&self, coord: TileCoord) -> String {
        let base = &self.base_url;
        let ext = &self.file_extension;
        let TileCoord {
            section,
            row,
            col,
            zoom,
        } = coord;
        match &self.scheme {
            TileScheme::Default => format!("{base}{section}/{row}_{col}_{zoom}.{ext}"),
            TileScheme::RequestQuery => {
                let x = col * self.tile_width as i64;
                let y = row * self.tile_height as i64;
                let sep = if base.contains('?') { '&' } else { '?' };
                format!(
                    "{base}{sep}x={x}&y={y}&width={w}&height={h}&row={row}&col={col}&scale={zoom}&z={section}",
                    w = self.tile_width,
                    h = self.tile_height,
                )
            }
            TileScheme::Backslash => format!("{base}{section}/{zoom}/{row}_{col}.{ext}"),
            TileScheme::LargeData => format!("{base}{zoom}/{section}/{row}/{col}.{ext}"),
            TileScheme::Combined(c) => {
                let ids = join(c.stacks.iter().map(|s| s.0.to_string()));
                let thresholds = join(c.stacks.iter().map(|s| s.1.to_string()));
                let intensities = join(c.stacks.iter().map(|s| s.2.to_string()));
                format!(
                    "{base}{project}/stack/{ids}/combine_tiles/{section}/{col}/{row}/{zoom}/{thresholds}/{intensities}/",
                    project = c.project_id,
                )
            }
        }
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::{CombinedStacks, TileCoord, TileScheme, TileSource, TileSourceError};

    fn source(type_id: u32) -> TileSource {
        TileSource::from_type(type_id, "https://tiles.example.org/fafb/", "jpg", 256, 256).unwrap()
    }

    #[test]
    fn file_based_schemes() {
        let c = TileCoord::new(12, 3, 7, 2);
        assert_eq!(
            source(1).tile_url(c),
            "https://tiles.example.org/fafb/12/3_7_2.jpg"
        );
        assert_eq!(
            source(4).tile_url(c),
            "https://tiles.example.org/fafb/12/2/3_7.jpg"
        );
        assert_eq!(
            source(5).tile_url(c),
            "https://tiles.example.org/fafb/2/12/3/7.jpg"
        );
    }

    #[test]
    fn request_scheme_encodes_pixel_window() {
        let url = source(2).tile_url(TileCoord::new(4, 1, 2, 0));
        assert_eq!(
            url,
            "https://tiles.example.org/fafb/?x=512&y=256&width=256&height=256&row=1&col=2&scale=0&z=4"
        );
    }

    #[test]
    fn combined_scheme_lists_all_stacks() {
        let src = TileSource::new(
            TileScheme::Combined(CombinedStacks {
                project_id: 3,
                stacks: vec![(1, 10, 100.0), (2, 20, 50.5)],
            }),
            "/catmaid/",
            "",
            256,
            256,
        )
        .unwrap();
        assert_eq!(
            src.tile_url(TileCoord::new(9, 1, 2, 0)),
            "/catmaid/3/stack/1,2/combine_tiles/9/2/1/0/10,20/100,50.5/"
        );
    }

    #[test]
    fn rejects_unknown_types_and_empty_tiles() {
        assert_eq!(
            TileSource::from_type(3, "", "png", 256, 256).unwrap_err(),
            TileSourceError::UnknownType(3)
        );
        assert_eq!(
            TileSource::from_type(1, "", "png", 0, 256).unwrap_err(),
            TileSourceError::EmptyTileSize
        );
    }
}
