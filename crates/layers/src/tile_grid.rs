//! Toroidal grid of tile slots.
//!
//! The grid has a fixed number of slots, each bound to one sprite for its
//! whole lifetime. Panning moves the toroidal origin instead of the sprites:
//! the slot at array position `(i, j)` shows logical tile
//! `((i - orig_row) mod rows, (j - orig_col) mod cols)` of the visible window.
//!
//! Every slot is double buffered. A new tile URL is first recorded as
//! `buffered` and only promoted to the displayed `texture` by
//! [`TileGrid::swap_buffers`], so half-loaded tiles never flash.

use gpu::backend::SpriteId;

use crate::tile_info::TileInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct TileSlot {
    pub sprite: SpriteId,
    /// URL of the texture currently shown by the sprite.
    pub texture: Option<String>,
    /// URL waiting to replace `texture` once loaded.
    pub buffered: Option<String>,
    pub visible: bool,
    /// Position inside the tile container, in unmagnified tile pixels.
    pub position: (f64, f64),
}

/// A URL the grid wants loaded, with the logical tile it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub url: String,
    pub row: i64,
    pub col: i64,
    /// Position of the tile in the visible window (0 = first row/column).
    pub window_row: usize,
    pub window_col: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileDiff {
    pub to_load: Vec<TileRequest>,
    /// Buffered URLs no slot is waiting for any more.
    pub stale: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    Empty { rows: usize, cols: usize },
    SpriteCreationFailed,
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::Empty { rows, cols } => write!(f, "tile grid must not be empty ({rows}x{cols})"),
            GridError::SpriteCreationFailed => write!(f, "render backend refused to create a tile sprite"),
        }
    }
}

impl std::error::Error for GridError {}

#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    rows: usize,
    cols: usize,
    tile_width: u32,
    tile_height: u32,
    orig_row: usize,
    orig_col: usize,
    slots: Vec<TileSlot>,
}

impl TileGrid {
    /// Builds a `rows` x `cols` grid, asking `make_sprite` for one sprite per
    /// slot in row-major order.
    pub fn new(
        rows: usize,
        cols: usize,
        tile_width: u32,
        tile_height: u32,
        mut make_sprite: impl FnMut() -> Option<SpriteId>,
    ) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::Empty { rows, cols });
        }
        let mut slots = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                let sprite = make_sprite().ok_or(GridError::SpriteCreationFailed)?;
                slots.push(TileSlot {
                    sprite,
                    texture: None,
                    buffered: None,
                    visible: false,
                    position: (
                        j as f64 * tile_width as f64,
                        i as f64 * tile_height as f64,
                    ),
                });
            }
        }
        Ok(Self {
            rows,
            cols,
            tile_width,
            tile_height,
            orig_row: 0,
            orig_col: 0,
            slots,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn origin(&self) -> (usize, usize) {
        (self.orig_row, self.orig_col)
    }

    pub fn slot(&self, i: usize, j: usize) -> Option<&TileSlot> {
        if i >= self.rows || j >= self.cols {
            return None;
        }
        self.slots.get(i * self.cols + j)
    }

    /// Slots with their array position, row-major.
    pub fn slots(&self) -> impl Iterator<Item = ((usize, usize), &TileSlot)> {
        let cols = self.cols;
        self.slots
            .iter()
            .enumerate()
            .map(move |(k, s)| ((k / cols, k % cols), s))
    }

    pub fn sprites(&self) -> Vec<SpriteId> {
        self.slots.iter().map(|s| s.sprite).collect()
    }

    /// Slots still waiting for a buffered texture.
    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|s| s.buffered.is_some()).count()
    }

    pub fn is_buffered(&self, url: &str) -> bool {
        self.slots.iter().any(|s| s.buffered.as_deref() == Some(url))
    }

    /// Shifts the toroidal origin after a pan of whole tiles.
    pub fn rebase_origin(&mut self, delta_rows: i64, delta_cols: i64) {
        self.orig_row = wrap(self.orig_row as i64 + delta_rows, self.rows);
        self.orig_col = wrap(self.orig_col as i64 + delta_cols, self.cols);
    }

    /// Array position of the slot showing window position `(ti, tj)`.
    pub fn slot_index(&self, ti: usize, tj: usize) -> (usize, usize) {
        ((self.orig_row + ti) % self.rows, (self.orig_col + tj) % self.cols)
    }

    /// Assigns logical tiles to slots and collects the URLs to load.
    ///
    /// Slots whose target differs from their texture are hidden until the
    /// new texture is swapped in. Targets that are already buffered are not
    /// requested again. Slots outside the stack are hidden and drop their
    /// buffer.
    pub fn diff_and_load(
        &mut self,
        info: &TileInfo,
        mut url_for: impl FnMut(i64, i64) -> String,
    ) -> TileDiff {
        let mut diff = TileDiff::default();
        let mut dropped = Vec::new();

        for ti in 0..self.rows {
            let row = info.first_row + ti as i64;
            for tj in 0..self.cols {
                let col = info.first_col + tj as i64;
                let (i, j) = self.slot_index(ti, tj);
                let position = (
                    tj as f64 * self.tile_width as f64,
                    ti as f64 * self.tile_height as f64,
                );
                let slot = &mut self.slots[i * self.cols + j];
                slot.position = position;

                if !info.contains(row, col) {
                    slot.visible = false;
                    dropped.extend(slot.buffered.take());
                    continue;
                }

                let url = url_for(row, col);
                if slot.texture.as_deref() == Some(url.as_str()) {
                    slot.visible = true;
                    dropped.extend(slot.buffered.take());
                    continue;
                }

                slot.visible = false;
                if slot.buffered.as_deref() != Some(url.as_str()) {
                    dropped.extend(slot.buffered.replace(url.clone()));
                    diff.to_load.push(TileRequest {
                        url,
                        row,
                        col,
                        window_row: ti,
                        window_col: tj,
                    });
                }
            }
        }

        dropped.sort();
        dropped.dedup();
        diff.stale = dropped
            .into_iter()
            .filter(|url| !self.is_buffered(url))
            .collect();
        diff
    }

    /// Promotes buffered textures that are loaded, or all of them when
    /// `force` is set. Returns the array positions of promoted slots.
    pub fn swap_buffers(
        &mut self,
        force: bool,
        is_loaded: impl Fn(&str) -> bool,
    ) -> Vec<(usize, usize)> {
        let cols = self.cols;
        let mut promoted = Vec::new();
        for (k, slot) in self.slots.iter_mut().enumerate() {
            let Some(url) = slot.buffered.as_deref() else {
                continue;
            };
            if force || is_loaded(url) {
                slot.texture = slot.buffered.take();
                slot.visible = true;
                promoted.push((k / cols, k % cols));
            }
        }
        promoted
    }

    /// Drops every pending buffer, returning the URLs that were pending.
    pub fn clear_buffers(&mut self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .slots
            .iter_mut()
            .filter_map(|s| s.buffered.take())
            .collect();
        urls.sort();
        urls.dedup();
        urls
    }
}

fn wrap(v: i64, n: usize) -> usize {
    v.rem_euclid(n as i64) as usize
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{GridError, TileGrid};
    use crate::tile_info::TileInfo;
    use foundation::handles::Handle;
    use gpu::backend::SpriteId;

    fn grid(rows: usize, cols: usize) -> TileGrid {
        let mut next = 0;
        TileGrid::new(rows, cols, 256, 256, || {
            next += 1;
            Some(SpriteId(Handle::new(next, 0)))
        })
        .unwrap()
    }

    fn info(first_row: i64, first_col: i64) -> TileInfo {
        TileInfo {
            first_row,
            first_col,
            last_row: 9,
            last_col: 9,
            zoom: 0,
            mag: 1.0,
        }
    }

    fn url(row: i64, col: i64) -> String {
        format!("{row}_{col}")
    }

    #[test]
    fn empty_grid_is_rejected() {
        let err = TileGrid::new(0, 3, 256, 256, || None).unwrap_err();
        assert_eq!(err, GridError::Empty { rows: 0, cols: 3 });
    }

    #[test]
    fn rebase_wraps_in_both_directions() {
        let mut g = grid(3, 4);
        g.rebase_origin(1, -1);
        assert_eq!(g.origin(), (1, 3));
        g.rebase_origin(-4, 9);
        assert_eq!(g.origin(), (0, 0));
    }

    #[test]
    fn diff_requests_each_new_tile_once() {
        let mut g = grid(2, 2);
        let diff = g.diff_and_load(&info(0, 0), url);
        let urls: Vec<_> = diff.to_load.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["0_0", "0_1", "1_0", "1_1"]);
        assert_eq!(g.pending_count(), 4);

        // Same window again: everything is already buffered.
        let diff = g.diff_and_load(&info(0, 0), url);
        assert!(diff.to_load.is_empty());
        assert!(diff.stale.is_empty());
    }

    #[test]
    fn out_of_range_slots_are_hidden_and_unbuffered() {
        let mut g = grid(2, 2);
        g.diff_and_load(&info(-1, 9), url);
        let visible_targets: Vec<_> = g.slots().filter_map(|(_, s)| s.buffered.clone()).collect();
        assert_eq!(visible_targets, vec!["0_9".to_string()]);
        assert!(g.slots().all(|(_, s)| !s.visible));
    }

    #[test]
    fn pan_by_one_tile_reuses_loaded_slots() {
        let mut g = grid(2, 3);
        g.diff_and_load(&info(0, 0), url);
        g.swap_buffers(false, |_| true);
        let before: Vec<_> = g.slots().map(|(_, s)| (s.sprite, s.texture.clone())).collect();

        // Pan right by one column.
        g.rebase_origin(0, 1);
        let diff = g.diff_and_load(&info(0, 1), url);

        let urls: Vec<_> = diff.to_load.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["0_3", "1_3"]);
        // Sprites keep their textures; only the wrapped column gets new ones.
        let kept = g
            .slots()
            .zip(before.iter())
            .filter(|((_, s), (sprite, texture))| s.sprite == *sprite && s.texture == *texture)
            .count();
        assert_eq!(kept, 6);
        let (_, first) = g.slots().next().unwrap();
        assert_eq!(first.buffered.as_deref(), Some("0_3"));
        assert_eq!(first.position, (512.0, 0.0));
    }

    #[test]
    fn replaced_target_reports_stale_buffer() {
        let mut g = grid(1, 1);
        g.diff_and_load(&info(0, 0), url);
        let diff = g.diff_and_load(&info(0, 1), url);
        assert_eq!(diff.to_load.len(), 1);
        assert_eq!(diff.stale, vec!["0_0".to_string()]);
    }

    #[test]
    fn forced_swap_leaves_nothing_pending() {
        let mut g = grid(2, 2);
        g.diff_and_load(&info(0, 0), url);

        let promoted = g.swap_buffers(false, |u| u == "0_1");
        assert_eq!(promoted, vec![(0, 1)]);
        assert_eq!(g.pending_count(), 3);

        let promoted = g.swap_buffers(true, |_| false);
        assert_eq!(promoted.len(), 3);
        assert_eq!(g.pending_count(), 0);
        assert!(g.slots().all(|(_, s)| s.visible && s.texture.is_some()));
    }
}
