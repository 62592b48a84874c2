//! Image tile layer of a stack viewer.
//!
//! The layer keeps a toroidal [`TileGrid`] of sprites inside one container
//! of its stack's shared render context. Each redraw positions the container,
//! diffs the grid against the visible window and schedules the missing tiles
//! on a [`LoadPipeline`]. Loaded tiles are swapped in as they arrive; a soft
//! deadline forces the swap for tiles that are late or never arrive.

use std::collections::BTreeSet;
use std::rc::Rc;

use foundation::math::Vec3;
use foundation::stack::Stack;
use foundation::time::Time;
use gpu::backend::{BlendMode, ContainerId, FilterKind, RenderBackend};
use gpu::context::{RenderContext, SharedRenderContext};
use runtime::budget::FrameBudget;
use runtime::deadline::Deadline;
use runtime::metrics::Metrics;
use streaming::cache::{CacheError, MemoryBudget};
use streaming::pipeline::{Completion, LoadPipeline, Submitted, TileFetch};
use streaming::protocol::{TileCoord, TileSource};
use streaming::queue::RequestId;

use crate::filters::{self, FilterError, FilterWrapper};
use crate::layer::{Layer, LayerId};
use crate::symbology::LayerStyle;
use crate::tile_grid::{GridError, TileGrid};
use crate::tile_info::{
    TileInfoError, Viewport, compute_tile_info, container_offset, slots_needed,
};

/// Priority of prefetched tiles; visible tiles always come first.
const PREFETCH_PRIORITY: i32 = 1 << 20;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileLayerConfig {
    /// Seconds after which pending tiles are swapped in whether loaded or not.
    pub swap_timeout_s: f64,
    /// Opacity below which the layer is hidden.
    pub opacity_threshold: f64,
    pub max_pending_loads: usize,
    pub texture_budget_bytes: usize,
}

impl Default for TileLayerConfig {
    fn default() -> Self {
        Self {
            swap_timeout_s: 3.0,
            opacity_threshold: 0.02,
            max_pending_loads: 1024,
            texture_budget_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileLayerError {
    TileInfo(TileInfoError),
    Grid(GridError),
    Cache(CacheError),
}

impl std::fmt::Display for TileLayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileLayerError::TileInfo(e) => write!(f, "tile info: {e}"),
            TileLayerError::Grid(e) => write!(f, "tile grid: {e}"),
            TileLayerError::Cache(e) => write!(f, "texture cache: {e}"),
        }
    }
}

impl std::error::Error for TileLayerError {}

impl From<TileInfoError> for TileLayerError {
    fn from(e: TileInfoError) -> Self {
        TileLayerError::TileInfo(e)
    }
}

impl From<GridError> for TileLayerError {
    fn from(e: GridError) -> Self {
        TileLayerError::Grid(e)
    }
}

impl From<CacheError> for TileLayerError {
    fn from(e: CacheError) -> Self {
        TileLayerError::Cache(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedrawReport {
    /// New fetches queued.
    pub requested: usize,
    /// Queued or in-flight fetches cancelled because no slot wants them.
    pub cancelled: usize,
    /// Tiles that could not be queued (load queue full).
    pub dropped: usize,
    pub reinitialized: bool,
    pub rendered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub queued: usize,
    pub cached: usize,
    pub dropped: usize,
}

pub struct TileLayer {
    id: LayerId,
    stack: Stack,
    source: TileSource,
    config: TileLayerConfig,
    context: SharedRenderContext,
    container: ContainerId,
    grid: TileGrid,
    grid_mag: f64,
    pipeline: LoadPipeline,
    swap_deadline: Deadline,
    last_view: Option<Viewport>,
    size: (u32, u32),
    style: LayerStyle,
    filters: Vec<FilterWrapper>,
    pinned: BTreeSet<String>,
    metrics: Metrics,
    needs_redraw: bool,
}

impl std::fmt::Debug for TileLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayer")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("grid", &(self.grid.rows(), self.grid.cols()))
            .field("last_view", &self.last_view)
            .finish_non_exhaustive()
    }
}

impl TileLayer {
    /// Creates the layer on top of its stack's render context.
    pub fn new(
        id: LayerId,
        stack: Stack,
        source: TileSource,
        config: TileLayerConfig,
        context: SharedRenderContext,
        width: u32,
        height: u32,
    ) -> Result<Self, TileLayerError> {
        let rows = slots_needed(height, source.tile_height, 1.0);
        let cols = slots_needed(width, source.tile_width, 1.0);
        let style = LayerStyle::new(1.0, BlendMode::Normal, config.opacity_threshold);

        let (container, grid) = {
            let mut ctx = context.borrow_mut();
            ctx.resize(width, height);
            let container = ctx.backend_mut().create_container();
            ctx.stage_mut().add(container);
            let grid = build_grid(&mut ctx, container, rows, cols, &source, style.blend_mode);
            match grid {
                Ok(grid) => (container, grid),
                Err(e) => {
                    ctx.stage_mut().remove(container);
                    ctx.backend_mut().destroy_container(container);
                    return Err(e.into());
                }
            }
        };

        let pipeline = LoadPipeline::new(
            source.cache_namespace(),
            MemoryBudget::new(config.texture_budget_bytes),
            config.max_pending_loads,
        );

        Ok(Self {
            id,
            stack,
            source,
            config,
            context,
            container,
            grid,
            grid_mag: 1.0,
            pipeline,
            swap_deadline: Deadline::new(),
            last_view: None,
            size: (width, height),
            style,
            filters: Vec::new(),
            pinned: BTreeSet::new(),
            metrics: Metrics::new(),
            needs_redraw: true,
        })
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn tile_source(&self) -> &TileSource {
        &self.source
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn pipeline(&self) -> &LoadPipeline {
        &self.pipeline
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn is_visible(&self) -> bool {
        self.style.visible
    }

    /// Set after a resize until the next redraw.
    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn swap_deadline(&self) -> Option<Time> {
        self.swap_deadline.expires_at()
    }

    /// Brings the grid up to date with `view` and schedules missing tiles.
    pub fn redraw(&mut self, view: Viewport, now: Time) -> Result<RedrawReport, TileLayerError> {
        let (tile_w, tile_h) = (self.source.tile_width, self.source.tile_height);
        let info = compute_tile_info(&self.stack, &view, tile_w, tile_h)?;
        let rows = slots_needed(view.height, tile_h, info.mag);
        let cols = slots_needed(view.width, tile_w, info.mag);
        let mut report = RedrawReport::default();

        let pan_from = self
            .last_view
            .filter(|old| view.is_pan_of(old))
            .filter(|_| rows == self.grid.rows() && cols == self.grid.cols());
        match pan_from {
            Some(old) => {
                let eff_w = tile_w as f64 * info.mag;
                let eff_h = tile_h as f64 * info.mag;
                let old_first_row = (old.yc / eff_h).floor() as i64;
                let old_first_col = (old.xc / eff_w).floor() as i64;
                self.grid.rebase_origin(
                    info.first_row - old_first_row,
                    info.first_col - old_first_col,
                );
            }
            None => {
                report.cancelled += self.reinit_grid(rows, cols)?;
                report.reinitialized = true;
            }
        }
        self.grid_mag = info.mag.min(1.0);

        let (left, top) = container_offset(&view, &info, tile_w, tile_h);
        let source = &self.source;
        let diff = self.grid.diff_and_load(&info, |row, col| {
            source.tile_url(TileCoord::new(view.z, row, col, info.zoom))
        });

        {
            let mut ctx = self.context.borrow_mut();
            let backend = ctx.backend_mut();
            backend.set_container_transform(self.container, left, top, info.mag);
            for (_, slot) in self.grid.slots() {
                backend.set_sprite_position(slot.sprite, slot.position.0, slot.position.1);
                backend.set_sprite_visible(slot.sprite, slot.visible);
            }
        }

        for url in &diff.stale {
            if self.pipeline.cancel(url) {
                report.cancelled += 1;
            }
        }

        let (mid_row, mid_col) = ((rows / 2) as i64, (cols / 2) as i64);
        for req in &diff.to_load {
            let dr = req.window_row as i64 - mid_row;
            let dc = req.window_col as i64 - mid_col;
            let priority = (dr * dr + dc * dc) as i32;
            match self.pipeline.submit(&req.url, priority) {
                Ok(Submitted::Queued(_)) => report.requested += 1,
                Ok(Submitted::Cached | Submitted::Pending) => {}
                Err(_) => report.dropped += 1,
            }
        }
        self.metrics.add("tiles.requested", report.requested as u64);
        self.metrics.add("tiles.cancelled", report.cancelled as u64);
        self.metrics.add("tiles.dropped", report.dropped as u64);

        let same_level = self
            .last_view
            .is_some_and(|old| old.z == view.z && info.zoom as f64 == old.scale.ceil().max(0.0));
        if same_level {
            self.context.borrow_mut().render();
            report.rendered = true;
        }

        if !diff.to_load.is_empty() {
            self.swap_deadline.arm(now, self.config.swap_timeout_s);
            // Tiles already in the cache can be shown right away.
            self.swap_buffers(false);
        }

        self.last_view = Some(view);
        self.needs_redraw = false;
        self.update_gauges();
        Ok(report)
    }

    /// Releases queued fetches to the host, closest to the view centre first.
    pub fn next_loads(&mut self, budget: &mut FrameBudget) -> Vec<TileFetch> {
        let fetches = self.pipeline.next_fetches(budget);
        self.update_gauges();
        fetches
    }

    /// In-flight fetches the host should abort.
    pub fn take_cancelled(&mut self) -> Vec<RequestId> {
        self.pipeline.take_cancelled()
    }

    /// Records a finished fetch and swaps in what is ready. Returns the
    /// number of slots that received a new texture.
    pub fn tile_loaded(&mut self, request: RequestId, bytes: usize) -> Result<usize, TileLayerError> {
        match self.pipeline.complete(request, bytes)? {
            Completion::Discarded => Ok(0),
            Completion::Resident { url, evicted } => {
                {
                    let mut ctx = self.context.borrow_mut();
                    let backend = ctx.backend_mut();
                    backend.upload_texture(&url, bytes);
                    for key in &evicted {
                        backend.release_texture(&key.url);
                    }
                }
                self.metrics.inc("tiles.loaded");
                self.metrics.add("tiles.evicted", evicted.len() as u64);
                Ok(self.swap_buffers(false))
            }
        }
    }

    /// A failed tile stays pending until the swap deadline shows the slot
    /// without it.
    pub fn tile_failed(&mut self, request: RequestId) -> bool {
        let live = self.pipeline.fail(request).is_some();
        if live {
            self.metrics.inc("tiles.failed");
        }
        live
    }

    /// Fires the swap deadline if it expired.
    pub fn tick(&mut self, now: Time) -> usize {
        if !self.swap_deadline.take_expired(now) {
            return 0;
        }
        self.metrics.inc("tiles.forced_swaps");
        self.swap_buffers(true)
    }

    /// Promotes buffered tiles that are loaded, or all of them if `force`.
    pub fn swap_buffers(&mut self, force: bool) -> usize {
        let pipeline = &self.pipeline;
        let promoted = self.grid.swap_buffers(force, |url| pipeline.is_loaded(url));

        if !promoted.is_empty() {
            {
                let mut ctx = self.context.borrow_mut();
                let backend = ctx.backend_mut();
                for &(i, j) in &promoted {
                    if let Some(slot) = self.grid.slot(i, j) {
                        backend.set_sprite_texture(slot.sprite, slot.texture.as_deref());
                        backend.set_sprite_visible(slot.sprite, slot.visible);
                    }
                }
            }
            self.sync_pins();
        }
        if self.grid.pending_count() == 0 {
            self.swap_deadline.clear();
        }
        if force || !promoted.is_empty() {
            self.context.borrow_mut().render();
        }
        self.update_gauges();
        promoted.len()
    }

    pub fn available_blend_modes() -> Vec<&'static str> {
        BlendMode::ALL.iter().map(|m| m.name()).collect()
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.style.blend_mode
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.style.blend_mode = mode;
        let mut ctx = self.context.borrow_mut();
        let backend = ctx.backend_mut();
        for sprite in self.grid.sprites() {
            backend.set_sprite_blend_mode(sprite, mode);
        }
    }

    /// Filters this layer's backend can apply; empty if it cannot filter.
    pub fn available_filters(&self) -> Vec<FilterKind> {
        filters::available_filters(self.context.borrow().backend().supports_filters())
    }

    pub fn filters(&self) -> &[FilterWrapper] {
        &self.filters
    }

    /// Appends a filter to the chain. Returns its index.
    pub fn add_filter(&mut self, filter: FilterWrapper) -> Result<usize, FilterError> {
        if !self.available_filters().contains(&filter.kind()) {
            return Err(FilterError::Unsupported);
        }
        self.filters.push(filter);
        self.sync_filters();
        Ok(self.filters.len() - 1)
    }

    pub fn remove_filter(&mut self, index: usize) -> Result<FilterWrapper, FilterError> {
        self.check_filter_index(index)?;
        let removed = self.filters.remove(index);
        self.sync_filters();
        Ok(removed)
    }

    /// Moves the filter at `from` so that it ends up at index `to`.
    pub fn move_filter(&mut self, from: usize, to: usize) -> Result<(), FilterError> {
        self.check_filter_index(from)?;
        self.check_filter_index(to)?;
        let filter = self.filters.remove(from);
        self.filters.insert(to, filter);
        self.sync_filters();
        Ok(())
    }

    pub fn set_filter_param(&mut self, index: usize, name: &str, value: f64) -> Result<f64, FilterError> {
        self.check_filter_index(index)?;
        let stored = self.filters[index].set_param(name, value)?;
        self.sync_filters();
        Ok(stored)
    }

    /// Keeps the stage order in line with the viewer's layer order: this
    /// layer's container is moved directly below `before`, or to the top.
    ///
    /// Layers of other stacks are ignored; returns whether the stage changed.
    pub fn notify_reorder(&mut self, before: Option<&TileLayer>) -> bool {
        let anchor = match before {
            Some(layer) if !Rc::ptr_eq(&layer.context, &self.context) => return false,
            Some(layer) => Some(layer.container),
            None => None,
        };
        let mut ctx = self.context.borrow_mut();
        let previous = ctx.stage().children().to_vec();
        ctx.stage_mut().move_before(self.container, anchor);
        ctx.stage().children() != previous.as_slice()
    }

    /// Queues every tile needed to show a viewport centred on each location,
    /// at the layer's current size and the given scale.
    pub fn cache_locations(&mut self, locations: &[Vec3], scale: f64) -> Result<CacheReport, TileLayerError> {
        let mut report = CacheReport::default();
        for &p in locations {
            let urls = tile_urls_for_location(&self.stack, &self.source, p, scale, self.size.0, self.size.1)?;
            for url in urls {
                match self.pipeline.submit(&url, PREFETCH_PRIORITY) {
                    Ok(Submitted::Cached) => report.cached += 1,
                    Ok(Submitted::Queued(_) | Submitted::Pending) => report.queued += 1,
                    Err(_) => report.dropped += 1,
                }
            }
        }
        self.metrics.add("tiles.prefetched", report.queued as u64);
        self.update_gauges();
        Ok(report)
    }

    fn check_filter_index(&self, index: usize) -> Result<(), FilterError> {
        if index >= self.filters.len() {
            return Err(FilterError::IndexOutOfRange {
                index,
                len: self.filters.len(),
            });
        }
        Ok(())
    }

    fn sync_filters(&mut self) {
        let specs: Vec<_> = self.filters.iter().map(FilterWrapper::spec).collect();
        let mut ctx = self.context.borrow_mut();
        ctx.backend_mut().set_container_filters(self.container, &specs);
        ctx.render();
    }

    /// Throws away all slots and their sprites. Returns the number of
    /// fetches cancelled with them.
    fn reinit_grid(&mut self, rows: usize, cols: usize) -> Result<usize, TileLayerError> {
        let mut cancelled = 0;
        for url in self.grid.clear_buffers() {
            if self.pipeline.cancel(&url) {
                cancelled += 1;
            }
        }
        let grid = {
            let mut ctx = self.context.borrow_mut();
            build_grid(&mut ctx, self.container, rows, cols, &self.source, self.style.blend_mode)?
        };
        self.grid = grid;
        self.sync_pins();
        self.swap_deadline.clear();
        self.metrics.inc("grid.reinitialized");
        Ok(cancelled)
    }

    /// Textures shown by a slot are pinned in the cache.
    fn sync_pins(&mut self) {
        let shown: BTreeSet<String> = self
            .grid
            .slots()
            .filter_map(|(_, s)| s.texture.clone())
            .collect();
        for url in self.pinned.difference(&shown) {
            self.pipeline.unpin(url);
        }
        for url in shown.difference(&self.pinned) {
            self.pipeline.pin(url);
        }
        self.pinned = shown;
    }

    fn update_gauges(&mut self) {
        self.metrics.set_gauge("tiles.pending", self.grid.pending_count() as i64);
        self.metrics.set_gauge("tiles.queued", self.pipeline.queue_len() as i64);
        self.metrics.set_gauge("tiles.in_flight", self.pipeline.in_flight_len() as i64);
    }
}

impl Layer for TileLayer {
    type Error = TileLayerError;

    fn id(&self) -> LayerId {
        self.id
    }

    fn opacity(&self) -> f64 {
        self.style.opacity
    }

    fn set_opacity(&mut self, opacity: f64) {
        self.style.set_opacity(opacity);
        let mut ctx = self.context.borrow_mut();
        let backend = ctx.backend_mut();
        backend.set_container_alpha(self.container, opacity);
        backend.set_container_visible(self.container, self.style.visible);
    }

    /// Resizes the shared surface only when its size changed, and rebuilds
    /// the grid if it needs a different number of slots.
    fn resize(&mut self, width: u32, height: u32) -> Result<bool, TileLayerError> {
        let resized = self.context.borrow_mut().resize(width, height);
        let rows = slots_needed(height, self.source.tile_height, self.grid_mag);
        let cols = slots_needed(width, self.source.tile_width, self.grid_mag);
        if rows != self.grid.rows() || cols != self.grid.cols() {
            self.reinit_grid(rows, cols)?;
            self.last_view = None;
        }
        self.size = (width, height);
        self.needs_redraw = true;
        Ok(resized)
    }
}

impl Drop for TileLayer {
    fn drop(&mut self) {
        if let Ok(mut ctx) = self.context.try_borrow_mut() {
            ctx.stage_mut().remove(self.container);
            ctx.backend_mut().destroy_container(self.container);
        }
    }
}

/// URLs of the tiles that show a `width` x `height` view centred on `p`.
pub fn tile_urls_for_location(
    stack: &Stack,
    source: &TileSource,
    p: Vec3,
    scale: f64,
    width: u32,
    height: u32,
) -> Result<Vec<String>, TileInfoError> {
    let view = Viewport::centered_on(stack, p, scale, width, height);
    let info = compute_tile_info(stack, &view, source.tile_width, source.tile_height)?;
    let rows = slots_needed(height, source.tile_height, info.mag) as i64;
    let cols = slots_needed(width, source.tile_width, info.mag) as i64;

    let mut urls = Vec::new();
    for row in info.first_row..info.first_row + rows {
        for col in info.first_col..info.first_col + cols {
            if info.contains(row, col) {
                urls.push(source.tile_url(TileCoord::new(view.z, row, col, info.zoom)));
            }
        }
    }
    Ok(urls)
}

fn build_grid(
    ctx: &mut RenderContext,
    container: ContainerId,
    rows: usize,
    cols: usize,
    source: &TileSource,
    blend_mode: BlendMode,
) -> Result<TileGrid, GridError> {
    let backend: &mut dyn RenderBackend = ctx.backend_mut();
    backend.clear_container(container);
    let grid = TileGrid::new(rows, cols, source.tile_width, source.tile_height, || {
        backend.create_sprite(container)
    })?;
    for (_, slot) in grid.slots() {
        backend.set_sprite_position(slot.sprite, slot.position.0, slot.position.1);
        backend.set_sprite_visible(slot.sprite, false);
        backend.set_sprite_blend_mode(slot.sprite, blend_mode);
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::{TileLayer, TileLayerConfig, TileLayerError, tile_urls_for_location};
    use crate::filters::{FilterError, FilterWrapper};
    use crate::layer::{Layer, LayerId};
    use crate::tile_info::{TileInfoError, Viewport};
    use foundation::ids::StackId;
    use foundation::math::Vec3;
    use foundation::stack::{Orientation, Stack};
    use foundation::time::Time;
    use gpu::backend::{BlendMode, FilterKind, RecordingBackend};
    use gpu::context::{RenderContext, SharedRenderContext};
    use runtime::budget::FrameBudget;
    use streaming::protocol::TileSource;

    fn stack() -> Stack {
        Stack::new(
            StackId(1),
            [2048, 2048, 10],
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::default(),
            Orientation::Xy,
        )
        .unwrap()
        .with_max_zoom_level(3)
    }

    fn source() -> TileSource {
        TileSource::from_type(1, "http://tiles/", "jpg", 256, 256).unwrap()
    }

    fn context(backend: RecordingBackend) -> SharedRenderContext {
        Rc::new(RefCell::new(RenderContext::new(Box::new(backend))))
    }

    fn layer_in(ctx: &SharedRenderContext, id: u64) -> TileLayer {
        TileLayer::new(
            LayerId(id),
            stack(),
            source(),
            TileLayerConfig::default(),
            ctx.clone(),
            512,
            512,
        )
        .unwrap()
    }

    fn view(xc: f64, yc: f64, z: i64) -> Viewport {
        Viewport {
            xc,
            yc,
            z,
            scale: 0.0,
            width: 512,
            height: 512,
        }
    }

    fn with_backend<R>(ctx: &SharedRenderContext, f: impl FnOnce(&RecordingBackend) -> R) -> R {
        let ctx = ctx.borrow();
        f(ctx.backend_as::<RecordingBackend>().unwrap())
    }

    #[test]
    fn pure_pans_keep_every_sprite() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap();
        let sprites = layer.grid().sprites();

        let (mut x, mut y) = (0.0, 0.0);
        for step in 1..=8 {
            x += 100.0;
            y += 70.0;
            let report = layer.redraw(view(x, y, 0), Time(step as f64 * 0.1)).unwrap();
            assert!(!report.reinitialized);
            assert_eq!(layer.grid().sprites(), sprites);
        }
        assert_ne!(layer.grid().origin(), (0, 0));
        with_backend(&ctx, |b| assert_eq!(b.sprite_count(), 9));
    }

    #[test]
    fn depth_change_reinitializes_and_cancels() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        let first = layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap();
        assert_eq!(first.requested, 9);
        let sprites = layer.grid().sprites();

        let report = layer.redraw(view(0.0, 0.0, 1), Time(0.5)).unwrap();
        assert!(report.reinitialized);
        assert_eq!(report.cancelled, 9);
        assert_eq!(report.requested, 9);
        assert!(layer.grid().sprites().iter().all(|s| !sprites.contains(s)));
        assert_eq!(layer.grid().origin(), (0, 0));
        assert_eq!(layer.pipeline().queue_len(), 9);
    }

    #[test]
    fn never_loaded_tiles_are_shown_when_the_deadline_fires() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.redraw(view(0.0, 0.0, 0), Time(10.0)).unwrap();
        let fetches = layer.next_loads(&mut FrameBudget::unlimited());
        assert_eq!(fetches.len(), 9);
        assert_eq!(layer.swap_deadline(), Some(Time(13.0)));

        assert_eq!(layer.tick(Time(12.9)), 0);
        assert_eq!(layer.grid().pending_count(), 9);

        assert_eq!(layer.tick(Time(13.0)), 9);
        assert_eq!(layer.grid().pending_count(), 0);
        assert_eq!(layer.swap_deadline(), None);
        with_backend(&ctx, |b| {
            for sprite in layer.grid().sprites() {
                let s = b.sprite(sprite).unwrap();
                assert!(s.visible);
                assert!(s.texture.is_some());
            }
        });
        assert_eq!(layer.metrics().counter("tiles.forced_swaps"), 1);
    }

    #[test]
    fn loaded_tile_is_swapped_in_alone() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap();
        let fetches = layer.next_loads(&mut FrameBudget::new(1));
        assert_eq!(fetches.len(), 1);
        // The centre tile of the 3x3 window is fetched first.
        assert_eq!(fetches[0].url, "http://tiles/0/1_1_0.jpg");

        assert_eq!(layer.tile_loaded(fetches[0].request, 4096).unwrap(), 1);
        assert_eq!(layer.grid().pending_count(), 8);
        assert!(layer.swap_deadline().is_some());
        with_backend(&ctx, |b| {
            assert!(b.has_texture("http://tiles/0/1_1_0.jpg"));
            let visible = layer
                .grid()
                .sprites()
                .into_iter()
                .filter(|s| b.sprite(*s).is_some_and(|s| s.visible))
                .count();
            assert_eq!(visible, 1);
        });
    }

    #[test]
    fn cancelled_fetch_results_are_discarded() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap();
        let fetches = layer.next_loads(&mut FrameBudget::unlimited());

        layer.redraw(view(0.0, 0.0, 3), Time(0.1)).unwrap();
        assert_eq!(layer.take_cancelled().len(), 9);
        assert_eq!(layer.tile_loaded(fetches[0].request, 10).unwrap(), 0);
        with_backend(&ctx, |b| assert!(!b.has_texture(&fetches[0].url)));
    }

    #[test]
    fn renders_on_pans_but_not_on_first_draw_or_depth_change() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        assert!(!layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap().rendered);
        assert!(layer.redraw(view(10.0, 0.0, 0), Time::ZERO).unwrap().rendered);
        assert!(!layer.redraw(view(10.0, 0.0, 1), Time::ZERO).unwrap().rendered);
    }

    #[test]
    fn opacity_below_threshold_hides_container() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.set_opacity(0.01);
        assert!(!layer.is_visible());
        with_backend(&ctx, |b| {
            let c = b.container(layer.container()).unwrap();
            assert_eq!(c.alpha, 0.01);
            assert!(!c.visible);
        });
        layer.set_opacity(0.5);
        with_backend(&ctx, |b| assert!(b.container(layer.container()).unwrap().visible));
    }

    #[test]
    fn surface_is_resized_only_on_change() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        let before = with_backend(&ctx, |b| b.resize_count());
        assert!(!layer.resize(512, 512).unwrap());
        assert!(layer.resize(1024, 512).unwrap());
        assert_eq!(with_backend(&ctx, |b| b.resize_count()), before + 1);
        assert_eq!((layer.grid().rows(), layer.grid().cols()), (3, 5));
        assert!(layer.needs_redraw());
    }

    #[test]
    fn blend_mode_applies_to_all_sprites_including_new_ones() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.set_blend_mode(BlendMode::Multiply);
        layer.redraw(view(0.0, 0.0, 4), Time::ZERO).unwrap();
        with_backend(&ctx, |b| {
            for sprite in layer.grid().sprites() {
                assert_eq!(b.sprite(sprite).unwrap().blend_mode, BlendMode::Multiply);
            }
        });
        assert!(TileLayer::available_blend_modes().contains(&"color burn"));
    }

    #[test]
    fn filter_chain_is_reapplied_in_order() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.add_filter(FilterWrapper::new(FilterKind::GaussianBlur)).unwrap();
        layer.add_filter(FilterWrapper::new(FilterKind::Invert)).unwrap();
        layer.move_filter(1, 0).unwrap();
        layer.set_filter_param(1, "blurX", 8.0).unwrap();

        with_backend(&ctx, |b| {
            let filters = &b.container(layer.container()).unwrap().filters;
            let kinds: Vec<_> = filters.iter().map(|f| f.kind).collect();
            assert_eq!(kinds, vec![FilterKind::Invert, FilterKind::GaussianBlur]);
            assert_eq!(filters[1].params[0], ("blurX", 8.0));
        });

        let removed = layer.remove_filter(0).unwrap();
        assert_eq!(removed.kind(), FilterKind::Invert);
        assert_eq!(
            layer.remove_filter(3).unwrap_err(),
            FilterError::IndexOutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn filterless_backend_offers_no_filters() {
        let ctx = context(RecordingBackend::without_filters());
        let mut layer = layer_in(&ctx, 1);
        assert!(layer.available_filters().is_empty());
        assert_eq!(
            layer.add_filter(FilterWrapper::new(FilterKind::Invert)),
            Err(FilterError::Unsupported)
        );
    }

    #[test]
    fn reorder_follows_layer_list() {
        let ctx = context(RecordingBackend::new());
        let mut a = layer_in(&ctx, 1);
        let b = layer_in(&ctx, 2);
        assert_eq!(ctx.borrow().stage().children(), &[a.container(), b.container()]);

        assert!(!a.notify_reorder(Some(&b)));
        a.notify_reorder(None);
        assert_eq!(ctx.borrow().stage().children(), &[b.container(), a.container()]);

        let other = context(RecordingBackend::new());
        let c = layer_in(&other, 3);
        assert!(!a.notify_reorder(Some(&c)));
    }

    #[test]
    fn dropping_a_layer_removes_its_container() {
        let ctx = context(RecordingBackend::new());
        let a = layer_in(&ctx, 1);
        let b = layer_in(&ctx, 2);
        drop(a);
        assert_eq!(ctx.borrow().stage().children(), &[b.container()]);
        with_backend(&ctx, |backend| assert_eq!(backend.sprite_count(), 9));
    }

    #[test]
    fn prefetch_counts_queued_and_cached_tiles() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        let p = Vec3::new(1024.0, 1024.0, 2.0);
        let urls = tile_urls_for_location(layer.stack(), layer.tile_source(), p, 0.0, 512, 512).unwrap();
        assert_eq!(urls.len(), 9);

        let report = layer.cache_locations(&[p], 0.0).unwrap();
        assert_eq!((report.queued, report.cached), (9, 0));

        for fetch in layer.next_loads(&mut FrameBudget::unlimited()) {
            layer.tile_loaded(fetch.request, 100).unwrap();
        }
        let report = layer.cache_locations(&[p], 0.0).unwrap();
        assert_eq!((report.queued, report.cached), (0, 9));
    }

    #[test]
    fn scales_past_the_coarsest_level_are_refused() {
        let ctx = context(RecordingBackend::new());
        let mut layer = layer_in(&ctx, 1);
        layer.redraw(view(0.0, 0.0, 0), Time::ZERO).unwrap();
        let sprites = with_backend(&ctx, |backend| backend.sprite_count());

        let mut far = view(0.0, 0.0, 0);
        far.scale = 1e6;
        assert!(matches!(
            layer.redraw(far, Time(0.1)),
            Err(TileLayerError::TileInfo(TileInfoError::InvalidScale(_)))
        ));
        with_backend(&ctx, |backend| assert_eq!(backend.sprite_count(), sprites));

        let p = Vec3::new(1024.0, 1024.0, 2.0);
        assert_eq!(
            tile_urls_for_location(layer.stack(), layer.tile_source(), p, 1e6, 512, 512),
            Err(TileInfoError::InvalidScale(1e6))
        );
        assert_eq!(
            tile_urls_for_location(layer.stack(), layer.tile_source(), p, 3.0, 512, 512)
                .unwrap()
                .len(),
            1
        );
    }
}
