use gpu::backend::BlendMode;

/// Below this opacity a layer is hidden instead of drawn nearly transparent.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.02;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LayerStyle {
    pub opacity: f64,
    pub visible: bool,
    pub blend_mode: BlendMode,
    pub visibility_threshold: f64,
}

impl LayerStyle {
    pub fn new(opacity: f64, blend_mode: BlendMode, visibility_threshold: f64) -> Self {
        Self {
            opacity,
            visible: opacity >= visibility_threshold,
            blend_mode,
            visibility_threshold,
        }
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity;
        self.visible = opacity >= self.visibility_threshold;
    }
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self::new(1.0, BlendMode::Normal, DEFAULT_VISIBILITY_THRESHOLD)
    }
}
