//! Render backend abstraction.
//!
//! Layers never talk to a graphics library directly. They create containers
//! and sprites through a [`RenderBackend`] and describe blend modes and
//! filters with the plain values defined here.

use std::any::Any;
use std::collections::BTreeMap;

use foundation::arena::Arena;
use foundation::handles::Handle;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub Handle);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpriteId(pub Handle);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    pub const ALL: [BlendMode; 17] = [
        BlendMode::Normal,
        BlendMode::Add,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::Hue,
        BlendMode::Saturation,
        BlendMode::Color,
        BlendMode::Luminosity,
    ];

    /// Lower-case, space separated name ("color dodge").
    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Add => "add",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color dodge",
            BlendMode::ColorBurn => "color burn",
            BlendMode::HardLight => "hard light",
            BlendMode::SoftLight => "soft light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Hue => "hue",
            BlendMode::Saturation => "saturation",
            BlendMode::Color => "color",
            BlendMode::Luminosity => "luminosity",
        }
    }

    /// Accepts both "color dodge" and the constant style "COLOR_DODGE".
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace('_', " ");
        Self::ALL.into_iter().find(|m| m.name() == normalized)
    }
}

impl std::fmt::Display for BlendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterKind {
    GaussianBlur,
    Invert,
}

impl FilterKind {
    pub fn name(self) -> &'static str {
        match self {
            FilterKind::GaussianBlur => "Gaussian Blur",
            FilterKind::Invert => "Invert",
        }
    }
}

/// A configured filter instance as handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub params: Vec<(&'static str, f64)>,
}

pub trait RenderBackend: Any {
    /// `false` for software fallbacks that cannot run filters.
    fn supports_filters(&self) -> bool;
    fn surface_size(&self) -> (u32, u32);
    fn resize_surface(&mut self, width: u32, height: u32);

    fn create_container(&mut self) -> ContainerId;
    fn destroy_container(&mut self, container: ContainerId);
    fn create_sprite(&mut self, container: ContainerId) -> Option<SpriteId>;
    /// Destroys every sprite of the container.
    fn clear_container(&mut self, container: ContainerId);

    fn set_sprite_texture(&mut self, sprite: SpriteId, url: Option<&str>);
    fn set_sprite_position(&mut self, sprite: SpriteId, x: f64, y: f64);
    fn set_sprite_visible(&mut self, sprite: SpriteId, visible: bool);
    fn set_sprite_blend_mode(&mut self, sprite: SpriteId, mode: BlendMode);

    fn set_container_transform(&mut self, container: ContainerId, x: f64, y: f64, scale: f64);
    fn set_container_alpha(&mut self, container: ContainerId, alpha: f64);
    fn set_container_visible(&mut self, container: ContainerId, visible: bool);
    fn set_container_filters(&mut self, container: ContainerId, filters: &[FilterSpec]);

    fn upload_texture(&mut self, url: &str, bytes: usize);
    fn release_texture(&mut self, url: &str);

    /// Draws the given containers back to front.
    fn render(&mut self, order: &[ContainerId]);

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteState {
    pub container: ContainerId,
    pub texture: Option<String>,
    pub x: f64,
    pub y: f64,
    pub visible: bool,
    pub blend_mode: BlendMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerState {
    pub sprites: Vec<SpriteId>,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub alpha: f64,
    pub visible: bool,
    pub filters: Vec<FilterSpec>,
}

impl Default for ContainerState {
    fn default() -> Self {
        Self {
            sprites: Vec::new(),
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            alpha: 1.0,
            visible: true,
            filters: Vec::new(),
        }
    }
}

/// Headless backend that keeps the full scene state and counts operations.
///
/// Used by tests and by the native client, which has no screen to draw on.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    filters_supported: bool,
    size: (u32, u32),
    resizes: u32,
    containers: Arena<ContainerState>,
    sprites: Arena<SpriteState>,
    textures: BTreeMap<String, usize>,
    frames: Vec<Vec<ContainerId>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            filters_supported: true,
            ..Self::default()
        }
    }

    /// A backend without filter support, like a canvas fallback.
    pub fn without_filters() -> Self {
        Self::default()
    }

    pub fn resize_count(&self) -> u32 {
        self.resizes
    }

    pub fn container(&self, id: ContainerId) -> Option<&ContainerState> {
        self.containers.get(id.0)
    }

    pub fn sprite(&self, id: SpriteId) -> Option<&SpriteState> {
        self.sprites.get(id.0)
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.len()
    }

    pub fn texture_bytes(&self) -> usize {
        self.textures.values().sum()
    }

    pub fn has_texture(&self, url: &str) -> bool {
        self.textures.contains_key(url)
    }

    pub fn frames(&self) -> &[Vec<ContainerId>] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&[ContainerId]> {
        self.frames.last().map(Vec::as_slice)
    }
}

impl RenderBackend for RecordingBackend {
    fn supports_filters(&self) -> bool {
        self.filters_supported
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.resizes += 1;
    }

    fn create_container(&mut self) -> ContainerId {
        ContainerId(self.containers.insert(ContainerState::default()))
    }

    fn destroy_container(&mut self, container: ContainerId) {
        self.clear_container(container);
        self.containers.remove(container.0);
    }

    fn create_sprite(&mut self, container: ContainerId) -> Option<SpriteId> {
        if !self.containers.contains(container.0) {
            return None;
        }
        let id = SpriteId(self.sprites.insert(SpriteState {
            container,
            texture: None,
            x: 0.0,
            y: 0.0,
            visible: false,
            blend_mode: BlendMode::Normal,
        }));
        if let Some(c) = self.containers.get_mut(container.0) {
            c.sprites.push(id);
        }
        Some(id)
    }

    fn clear_container(&mut self, container: ContainerId) {
        let Some(c) = self.containers.get_mut(container.0) else {
            return;
        };
        for sprite in std::mem::take(&mut c.sprites) {
            self.sprites.remove(sprite.0);
        }
    }

    fn set_sprite_texture(&mut self, sprite: SpriteId, url: Option<&str>) {
        if let Some(s) = self.sprites.get_mut(sprite.0) {
            s.texture = url.map(str::to_string);
        }
    }

    fn set_sprite_position(&mut self, sprite: SpriteId, x: f64, y: f64) {
        if let Some(s) = self.sprites.get_mut(sprite.0) {
            s.x = x;
            s.y = y;
        }
    }

    fn set_sprite_visible(&mut self, sprite: SpriteId, visible: bool) {
        if let Some(s) = self.sprites.get_mut(sprite.0) {
            s.visible = visible;
        }
    }

    fn set_sprite_blend_mode(&mut self, sprite: SpriteId, mode: BlendMode) {
        if let Some(s) = self.sprites.get_mut(sprite.0) {
            s.blend_mode = mode;
        }
    }

    fn set_container_transform(&mut self, container: ContainerId, x: f64, y: f64, scale: f64) {
        if let Some(c) = self.containers.get_mut(container.0) {
            c.x = x;
            c.y = y;
            c.scale = scale;
        }
    }

    fn set_container_alpha(&mut self, container: ContainerId, alpha: f64) {
        if let Some(c) = self.containers.get_mut(container.0) {
            c.alpha = alpha;
        }
    }

    fn set_container_visible(&mut self, container: ContainerId, visible: bool) {
        if let Some(c) = self.containers.get_mut(container.0) {
            c.visible = visible;
        }
    }

    fn set_container_filters(&mut self, container: ContainerId, filters: &[FilterSpec]) {
        if !self.filters_supported {
            return;
        }
        if let Some(c) = self.containers.get_mut(container.0) {
            c.filters = filters.to_vec();
        }
    }

    fn upload_texture(&mut self, url: &str, bytes: usize) {
        self.textures.insert(url.to_string(), bytes);
    }

    fn release_texture(&mut self, url: &str) {
        self.textures.remove(url);
    }

    fn render(&mut self, order: &[ContainerId]) {
        self.frames.push(order.to_vec());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{BlendMode, FilterKind, FilterSpec, RecordingBackend, RenderBackend};

    #[test]
    fn blend_mode_names_accept_constant_style() {
        assert_eq!(BlendMode::from_name("COLOR_DODGE"), Some(BlendMode::ColorDodge));
        assert_eq!(BlendMode::from_name("hard light"), Some(BlendMode::HardLight));
        assert_eq!(BlendMode::from_name("sparkle"), None);
        assert_eq!(BlendMode::SoftLight.to_string(), "soft light");
        assert_eq!(BlendMode::ALL.len(), 17);
    }

    #[test]
    fn clearing_a_container_destroys_its_sprites() {
        let mut backend = RecordingBackend::new();
        let c = backend.create_container();
        let a = backend.create_sprite(c).unwrap();
        backend.set_sprite_texture(a, Some("a.jpg"));
        backend.create_sprite(c).unwrap();
        assert_eq!(backend.sprite_count(), 2);

        backend.clear_container(c);
        assert_eq!(backend.sprite_count(), 0);
        assert!(backend.sprite(a).is_none());

        // Reused slots get fresh identities.
        let b = backend.create_sprite(c).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn filters_are_ignored_without_support() {
        let blur = FilterSpec {
            kind: FilterKind::GaussianBlur,
            params: vec![("blurX", 2.0)],
        };

        let mut backend = RecordingBackend::without_filters();
        let c = backend.create_container();
        backend.set_container_filters(c, &[blur.clone()]);
        assert!(backend.container(c).unwrap().filters.is_empty());

        let mut backend = RecordingBackend::new();
        let c = backend.create_container();
        backend.set_container_filters(c, &[blur.clone()]);
        assert_eq!(backend.container(c).unwrap().filters, vec![blur]);
    }
}
