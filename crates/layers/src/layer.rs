#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u64);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// What the stack viewer needs from every layer it stacks.
pub trait Layer {
    type Error;

    fn id(&self) -> LayerId;
    fn opacity(&self) -> f64;
    fn set_opacity(&mut self, opacity: f64);
    /// Returns `true` if the layer had to reallocate for the new size.
    fn resize(&mut self, width: u32, height: u32) -> Result<bool, Self::Error>;
}
