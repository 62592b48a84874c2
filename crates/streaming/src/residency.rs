/// Lifecycle of a tile texture.
///
/// Requested → Loading → Resident, with Failed for loads that errored and
/// Evicted for textures dropped by the byte budget or a source change.
/// Only `Resident` textures count as loaded when buffers are swapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResidencyState {
    Requested,
    Loading,
    Resident,
    Failed,
    Evicted,
}

impl ResidencyState {
    pub fn is_loaded(self) -> bool {
        self == ResidencyState::Resident
    }

    /// States from which a new fetch has to be issued.
    pub fn needs_fetch(self) -> bool {
        matches!(self, ResidencyState::Failed | ResidencyState::Evicted)
    }
}
