pub mod arena;
pub mod handles;
pub mod ids;
pub mod math;
pub mod stack;
pub mod time;

// Foundation crate: small, well-tested primitives only.
pub use arena::*;
pub use handles::*;
pub use ids::*;
pub use stack::*;
pub use time::*;
