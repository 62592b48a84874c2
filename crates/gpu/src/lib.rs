pub mod backend;
pub mod context;

pub use backend::*;
pub use context::*;
