pub mod navigator;
pub mod protocol;
pub mod reviewers;
pub mod segment;
pub mod skip;
pub mod source;
pub mod status;

pub use navigator::*;
pub use protocol::*;
pub use reviewers::*;
pub use segment::*;
pub use skip::*;
pub use source::*;
pub use status::*;
