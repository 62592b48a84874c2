pub mod budget;
pub mod deadline;
pub mod metrics;
pub mod notices;
pub mod work_queue;

pub use budget::*;
pub use deadline::*;
pub use metrics::*;
pub use notices::*;
pub use work_queue::*;
