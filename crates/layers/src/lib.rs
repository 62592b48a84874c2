pub mod filters;
pub mod layer;
pub mod symbology;
pub mod tile_grid;
pub mod tile_info;
pub mod tile_layer;

pub use filters::*;
pub use layer::*;
pub use symbology::*;
pub use tile_grid::*;
pub use tile_info::*;
pub use tile_layer::*;
