pub mod model;
pub mod table;
pub mod volume;

pub use model::ModelError;
pub use table::TableError;
pub use volume::VolumeError;
