pub mod affine;
pub mod errors;
pub mod file;
pub mod inference;
pub mod load;
pub mod model;
pub mod morphology;
pub mod naming;
pub mod orientation;
pub mod pipeline;
pub mod preprocess;
pub mod remap;
pub mod report;
pub mod save;
pub mod stages;
pub mod transform;
pub mod volume;

pub use affine::Affine;
pub use errors::{ModelError, TableError, VolumeError};
pub use load::NiftiVolume;
pub use model::{Device, ModelKind, ModelProvider, ModelSet, SliceModel, ViewModels};
pub use orientation::Orientation;
pub use pipeline::{BatchSummary, ImageOutputs, Pipeline, PipelineConfig, PipelineError};
pub use preprocess::{BiasCorrection, NoBiasCorrection, PreprocessError, Preprocessor};
pub use remap::RemapTable;
pub use report::{RegionNames, VolumeReport};
pub use save::SaveNifti;
pub use transform::*;
