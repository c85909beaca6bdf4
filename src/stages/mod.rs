//! Per-image stages run on the conformed volume, in pipeline order.
pub mod cropping;
pub mod hemisphere;
pub mod parcellation;
pub mod postprocess;
pub mod stripping;

pub use cropping::{apply_mask, brain_mask, crop_brain, MASK_VIEWS};
pub use hemisphere::{close_midline_gaps, separate_hemispheres, LATERALITY_CLASSES};
pub use parcellation::parcellate;
pub use postprocess::{postprocess, reconcile, restore_geometry, Reconciled};
pub use stripping::{center_of_mass, strip_skull, Stripped};
