use ndarray::{Array3, ArrayView3, Axis, Zip};
use tracing::debug;

use crate::errors::ModelError;
use crate::inference::{infer_view, Activation, FieldAccumulator, SliceContext, SliceSpec};
use crate::model::SliceModel;
use crate::morphology::{close, Structure};
use crate::orientation::Orientation;
use crate::pipeline::config::MaskSettings;
use crate::volume::{normalize, Volume};

/// Views a binary foreground model is evaluated on.
pub const MASK_VIEWS: [Orientation; 2] = [Orientation::Coronal, Orientation::Sagittal];

const MASK_SPEC: SliceSpec = SliceSpec {
    context: SliceContext::Single,
    activation: Activation::Sigmoid,
    classes: 1,
};

/// Foreground mask of a normalized volume from a single-class model.
///
/// The sigmoid outputs of the coronal and sagittal passes are averaged, thresholded and
/// closed with the 3x3x3 cube.
pub fn brain_mask<M>(
    normalized: &ArrayView3<f32>,
    model: &mut M,
    settings: &MaskSettings,
) -> Result<Array3<bool>, ModelError>
where
    M: SliceModel + ?Sized,
{
    let (x, y, z) = normalized.dim();
    let mut fused = FieldAccumulator::zeros(MASK_SPEC.classes, [x, y, z]);
    for orientation in MASK_VIEWS {
        debug!("Running {} pass with {}", orientation, model.name());
        let stacked = infer_view(orientation.view(normalized.view()), model, MASK_SPEC);
        model.release();
        fused.add(&orientation.restore_field(stacked?).view());
    }

    let probability = fused.mean().index_axis_move(Axis(0), 0);
    let threshold = settings.threshold;
    let mask = probability.mapv(|p| p > threshold);
    Ok(close(
        &mask.view(),
        Structure::Cube,
        settings.closing_iterations,
    ))
}

/// Zero every voxel outside the mask.
pub fn apply_mask(volume: &ArrayView3<f32>, mask: &ArrayView3<bool>) -> Volume {
    let mut masked = volume.to_owned();
    Zip::from(&mut masked).and(mask).par_for_each(|value, &keep| {
        if !keep {
            *value = 0.0;
        }
    });
    masked
}

/// Crop the conformed volume to brain tissue.
pub fn crop_brain<M>(
    conformed: &ArrayView3<f32>,
    model: &mut M,
    settings: &MaskSettings,
) -> Result<Volume, ModelError>
where
    M: SliceModel + ?Sized,
{
    let normalized = normalize(conformed);
    let mask = brain_mask(&normalized.view(), model, settings)?;
    debug!(
        "Brain mask covers {} voxels",
        mask.iter().filter(|&&v| v).count()
    );
    Ok(apply_mask(conformed, &mask.view()))
}
