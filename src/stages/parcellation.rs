use ndarray::ArrayView3;
use tracing::debug;

use crate::errors::ModelError;
use crate::inference::{Activation, FieldAccumulator, SliceContext, SliceSpec};
use crate::model::ViewModels;
use crate::volume::{normalize, LabelVolume};

/// Parcel labels of a stripped working-grid volume.
///
/// Each orientation model sees the previous, current and next slice. Softmax outputs are
/// streamed into one canonical accumulator and the sum is reduced by arg-max.
pub fn parcellate(
    stripped: &ArrayView3<f32>,
    models: &mut ViewModels,
    classes: usize,
) -> Result<LabelVolume, ModelError> {
    let normalized = normalize(stripped);
    let (x, y, z) = normalized.dim();
    let spec = SliceSpec {
        context: SliceContext::Neighbours,
        activation: Activation::Softmax,
        classes,
    };

    let mut fused = FieldAccumulator::zeros(classes, [x, y, z]);
    for (orientation, model) in models.iter_mut() {
        fused.accumulate(&normalized.view(), *orientation, model.as_mut(), spec)?;
    }
    debug!("Fused {} parcellation passes", fused.passes());
    Ok(fused.argmax())
}
