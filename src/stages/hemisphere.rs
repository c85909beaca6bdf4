use ndarray::{Array3, ArrayView3, Zip};
use tracing::debug;

use crate::errors::ModelError;
use crate::inference::{infer_view, Activation, FieldAccumulator, SliceContext, SliceSpec};
use crate::model::ViewModels;
use crate::morphology::{dilate, Structure};
use crate::volume::{normalize, LabelVolume};

/// Background, left and right.
pub const LATERALITY_CLASSES: usize = 3;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;

/// Laterality labels of a stripped working-grid volume, with midline gaps closed.
pub fn separate_hemispheres(
    stripped: &ArrayView3<f32>,
    models: &mut ViewModels,
    dilation_iterations: usize,
) -> Result<LabelVolume, ModelError> {
    let normalized = normalize(stripped);
    let (x, y, z) = normalized.dim();
    let spec = SliceSpec {
        context: SliceContext::Single,
        activation: Activation::Softmax,
        classes: LATERALITY_CLASSES,
    };

    let mut fused = FieldAccumulator::zeros(LATERALITY_CLASSES, [x, y, z]);
    for (orientation, model) in models.iter_mut() {
        debug!("Running {} pass with {}", orientation, model.name());
        let stacked = infer_view(orientation.view(normalized.view()), model.as_mut(), spec);
        model.release();
        fused.add(&orientation.restore_field(stacked?).view());
    }
    let labels = fused.argmax();
    Ok(close_midline_gaps(&labels.view(), dilation_iterations))
}

/// Grow both hemispheres into the gaps between them.
///
/// Left is dilated first and original right voxels are put back. The right side of that
/// result is then dilated and every left voxel of it is put back, so left wins where the
/// two dilations meet.
pub fn close_midline_gaps(labels: &ArrayView3<u8>, iterations: usize) -> LabelVolume {
    let left = labels.mapv(|v| v == LEFT);
    let mut first = dilate(&left.view(), Structure::Cross, iterations).mapv(|v| if v { LEFT } else { 0 });
    Zip::from(&mut first).and(labels).par_for_each(|value, &label| {
        if label == RIGHT {
            *value = RIGHT;
        }
    });

    let right = first.mapv(|v| v == RIGHT);
    let mut second: Array3<u8> =
        dilate(&right.view(), Structure::Cross, iterations).mapv(|v| if v { RIGHT } else { 0 });
    Zip::from(&mut second).and(&first).par_for_each(|value, &label| {
        if label == LEFT {
            *value = LEFT;
        }
    });
    second
}
