//! Slice-wise evaluation of 2D networks over 3D volumes and fusion of the per-view results.
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use tracing::debug;

use crate::errors::ModelError;
use crate::model::SliceModel;
use crate::orientation::Orientation;
use crate::volume::{global_min, LabelVolume, ProbabilityField};

/// How many neighbouring slices a model sees as input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceContext {
    /// The current slice only.
    Single,
    /// Previous, current and next slice.
    Neighbours,
}

impl SliceContext {
    pub const fn channels(self) -> usize {
        match self {
            SliceContext::Single => 1,
            SliceContext::Neighbours => 3,
        }
    }

    /// Slices of padding needed at each end of the traversal axis.
    pub const fn margin(self) -> usize {
        self.channels() / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Independent per-class probability.
    Sigmoid,
    /// Mutually exclusive classes, normalized over the class axis.
    Softmax,
}

impl Activation {
    /// Turn logits shaped (classes, height, width) into probabilities in place.
    pub fn apply(self, logits: &mut Array3<f32>) {
        match self {
            Activation::Sigmoid => logits.mapv_inplace(sigmoid),
            Activation::Softmax => {
                for mut lane in logits.lanes_mut(Axis(0)) {
                    let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    lane.mapv_inplace(|v| (v - max).exp());
                    let total = lane.sum();
                    lane.mapv_inplace(|v| v / total);
                }
            }
        }
    }
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// What a model expects and produces for each slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSpec {
    pub context: SliceContext,
    pub activation: Activation,
    pub classes: usize,
}

fn pad_slices(view: &ArrayView3<f32>, margin: usize, value: f32) -> Array3<f32> {
    let (slices, height, width) = view.dim();
    let mut padded = Array3::from_elem((slices + 2 * margin, height, width), value);
    padded
        .slice_mut(s![margin..margin + slices, .., ..])
        .assign(view);
    padded
}

/// Evaluate `model` on every slice of `view` (slices, height, width), in order.
///
/// Each activated slice, shaped (classes, height, width), is handed to `sink` together with
/// its index along the traversal axis. With neighbour context the view is padded by one slice
/// at each end, filled with its global minimum.
pub fn for_each_slice<M, F>(
    view: ArrayView3<f32>,
    model: &mut M,
    spec: SliceSpec,
    mut sink: F,
) -> Result<(), ModelError>
where
    M: SliceModel + ?Sized,
    F: FnMut(usize, Array3<f32>),
{
    let (slices, height, width) = view.dim();
    let margin = spec.context.margin();
    let padded;
    let source = if margin > 0 {
        padded = pad_slices(&view, margin, global_min(&view));
        padded.view()
    } else {
        view.view()
    };

    let channels = spec.context.channels();
    for index in 0..slices {
        let input = source.slice(s![index..index + channels, .., ..]);
        let input = input.as_standard_layout();
        let mut logits = model.forward(input.view())?;
        if logits.dim() != (spec.classes, height, width) {
            return Err(ModelError::UnexpectedOutputShape {
                name: model.name().to_string(),
                expected: vec![spec.classes, height, width],
                actual: logits.shape().to_vec(),
            });
        }
        spec.activation.apply(&mut logits);
        sink(index, logits);
    }
    Ok(())
}

/// Evaluate a whole view into a stacked field shaped (slices, classes, height, width).
pub fn infer_view<M>(
    view: ArrayView3<f32>,
    model: &mut M,
    spec: SliceSpec,
) -> Result<Array4<f32>, ModelError>
where
    M: SliceModel + ?Sized,
{
    let (slices, height, width) = view.dim();
    let mut stacked = Array4::zeros((slices, spec.classes, height, width));
    for_each_slice(view, model, spec, |index, probabilities| {
        stacked
            .index_axis_mut(Axis(0), index)
            .assign(&probabilities);
    })?;
    Ok(stacked)
}

/// Running sum of probability fields in canonical (class, x, y, z) order.
#[derive(Debug, Clone)]
pub struct FieldAccumulator {
    sum: ProbabilityField,
    passes: usize,
}

impl FieldAccumulator {
    pub fn zeros(classes: usize, shape: [usize; 3]) -> Self {
        assert!(
            classes <= u8::MAX as usize + 1,
            "{} classes do not fit in a label volume",
            classes
        );
        FieldAccumulator {
            sum: Array4::zeros((classes, shape[0], shape[1], shape[2])),
            passes: 0,
        }
    }

    pub fn classes(&self) -> usize {
        self.sum.len_of(Axis(0))
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Add a complete field already restored to canonical order.
    pub fn add(&mut self, field: &ArrayView4<f32>) {
        assert_eq!(
            field.shape(),
            self.sum.shape(),
            "fused fields must share the canonical shape"
        );
        self.sum += field;
        self.passes += 1;
    }

    /// Add one activated slice, shaped (classes, height, width), of an orientation pass.
    pub fn add_slice(&mut self, orientation: Orientation, index: usize, slice: ArrayView3<f32>) {
        let slice = if orientation.transposes_plane() {
            slice.permuted_axes([0, 2, 1])
        } else {
            slice
        };
        let mut target = self
            .sum
            .index_axis_mut(Axis(orientation.slice_axis() + 1), index);
        assert_eq!(
            target.shape(),
            slice.shape(),
            "slice does not match the canonical plane"
        );
        target += &slice;
    }

    /// Run one orientation pass and stream every slice straight into the sum, so the
    /// per-view field is never materialized. The model is released when the pass ends.
    pub fn accumulate<M>(
        &mut self,
        volume: &ArrayView3<f32>,
        orientation: Orientation,
        model: &mut M,
        spec: SliceSpec,
    ) -> Result<(), ModelError>
    where
        M: SliceModel + ?Sized,
    {
        assert_eq!(spec.classes, self.classes(), "class count of {}", model.name());
        debug!("Running {} pass with {}", orientation, model.name());
        let view = orientation.view(volume.view());
        let result = for_each_slice(view, model, spec, |index, probabilities| {
            self.add_slice(orientation, index, probabilities.view())
        });
        model.release();
        result?;
        self.passes += 1;
        Ok(())
    }

    /// Average of the added fields.
    pub fn mean(self) -> ProbabilityField {
        match self.passes {
            0 => self.sum,
            passes => self.sum / passes as f32,
        }
    }

    pub fn into_sum(self) -> ProbabilityField {
        self.sum
    }

    pub fn argmax(&self) -> LabelVolume {
        argmax_classes(&self.sum.view())
    }
}

/// Index of the most probable class per voxel. Ties go to the lowest class index.
pub fn argmax_classes(field: &ArrayView4<f32>) -> LabelVolume {
    let (_, x, y, z) = field.dim();
    let mut labels = Array3::zeros((x, y, z));
    Zip::from(&mut labels)
        .and(field.lanes(Axis(0)))
        .par_for_each(|label, lane| {
            let mut best = 0;
            let mut best_value = f32::NEG_INFINITY;
            for (class, &value) in lane.iter().enumerate() {
                if value > best_value {
                    best = class;
                    best_value = value;
                }
            }
            *label = best as u8;
        });
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SliceModel;
    use ndarray::{Array3, Array4, ArrayView3};
    use rstest::rstest;

    /// Emits one input channel as logits of every class, scaled per class.
    struct Echo {
        channel: usize,
        classes: usize,
        calls: usize,
        releases: usize,
    }

    impl Echo {
        fn new(channel: usize, classes: usize) -> Self {
            Echo {
                channel,
                classes,
                calls: 0,
                releases: 0,
            }
        }
    }

    impl SliceModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn forward(&mut self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
            self.calls += 1;
            let (_, height, width) = input.dim();
            let channel = input.index_axis(Axis(0), self.channel);
            Ok(Array3::from_shape_fn(
                (self.classes, height, width),
                |(c, h, w)| channel[[h, w]] * (c + 1) as f32,
            ))
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    fn ramp(shape: [usize; 3]) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(x, y, z)| {
            ((x * 7 + y * 3 + z * 5) % 11) as f32 / 11.0 - 0.5
        })
    }

    fn spec(context: SliceContext, activation: Activation, classes: usize) -> SliceSpec {
        SliceSpec {
            context,
            activation,
            classes,
        }
    }

    #[test]
    fn test_softmax_normalizes() {
        let mut logits = Array3::from_shape_fn((4, 3, 2), |(c, h, w)| (c * h + w) as f32);
        Activation::Softmax.apply(&mut logits);
        for lane in logits.lanes(Axis(0)) {
            assert!((lane.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let mut logits = Array3::zeros((1, 2, 2));
        Activation::Sigmoid.apply(&mut logits);
        assert!(logits.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_slice_order_preserved() {
        let volume = ramp([5, 4, 3]);
        let mut model = Echo::new(0, 1);
        let stacked = infer_view(
            volume.view(),
            &mut model,
            spec(SliceContext::Single, Activation::Sigmoid, 1),
        )
        .unwrap();
        assert_eq!(stacked.dim(), (5, 1, 4, 3));
        assert_eq!(model.calls, 5);
        assert_eq!(stacked.index_axis(Axis(1), 0), volume.mapv(sigmoid));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    fn test_neighbour_context(#[case] channel: usize) {
        let volume = ramp([4, 3, 3]);
        let background = global_min(&volume.view());
        let mut model = Echo::new(channel, 1);
        let stacked = infer_view(
            volume.view(),
            &mut model,
            spec(SliceContext::Neighbours, Activation::Sigmoid, 1),
        )
        .unwrap();
        for index in 0..4 {
            // channel 0 is the previous slice, 2 the next one
            let source = index as isize + channel as isize - 1;
            let expected = if source < 0 || source >= 4 {
                Array3::from_elem((1, 3, 3), sigmoid(background))
            } else {
                volume
                    .slice(s![source..source + 1, .., ..])
                    .mapv(sigmoid)
            };
            assert_eq!(stacked.index_axis(Axis(0), index), expected);
        }
    }

    #[test]
    fn test_unexpected_shape() {
        let volume = ramp([2, 3, 3]);
        let mut model = Echo::new(0, 2);
        let result = infer_view(
            volume.view(),
            &mut model,
            spec(SliceContext::Single, Activation::Softmax, 3),
        );
        assert!(matches!(
            result,
            Err(ModelError::UnexpectedOutputShape { .. })
        ));
    }

    #[rstest]
    #[case(Orientation::Coronal)]
    #[case(Orientation::Sagittal)]
    #[case(Orientation::Axial)]
    fn test_streaming_matches_restore(#[case] orientation: Orientation) {
        let volume = ramp([6, 5, 4]);
        let slice_spec = spec(SliceContext::Neighbours, Activation::Softmax, 3);

        let mut streamed = FieldAccumulator::zeros(3, [6, 5, 4]);
        let mut model = Echo::new(1, 3);
        streamed
            .accumulate(&volume.view(), orientation, &mut model, slice_spec)
            .unwrap();
        assert_eq!(model.releases, 1);

        let mut restored = FieldAccumulator::zeros(3, [6, 5, 4]);
        let stacked = infer_view(
            orientation.view(volume.view()),
            &mut Echo::new(1, 3),
            slice_spec,
        )
        .unwrap();
        restored.add(&orientation.restore_field(stacked).view());

        assert_eq!(streamed.into_sum(), restored.into_sum());
    }

    #[test]
    fn test_fusion_order_independent() {
        let volume = ramp([6, 5, 4]);
        let slice_spec = spec(SliceContext::Single, Activation::Softmax, 4);
        let fuse = |order: &[Orientation]| {
            let mut accumulator = FieldAccumulator::zeros(4, [6, 5, 4]);
            for &orientation in order {
                accumulator
                    .accumulate(&volume.view(), orientation, &mut Echo::new(0, 4), slice_spec)
                    .unwrap();
            }
            accumulator.argmax()
        };
        let forward = fuse(&[
            Orientation::Coronal,
            Orientation::Sagittal,
            Orientation::Axial,
        ]);
        let backward = fuse(&[
            Orientation::Axial,
            Orientation::Sagittal,
            Orientation::Coronal,
        ]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_mean_of_passes() {
        let mut accumulator = FieldAccumulator::zeros(1, [2, 2, 2]);
        accumulator.add(&Array4::from_elem((1, 2, 2, 2), 0.2).view());
        accumulator.add(&Array4::from_elem((1, 2, 2, 2), 0.6).view());
        assert_eq!(accumulator.passes(), 2);
        let mean = accumulator.mean();
        assert!(mean.iter().all(|&v| (v - 0.4).abs() < 1e-6));
    }

    #[test]
    #[should_panic(expected = "canonical shape")]
    fn test_shape_mismatch_is_fatal() {
        let mut accumulator = FieldAccumulator::zeros(2, [3, 3, 3]);
        accumulator.add(&Array4::zeros((2, 3, 3, 4)).view());
    }

    #[test]
    fn test_argmax_first_on_ties() {
        let mut field = Array4::zeros((3, 1, 1, 2));
        field[[1, 0, 0, 0]] = 0.5;
        field[[2, 0, 0, 0]] = 0.5;
        field[[2, 0, 0, 1]] = 0.9;
        let labels = argmax_classes(&field.view());
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 0, 1]], 2);

        let empty = argmax_classes(&Array4::zeros((3, 1, 1, 1)).view());
        assert_eq!(empty[[0, 0, 0]], 0);
    }
}
