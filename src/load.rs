use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use snafu::ResultExt;
use std::path::Path;
use tracing::debug;

use crate::affine::Affine;
use crate::errors::volume::{ReadSnafu, SingularAffineSnafu, UnsupportedShapeSnafu};
use crate::errors::VolumeError;
use crate::transform::{Reorient, Transform};

/// A 3D image together with its voxel-to-world transform.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume<T = f32> {
    pub data: Array3<T>,
    pub affine: Affine,
}

impl<T> NiftiVolume<T> {
    pub fn new(data: Array3<T>, affine: Affine) -> Self {
        NiftiVolume { data, affine }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    pub fn voxel_sizes(&self) -> [f64; 3] {
        self.affine.voxel_sizes()
    }

    /// New data on the same grid.
    pub fn with_data<U>(&self, data: Array3<U>) -> NiftiVolume<U> {
        NiftiVolume::new(data, self.affine)
    }
}

impl<T: Clone> NiftiVolume<T> {
    /// Reorder and flip the voxel axes so they run closest to RAS+.
    pub fn to_canonical(&self) -> NiftiVolume<T> {
        let reorient = Reorient::closest_canonical(&self.affine, self.shape());
        if reorient.is_identity() {
            return self.clone();
        }
        debug!(
            "Reorienting volume with axes {:?} and flips {:?}",
            reorient.axes, reorient.flips
        );
        NiftiVolume::new(reorient.apply(&self.data), reorient.affine(&self.affine))
    }
}

/// Drop trailing singleton dimensions, or add them, until the array is 3D.
fn squeeze_to_3d(mut data: ArrayD<f32>) -> Option<Array3<f32>> {
    while data.ndim() > 3 && data.len_of(Axis(data.ndim() - 1)) == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    while data.ndim() < 3 {
        let next = data.ndim();
        data = data.insert_axis(Axis(next));
    }
    let data = data.into_dimensionality::<Ix3>().ok()?;
    Some(data.as_standard_layout().into_owned())
}

impl NiftiVolume<f32> {
    /// Read a `.nii` or `.nii.gz` file as float intensities, applying the header's scaling.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        let obj = ReaderOptions::new()
            .read_file(path)
            .context(ReadSnafu { path })?;
        let affine = Affine::from_header(obj.header());
        let raw = obj
            .into_volume()
            .into_ndarray::<f32>()
            .context(ReadSnafu { path })?;

        let shape = raw.shape().to_vec();
        let data = squeeze_to_3d(raw).ok_or_else(|| {
            UnsupportedShapeSnafu {
                path,
                shape: shape.clone(),
            }
            .build()
        })?;
        if affine.inverse().is_none() {
            return SingularAffineSnafu { path }.fail();
        }
        debug!("Read {} with shape {:?}", path.display(), shape);
        Ok(NiftiVolume::new(data, affine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use rstest::rstest;

    #[rstest]
    #[case(vec![4, 5, 6], Some([4, 5, 6]))]
    #[case(vec![4, 5, 6, 1], Some([4, 5, 6]))]
    #[case(vec![4, 5, 6, 1, 1], Some([4, 5, 6]))]
    #[case(vec![4, 5], Some([4, 5, 1]))]
    #[case(vec![4, 5, 6, 2], None)]
    fn test_squeeze_to_3d(#[case] shape: Vec<usize>, #[case] expected: Option<[usize; 3]>) {
        let data = ArrayD::<f32>::zeros(IxDyn(&shape));
        let squeezed = squeeze_to_3d(data).map(|d| {
            let (x, y, z) = d.dim();
            [x, y, z]
        });
        assert_eq!(squeezed, expected);
    }

    #[test]
    fn test_squeeze_keeps_values() {
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4, 1]), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2]) as f32
        });
        let squeezed = squeeze_to_3d(data).unwrap();
        assert_eq!(squeezed[[1, 2, 3]], 123.0);
    }

    #[test]
    fn test_to_canonical_flips_axis() {
        let data = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| x as f32);
        let affine = Affine::diagonal([-1.0, 1.0, 1.0], [2.0, 0.0, 0.0]);
        let volume = NiftiVolume::new(data, affine);
        let canonical = volume.to_canonical();
        assert_eq!(
            canonical.data.iter().copied().collect::<Vec<_>>(),
            vec![2.0, 1.0, 0.0]
        );
        assert_eq!(canonical.affine.apply([0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);
        assert_eq!(canonical.affine.linear()[0][0], 1.0);
    }

    #[test]
    fn test_open_missing_file() {
        let result = NiftiVolume::open("/nonexistent/volume.nii");
        assert!(matches!(result, Err(VolumeError::ReadError { .. })));
    }
}
