use ndarray::{Array3, ArrayView3, Zip};
use num::Zero;

use crate::affine::Affine;
use crate::transform::Transform;

/// Slack allowed when a target voxel maps right onto the edge of the source grid.
const EDGE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Resampling of a volume onto another grid through their common world space.
/// Samples falling outside the source are 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resample {
    pub shape: [usize; 3],
    pub interpolation: Interpolation,
    /// Target voxel index to source voxel index.
    voxel_map: Affine,
}

impl Resample {
    /// Returns `None` when the source transform is singular.
    pub fn new(
        source: &Affine,
        target: &Affine,
        shape: [usize; 3],
        interpolation: Interpolation,
    ) -> Option<Self> {
        let voxel_map = source.inverse()?.compose(target);
        Some(Resample {
            shape,
            interpolation,
            voxel_map,
        })
    }

    /// Onto an RAS+ grid of `shape` voxels of `voxel_size`, centred where the centre of the
    /// source grid of `source_shape` voxels lies in world space.
    pub fn conform(
        source: &Affine,
        source_shape: [usize; 3],
        shape: [usize; 3],
        voxel_size: [f64; 3],
        interpolation: Interpolation,
    ) -> Option<(Self, Affine)> {
        let target = Affine::centered_on(shape, voxel_size, source.grid_center(source_shape));
        Self::new(source, &target, shape, interpolation).map(|resample| (resample, target))
    }

    fn sample<T, F>(&self, sampler: F) -> Array3<T>
    where
        T: Clone + Zero + Send,
        F: Fn([f64; 3]) -> T + Sync,
    {
        let mut out = Array3::zeros(self.shape);
        Zip::indexed(&mut out).par_for_each(|(i, j, k), value| {
            *value = sampler(self.voxel_map.apply([i as f64, j as f64, k as f64]));
        });
        out
    }
}

fn in_bounds(point: &[f64; 3], dims: [usize; 3]) -> bool {
    (0..3).all(|i| point[i] >= -EDGE_TOLERANCE && point[i] <= dims[i] as f64 - 1.0 + EDGE_TOLERANCE)
}

fn nearest<T: Copy + Zero>(volume: &ArrayView3<T>, point: [f64; 3]) -> T {
    let (nx, ny, nz) = volume.dim();
    let dims = [nx, ny, nz];
    let rounded = point.map(|v| (v + 0.5).floor());
    if !in_bounds(&rounded, dims) {
        return T::zero();
    }
    volume[[
        rounded[0] as usize,
        rounded[1] as usize,
        rounded[2] as usize,
    ]]
}

fn trilinear(volume: &ArrayView3<f32>, point: [f64; 3]) -> f32 {
    let (nx, ny, nz) = volume.dim();
    let dims = [nx, ny, nz];
    if !in_bounds(&point, dims) {
        return 0.0;
    }
    let base: [usize; 3] =
        std::array::from_fn(|i| point[i].floor().clamp(0.0, (dims[i] - 1) as f64) as usize);
    let frac: [f64; 3] = std::array::from_fn(|i| (point[i] - base[i] as f64).clamp(0.0, 1.0));

    let mut value = 0.0f64;
    for corner in 0..8usize {
        let mut weight = 1.0;
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let upper = (corner >> axis) & 1 == 1;
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
            index[axis] = if upper {
                (base[axis] + 1).min(dims[axis] - 1)
            } else {
                base[axis]
            };
        }
        if weight > 0.0 {
            value += weight * volume[index] as f64;
        }
    }
    value as f32
}

impl Transform<Array3<f32>> for Resample {
    fn apply(&self, volume: &Array3<f32>) -> Array3<f32> {
        let volume = volume.view();
        match self.interpolation {
            Interpolation::Nearest => self.sample(|p| nearest(&volume, p)),
            Interpolation::Linear => self.sample(|p| trilinear(&volume, p)),
        }
    }
}

/// Labels are categorical and always use nearest neighbour.
impl Transform<Array3<u16>> for Resample {
    fn apply(&self, volume: &Array3<u16>) -> Array3<u16> {
        let volume = volume.view();
        self.sample(|p| nearest(&volume, p))
    }
}
