use ndarray::{Array3, Array4, ArrayView3, Zip};

/// Intensities on a 3D grid, indexed (x, y, z) in the canonical frame.
pub type Volume = Array3<f32>;

/// Discrete labels on a 3D grid.
pub type LabelVolume<T = u8> = Array3<T>;

/// Per-class probabilities, indexed (class, x, y, z).
pub type ProbabilityField = Array4<f32>;

/// Number of standard deviations above the mean at which intensities are clipped.
const CLIP_SIGMA: f64 = 3.0;

/// Minimum of a volume, used as the background sentinel for slice padding.
pub fn global_min(volume: &ArrayView3<f32>) -> f32 {
    volume.iter().copied().fold(f32::INFINITY, f32::min)
}

/// Scale intensities into [-1, 1].
///
/// Statistics are taken over strictly positive voxels only. Values are clipped to
/// `[0, mean + 3 * std]` and min-max scaled. A volume with no intensity range maps
/// to a constant -1.
pub fn normalize(volume: &ArrayView3<f32>) -> Volume {
    let (count, sum, sum_sq) = volume
        .iter()
        .filter(|&&v| v > 0.0)
        .fold((0usize, 0.0f64, 0.0f64), |(n, s, sq), &v| {
            let v = v as f64;
            (n + 1, s + v, sq + v * v)
        });
    let upper = if count > 0 {
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        (mean + CLIP_SIGMA * variance.sqrt()) as f32
    } else {
        0.0
    };

    let mut clipped = volume.mapv(|v| v.clamp(0.0, upper));
    let (lo, hi) = clipped
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    if !(range > 0.0) {
        clipped.fill(-1.0);
        return clipped;
    }
    Zip::from(&mut clipped).par_for_each(|v| *v = (*v - lo) / range * 2.0 - 1.0);
    clipped
}
