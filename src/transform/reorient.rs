use ndarray::{Array3, Axis};

use crate::affine::Affine;
use crate::transform::Transform;

/// Axis permutation and flips that bring a volume's voxel axes closest to RAS+.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reorient {
    /// Source voxel axis stored at each output axis.
    pub axes: [usize; 3],
    /// Whether each output axis runs opposite to its source axis.
    pub flips: [bool; 3],
    /// Shape of the source volume.
    pub shape: [usize; 3],
}

impl Reorient {
    /// Pair each world axis with the voxel axis most aligned to it, strongest pairs first.
    pub fn closest_canonical(affine: &Affine, shape: [usize; 3]) -> Self {
        let linear = affine.linear();
        let sizes = affine.voxel_sizes();
        let direction = |world: usize, voxel: usize| {
            if sizes[voxel] > 0.0 {
                linear[world][voxel] / sizes[voxel]
            } else {
                0.0
            }
        };

        let mut axes = [usize::MAX; 3];
        let mut flips = [false; 3];
        let mut used_voxel = [false; 3];
        for _ in 0..3 {
            let mut best: Option<(usize, usize, f64)> = None;
            for world in (0..3).filter(|&w| axes[w] == usize::MAX) {
                for voxel in (0..3).filter(|&v| !used_voxel[v]) {
                    let strength = direction(world, voxel).abs();
                    if best.map_or(true, |(_, _, s)| strength > s) {
                        best = Some((world, voxel, strength));
                    }
                }
            }
            if let Some((world, voxel, _)) = best {
                axes[world] = voxel;
                flips[world] = direction(world, voxel) < 0.0;
                used_voxel[voxel] = true;
            }
        }
        Reorient { axes, flips, shape }
    }

    pub fn is_identity(&self) -> bool {
        self.axes == [0, 1, 2] && self.flips == [false; 3]
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.axes.map(|axis| self.shape[axis])
    }

    /// Voxel-to-world transform of the reoriented volume.
    pub fn affine(&self, affine: &Affine) -> Affine {
        // Maps output voxel indices back to source voxel indices.
        let mut rows = [[0.0; 4]; 3];
        for (output, &source) in self.axes.iter().enumerate() {
            if self.flips[output] {
                rows[source][output] = -1.0;
                rows[source][3] = self.shape[source] as f64 - 1.0;
            } else {
                rows[source][output] = 1.0;
            }
        }
        affine.compose(&Affine::from_rows(rows))
    }
}

impl<T: Clone> Transform<Array3<T>> for Reorient {
    fn apply(&self, volume: &Array3<T>) -> Array3<T> {
        let mut view = volume.view().permuted_axes(self.axes);
        for (axis, &flip) in self.flips.iter().enumerate() {
            if flip {
                view.invert_axis(Axis(axis));
            }
        }
        view.as_standard_layout().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_canonical_is_identity() {
        let affine = Affine::centered([4, 5, 6], [1.0, 2.0, 3.0]);
        let reorient = Reorient::closest_canonical(&affine, [4, 5, 6]);
        assert!(reorient.is_identity());
        assert_eq!(reorient.affine(&affine), affine);
    }

    #[test]
    fn test_las_like_volume() {
        // Voxel axes: 0 -> -y, 1 -> +z, 2 -> -x (with slight obliquity)
        let affine = Affine::from_rows([
            [0.0, 0.0, -1.5, 40.0],
            [-1.0, 0.05, 0.0, 30.0],
            [0.0, 1.2, 0.0, -20.0],
        ]);
        let shape = [4, 5, 3];
        let volume = Array3::from_shape_fn((4, 5, 3), |(i, j, k)| (i * 100 + j * 10 + k) as u16);

        let reorient = Reorient::closest_canonical(&affine, shape);
        assert_eq!(reorient.axes, [2, 0, 1]);
        assert_eq!(reorient.flips, [true, true, false]);
        assert_eq!(reorient.output_shape(), [3, 4, 5]);

        let reoriented = reorient.apply(&volume);
        let new_affine = reorient.affine(&affine);
        assert_eq!(reoriented.shape(), &[3, 4, 5]);
        for (index, &value) in reoriented.indexed_iter() {
            let (x, y, z) = index;
            let source = (value / 100, (value / 10) % 10, value % 10);
            let world_new = new_affine.apply([x as f64, y as f64, z as f64]);
            let world_old = affine.apply([source.0 as f64, source.1 as f64, source.2 as f64]);
            for i in 0..3 {
                assert!((world_new[i] - world_old[i]).abs() < 1e-9);
            }
        }
        // The reoriented transform points each axis in the positive world direction.
        let linear = new_affine.linear();
        assert!(linear[0][0] > 0.0 && linear[1][1] > 0.0 && linear[2][2] > 0.0);
    }
}
