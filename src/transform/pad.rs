use ndarray::{s, Array3};
use num::Zero;

use crate::transform::{InvertibleTransform, Transform};

/// Zero margins added before and after the data along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub before: [usize; 3],
    pub after: [usize; 3],
}

impl Padding {
    pub fn symmetric(margins: [usize; 3]) -> Self {
        Padding {
            before: margins,
            after: margins,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.before.iter().chain(self.after.iter()).all(|&m| m == 0)
    }

    pub fn padded_shape(&self, shape: [usize; 3]) -> [usize; 3] {
        std::array::from_fn(|i| shape[i] + self.before[i] + self.after[i])
    }

    /// Shape left once the margins are removed again. Axes shorter than their margins end up empty.
    pub fn cropped_shape(&self, shape: [usize; 3]) -> [usize; 3] {
        std::array::from_fn(|i| shape[i].saturating_sub(self.before[i] + self.after[i]))
    }
}

impl<T: Clone + Zero> Transform<Array3<T>> for Padding {
    fn apply(&self, volume: &Array3<T>) -> Array3<T> {
        let (nx, ny, nz) = volume.dim();
        let [bx, by, bz] = self.before;
        let mut padded = Array3::zeros(self.padded_shape([nx, ny, nz]));
        padded
            .slice_mut(s![bx..bx + nx, by..by + ny, bz..bz + nz])
            .assign(volume);
        padded
    }
}

impl<T: Clone + Zero> InvertibleTransform<Array3<T>> for Padding {
    fn invert(&self, volume: &Array3<T>) -> Array3<T> {
        let (nx, ny, nz) = volume.dim();
        let [bx, by, bz] = self.before;
        let [cx, cy, cz] = self.cropped_shape([nx, ny, nz]);
        volume
            .slice(s![bx..bx + cx, by..by + cy, bz..bz + cz])
            .to_owned()
    }
}
