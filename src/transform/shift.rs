use ndarray::{Array3, ArrayView3};

use crate::transform::{InvertibleTransform, Transform};

/// Integer translation applied as a cyclic roll along each axis.
///
/// A voxel at index `i` moves to `(i + offset) mod n`, matching `numpy.roll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpatialShift {
    pub offsets: [isize; 3],
}

impl SpatialShift {
    pub fn new(offsets: [isize; 3]) -> Self {
        SpatialShift { offsets }
    }

    /// Shift that moves voxel `from` onto voxel `to`.
    pub fn between(from: [usize; 3], to: [usize; 3]) -> Self {
        Self::new(std::array::from_fn(|i| to[i] as isize - from[i] as isize))
    }

    pub fn negated(&self) -> Self {
        Self::new(self.offsets.map(|o| -o))
    }

    pub fn is_zero(&self) -> bool {
        self.offsets.iter().all(|&o| o == 0)
    }
}

/// Cyclic roll of a volume by `offsets` voxels along each axis.
pub fn roll<T: Clone>(volume: &ArrayView3<T>, offsets: [isize; 3]) -> Array3<T> {
    let (nx, ny, nz) = volume.dim();
    if nx == 0 || ny == 0 || nz == 0 {
        return volume.to_owned();
    }
    let source = |index: usize, offset: isize, n: usize| {
        (index as isize - offset).rem_euclid(n as isize) as usize
    };
    Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| {
        volume[[
            source(x, offsets[0], nx),
            source(y, offsets[1], ny),
            source(z, offsets[2], nz),
        ]]
        .clone()
    })
}

impl<T: Clone> Transform<Array3<T>> for SpatialShift {
    fn apply(&self, volume: &Array3<T>) -> Array3<T> {
        roll(&volume.view(), self.offsets)
    }
}

impl<T: Clone> InvertibleTransform<Array3<T>> for SpatialShift {
    fn invert(&self, volume: &Array3<T>) -> Array3<T> {
        roll(&volume.view(), self.negated().offsets)
    }
}
