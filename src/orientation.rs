use ndarray::{Array3, Array4, ArrayView3};
use std::fmt;

/// Anatomical plane along which a volume is traversed slice by slice.
///
/// A view is the canonical (x, y, z) volume with its axes permuted so that axis 0 is the
/// traversal axis and axes 1, 2 are the in-plane height and width seen by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Coronal,
    Sagittal,
    Axial,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
            Orientation::Axial => "axial",
        };
        write!(f, "{}", name)
    }
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Coronal,
        Orientation::Sagittal,
        Orientation::Axial,
    ];

    /// Canonical axis shown at each view axis.
    pub const fn axes(self) -> [usize; 3] {
        match self {
            Orientation::Coronal => [1, 2, 0],
            Orientation::Sagittal => [0, 1, 2],
            Orientation::Axial => [2, 1, 0],
        }
    }

    /// Permutation that takes a view back to canonical order.
    pub fn inverse_axes(self) -> [usize; 3] {
        let mut inverse = [0; 3];
        for (position, axis) in self.axes().into_iter().enumerate() {
            inverse[axis] = position;
        }
        inverse
    }

    /// Canonical axis that is traversed slice by slice.
    pub const fn slice_axis(self) -> usize {
        self.axes()[0]
    }

    /// Shape of the view, as (slices, height, width), of a canonical volume.
    pub fn stack_shape(self, canonical: [usize; 3]) -> [usize; 3] {
        self.axes().map(|axis| canonical[axis])
    }

    pub fn view<'a, T>(self, volume: ArrayView3<'a, T>) -> ArrayView3<'a, T> {
        volume.permuted_axes(self.axes())
    }

    pub fn restore<T>(self, view: Array3<T>) -> Array3<T> {
        view.permuted_axes(self.inverse_axes())
    }

    /// Permutation from a stacked field (slice, class, height, width) to (class, x, y, z).
    pub fn field_axes(self) -> [usize; 4] {
        let mut field = [1, 0, 0, 0];
        for (position, axis) in self.axes().into_iter().enumerate() {
            field[axis + 1] = if position == 0 { 0 } else { position + 1 };
        }
        field
    }

    /// Put a stacked per-slice field back into canonical (class, x, y, z) order.
    pub fn restore_field(self, stacked: Array4<f32>) -> Array4<f32> {
        stacked.permuted_axes(self.field_axes())
    }

    /// Whether the in-plane axes of a slice appear in decreasing canonical order.
    pub(crate) fn transposes_plane(self) -> bool {
        let axes = self.axes();
        axes[1] > axes[2]
    }
}
