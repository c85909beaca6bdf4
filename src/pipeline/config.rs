use crate::transform::Padding;

pub const DEFAULT_CONFORM_SIZE: usize = 256;
pub const DEFAULT_MARGINS: [usize; 3] = [32, 16, 32];
pub const DEFAULT_WORKING_CENTER: [usize; 3] = [128, 120, 128];
pub const DEFAULT_PARCEL_CLASSES: usize = 142;
/// Parcels on the midline that keep their label without a hemisphere.
pub const DEFAULT_MIDLINE_PARCELS: [u8; 2] = [87, 138];
pub const DEFAULT_DILATION_ITERATIONS: usize = 5;

/// Grids the pipeline works on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Shape of the conformed RAS+ grid.
    pub conform_shape: [usize; 3],
    /// Voxel spacing of the conformed grid in millimetres.
    pub voxel_size: [f64; 3],
    /// Margins cut from each side of the conformed grid to form the working grid.
    pub margins: [usize; 3],
    /// Voxel of the conformed grid the brain's centre of mass is moved onto.
    pub center: [usize; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            conform_shape: [DEFAULT_CONFORM_SIZE; 3],
            voxel_size: [1.0; 3],
            margins: DEFAULT_MARGINS,
            center: DEFAULT_WORKING_CENTER,
        }
    }
}

impl Geometry {
    pub fn padding(&self) -> Padding {
        Padding::symmetric(self.margins)
    }

    pub fn working_shape(&self) -> [usize; 3] {
        self.padding().cropped_shape(self.conform_shape)
    }
}

/// Binarization of a fused foreground probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSettings {
    /// Voxels strictly above this probability are foreground.
    pub threshold: f32,
    /// Iterations of the 3x3x3 closing applied to the thresholded mask.
    pub closing_iterations: usize,
}

impl Default for MaskSettings {
    fn default() -> Self {
        MaskSettings {
            threshold: 0.5,
            closing_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub geometry: Geometry,
    pub mask: MaskSettings,
    pub parcel_classes: usize,
    pub midline_parcels: Vec<u8>,
    /// Iterations of each hemisphere dilation pass.
    pub dilation_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            geometry: Geometry::default(),
            mask: MaskSettings::default(),
            parcel_classes: DEFAULT_PARCEL_CLASSES,
            midline_parcels: DEFAULT_MIDLINE_PARCELS.to_vec(),
            dilation_iterations: DEFAULT_DILATION_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_working_shape() {
        assert_eq!(Geometry::default().working_shape(), [192, 224, 192]);
    }
}
