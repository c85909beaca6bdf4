use snafu::{OptionExt, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::VolumeError;
use crate::load::NiftiVolume;
use crate::pipeline::config::Geometry;
use crate::save::SaveNifti;
use crate::transform::{Interpolation, Resample, Transform};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PreprocessError {
    #[snafu(display("could not create work directory {}", path.display()))]
    WorkDir {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("error preprocessing volume"))]
    Volume {
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("bias correction of {} failed: {}", path.display(), message))]
    BiasCorrection { path: PathBuf, message: String },

    #[snafu(display("cannot conform {}, its voxel-to-world transform is singular", path.display()))]
    Conform { path: PathBuf },

    #[snafu(display("could not remove intermediate file {}", path.display()))]
    Cleanup {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for PreprocessError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}

/// Intensity non-uniformity correction, reading `input` and writing a NIfTI file to `output`.
pub trait BiasCorrection {
    fn correct(&self, input: &Path, output: &Path) -> Result<(), PreprocessError>;
}

/// Copies the intensities unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiasCorrection;

impl BiasCorrection for NoBiasCorrection {
    fn correct(&self, input: &Path, output: &Path) -> Result<(), PreprocessError> {
        let volume = NiftiVolume::open(input).context(VolumeSnafu)?;
        volume.save(output).context(VolumeSnafu)?;
        Ok(())
    }
}

/// The views of an input image the pipeline works with.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Input image as read, reoriented to the closest canonical axes.
    pub source: NiftiVolume<f32>,
    /// Bias corrected image on the grid of `source`.
    pub corrected: NiftiVolume<f32>,
    /// `corrected` resampled onto the conformed grid.
    pub conformed: NiftiVolume<f32>,
    /// Bias corrected file in the work directory.
    pub intermediate: PathBuf,
}

// Responsible for bringing input images onto the conformed grid
pub struct Preprocessor<B = NoBiasCorrection> {
    pub geometry: Geometry,
    pub work_dir: PathBuf,
    pub bias: B,
}

impl Preprocessor<NoBiasCorrection> {
    pub fn new<P: AsRef<Path>>(geometry: Geometry, work_dir: P) -> Self {
        Preprocessor {
            geometry,
            work_dir: work_dir.as_ref().to_path_buf(),
            bias: NoBiasCorrection,
        }
    }
}

impl<B: BiasCorrection> Preprocessor<B> {
    pub fn with_bias_correction<C: BiasCorrection>(self, bias: C) -> Preprocessor<C> {
        Preprocessor {
            geometry: self.geometry,
            work_dir: self.work_dir,
            bias,
        }
    }

    pub fn intermediate_path(&self, stem: &str) -> PathBuf {
        self.work_dir.join(format!("{}.nii", stem))
    }

    pub fn prepare(&self, source: &Path, stem: &str) -> Result<Preprocessed, PreprocessError> {
        std::fs::create_dir_all(&self.work_dir).context(WorkDirSnafu {
            path: self.work_dir.clone(),
        })?;
        let intermediate = self.intermediate_path(stem);
        self.bias.correct(source, &intermediate)?;

        let source_volume = NiftiVolume::open(source)
            .context(VolumeSnafu)?
            .to_canonical();
        let corrected = NiftiVolume::open(&intermediate)
            .context(VolumeSnafu)?
            .to_canonical();
        info!(
            "Loaded {} with shape {:?} and voxel size {:?}",
            source.display(),
            corrected.shape(),
            corrected.voxel_sizes()
        );

        let (resample, affine) = Resample::conform(
            &corrected.affine,
            corrected.shape(),
            self.geometry.conform_shape,
            self.geometry.voxel_size,
            Interpolation::Linear,
        )
        .context(ConformSnafu { path: source })?;
        let conformed = NiftiVolume::new(resample.apply(&corrected.data), affine);
        debug!("Conformed {} to {:?}", source.display(), conformed.shape());

        Ok(Preprocessed {
            source: source_volume,
            corrected,
            conformed,
            intermediate,
        })
    }

    /// Remove the intermediate file of a finished image.
    pub fn cleanup(&self, intermediate: &Path) -> Result<(), PreprocessError> {
        std::fs::remove_file(intermediate).context(CleanupSnafu { path: intermediate })?;
        debug!("Removed {}", intermediate.display());
        Ok(())
    }
}
