use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use snafu::ResultExt;
use std::path::Path;
use tracing::debug;

use crate::affine::Affine;
use crate::errors::volume::WriteSnafu;
use crate::errors::VolumeError;
use crate::load::NiftiVolume;

// Trait for writing a volume and its voxel-to-world transform to a NIfTI-1 file.
// Compression follows the file extension (`.nii.gz` is gzipped).
pub trait SaveNifti {
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError>;
}

fn header_for(affine: &Affine) -> NiftiHeader {
    let mut header = NiftiHeader {
        scl_slope: 1.0,
        scl_inter: 0.0,
        ..NiftiHeader::default()
    };
    affine.write_to_header(&mut header);
    header
}

/// Implement saving for each supported voxel type
macro_rules! impl_save_nifti {
    ($($voxel:ty),+) => {
        $(
            impl SaveNifti for NiftiVolume<$voxel> {
                fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
                    let path = path.as_ref();
                    let header = header_for(&self.affine);
                    WriterOptions::new(path)
                        .reference_header(&header)
                        .write_nifti(&self.data)
                        .context(WriteSnafu { path })?;
                    debug!(
                        "Wrote {} ({}) with shape {:?}",
                        path.display(),
                        stringify!($voxel),
                        self.shape()
                    );
                    Ok(())
                }
            }
        )+
    };
}

impl_save_nifti!(f32, u8, u16);
