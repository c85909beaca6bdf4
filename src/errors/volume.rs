pub use snafu::{Snafu, Whatever};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VolumeError {
    #[snafu(display("IO error on volume file {}", path.display()))]
    IOError {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("error reading NIfTI file {}", path.display()))]
    ReadError {
        path: PathBuf,
        #[snafu(source(from(nifti::NiftiError, Box::new)))]
        source: Box<nifti::NiftiError>,
    },

    #[snafu(display("error writing NIfTI file {}", path.display()))]
    WriteError {
        path: PathBuf,
        #[snafu(source(from(nifti::NiftiError, Box::new)))]
        source: Box<nifti::NiftiError>,
    },

    #[snafu(display(
        "unsupported volume shape {:?} in {}, expected 3 spatial dimensions",
        shape,
        path.display()
    ))]
    UnsupportedShape { path: PathBuf, shape: Vec<usize> },

    #[snafu(display("voxel-to-world transform of {} is singular", path.display()))]
    SingularAffine { path: PathBuf },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for VolumeError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}
