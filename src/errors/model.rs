pub use snafu::{Snafu, Whatever};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ModelError {
    #[snafu(display("model file not found: {}", path.display()))]
    MissingModel { path: PathBuf },

    #[snafu(display("inference backend error in model {}: {}", name, message))]
    Backend { name: String, message: String },

    #[snafu(display(
        "model {} returned shape {:?}, expected {:?}",
        name,
        actual,
        expected
    ))]
    UnexpectedOutputShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[snafu(display("no inference backend available, rebuild with the `onnx` feature"))]
    NoBackend,

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for ModelError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}
