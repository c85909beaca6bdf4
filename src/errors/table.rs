use arrow::error::ArrowError;
use parquet::errors::ParquetError;
pub use snafu::{Snafu, Whatever};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    #[snafu(display("IO error on table file {}", path.display()))]
    IOError {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("error reading CSV table {}: {}", path.display(), source))]
    ReadCsv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("error writing CSV table {}: {}", path.display(), source))]
    WriteCsv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("invalid line {} in {}: '{}'", line, path.display(), content))]
    InvalidLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[snafu(display(
        "duplicate remap entry for laterality={}, parcel={}",
        laterality,
        parcel
    ))]
    DuplicateKey { laterality: u8, parcel: u8 },

    #[snafu(display("Arrow error: {:?}", source))]
    Arrow {
        #[snafu(source(from(ArrowError, Box::new)))]
        source: Box<ArrowError>,
    },

    #[snafu(display("Parquet error: {:?}", source))]
    Parquet {
        #[snafu(source(from(ParquetError, Box::new)))]
        source: Box<ParquetError>,
    },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for TableError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}
