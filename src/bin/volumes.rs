use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressFinish};
use rayon::prelude::*;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};

use brain_parcellation::file::{
    default_bar, SourceFileOperations, VolumeFileOperations, LABEL_MARKER,
};
use brain_parcellation::load::NiftiVolume;
use brain_parcellation::report::{
    region_volumes, write_reports_csv, write_reports_parquet, RegionNames, VolumeReport,
};
use brain_parcellation::{TableError, VolumeError};

const DEFAULT_OUTPUT_FILENAME: &str = "volumes.csv";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("No label volumes found in source path: {}", path.display()))]
    NoSources { path: PathBuf },

    #[snafu(display("Error reading source list {}", path.display()))]
    ReadSources {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display("Error reading label volume {}", path.display()))]
    ReadLabels {
        path: PathBuf,
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("Error loading region names"))]
    LoadRegions {
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Error writing volume table"))]
    WriteTable {
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Invalid output extension for {}, supported extensions: {}", path.display(), supported.join(", ")))]
    InvalidOutputExtension {
        path: PathBuf,
        supported: Vec<&'static str>,
    },
}

#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    fn from_extension(path: &Path) -> Result<Self, Error> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => Ok(OutputFormat::Csv),
            Some("parquet") => Ok(OutputFormat::Parquet),
            _ => Err(Error::InvalidOutputExtension {
                path: path.to_path_buf(),
                supported: vec!["csv", "parquet"],
            }),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author = "The brain-parcellation developers", version = env!("CARGO_PKG_VERSION"), about = "Tabulate per-region voxel counts of combined label volumes", long_about = None)]
struct Args {
    #[arg(
        help = "Source path. Can be a label volume, a directory searched for *_280.nii(.gz) files, or a text file with label volume paths"
    )]
    source: PathBuf,

    #[arg(help = format!("Output filepath, extension determines format: .csv or .parquet (default: <source>/{DEFAULT_OUTPUT_FILENAME})"))]
    output: Option<PathBuf>,

    #[arg(help = "Region names table", long = "regions", short = 'r')]
    regions: PathBuf,
}

fn main() {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

/// Image identifier of a label volume: its stem without the label marker.
fn uid(path: &Path) -> String {
    let stem = path.volume_stem().unwrap_or_default();
    match stem.strip_suffix(LABEL_MARKER) {
        Some(uid) => uid.to_string(),
        None => stem,
    }
}

fn find_sources(source: &Path) -> Result<Vec<PathBuf>, Error> {
    if source.is_dir() {
        let sources = source
            .find_volumes_with_spinner()
            .map_err(|_| Error::InvalidSourcePath {
                path: source.to_path_buf(),
            })?
            .into_iter()
            .filter(|path| path.is_label_volume())
            .collect();
        Ok(sources)
    } else if source.is_file() && source.extension().is_some_and(|ext| ext == "txt") {
        source.read_paths().context(ReadSourcesSnafu { path: source })
    } else if source.is_nifti_file() {
        Ok(vec![source.to_path_buf()])
    } else {
        Err(Error::InvalidSourcePath {
            path: source.to_path_buf(),
        })
    }
}

fn read_report(path: &Path, regions: &RegionNames) -> Result<VolumeReport, Error> {
    let labels = NiftiVolume::open(path).context(ReadLabelsSnafu { path })?;
    let labels = labels.data.mapv(|v| v.round().clamp(0.0, u16::MAX as f32) as u16);
    Ok(region_volumes(&uid(path), &labels.view(), regions))
}

fn run(args: Args) -> Result<(), Error> {
    let sources = find_sources(&args.source)?;
    if sources.is_empty() {
        return Err(Error::NoSources {
            path: args.source.to_path_buf(),
        });
    }
    let dest = match args.output {
        Some(output) if output.is_dir() => Err(Error::InvalidOutputPath { path: output }),
        Some(output) => Ok(output),
        None if args.source.is_dir() => Ok(args.source.join(DEFAULT_OUTPUT_FILENAME)),
        None => Ok(args.source.with_file_name(DEFAULT_OUTPUT_FILENAME)),
    }?;
    let format = OutputFormat::from_extension(&dest)?;
    let regions = RegionNames::from_path(&args.regions).context(LoadRegionsSnafu)?;
    info!("Number of label volumes found: {}", sources.len());

    let pb = default_bar(sources.len() as u64).with_finish(ProgressFinish::AndLeave);
    pb.set_message("Counting region volumes");
    let reports = sources
        .par_iter()
        .progress_with(pb)
        .map(|path| read_report(path, &regions))
        .collect::<Result<Vec<_>, _>>()?;

    match format {
        OutputFormat::Csv => write_reports_csv(&dest, &reports, &regions),
        OutputFormat::Parquet => write_reports_parquet(&dest, &reports, &regions),
    }
    .context(WriteTableSnafu)?;
    info!("Wrote {}", dest.display());
    Ok(())
}
