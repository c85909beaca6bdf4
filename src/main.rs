use std::num::NonZero;
use std::path::PathBuf;
use std::thread::available_parallelism;

use clap::Parser;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, warn, Level};

use brain_parcellation::model::{Device, ModelSet};
use brain_parcellation::pipeline::{Pipeline, PipelineConfig, PipelineError};
use brain_parcellation::remap::RemapTable;
use brain_parcellation::report::RegionNames;
use brain_parcellation::{ModelError, TableError};

const DEFAULT_REMAP_FILENAME: &str = "split_map.csv";
const DEFAULT_REGIONS_FILENAME: &str = "Level5.txt";
const DEFAULT_WORK_DIRNAME: &str = ".intermediate";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid model folder: {}", path.display()))]
    InvalidModelFolder { path: PathBuf },

    #[snafu(display("Failed to load models from {}", path.display()))]
    LoadModels {
        path: PathBuf,
        #[snafu(source(from(ModelError, Box::new)))]
        source: Box<ModelError>,
    },

    #[snafu(display("Failed to load table"))]
    LoadTable {
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Pipeline failed"))]
    Pipeline {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}

#[derive(Parser, Debug)]
#[command(author = "The brain-parcellation developers", version = env!("CARGO_PKG_VERSION"), about = "Parcellate brain MRI volumes into anatomical regions per hemisphere", long_about = None)]
struct Args {
    #[arg(help = "Input folder, searched recursively for .nii and .nii.gz volumes")]
    input: PathBuf,

    #[arg(help = "Output folder, one subfolder is written per input volume")]
    output: PathBuf,

    #[arg(
        help = "Model folder containing CNet/, SSNet/, PNet/ and HNet/",
        long = "models",
        short = 'm'
    )]
    models: PathBuf,

    #[arg(
        help = format!("Remap table CSV (default: <models>/{DEFAULT_REMAP_FILENAME})"),
        long = "remap",
        short = 'r'
    )]
    remap: Option<PathBuf>,

    #[arg(
        help = format!("Region names table (default: <models>/{DEFAULT_REGIONS_FILENAME})"),
        long = "regions",
        short = 'n'
    )]
    regions: Option<PathBuf>,

    #[arg(
        help = format!("Folder for intermediate volumes (default: <output>/{DEFAULT_WORK_DIRNAME})"),
        long = "work-dir",
        short = 'w'
    )]
    work_dir: Option<PathBuf>,

    #[arg(
        help = "Device to run the models on",
        long = "device",
        short = 'd',
        value_parser = clap::value_parser!(Device),
        default_value_t = Device::default(),
    )]
    device: Device,

    #[arg(
        help = "Number of threads (default: available parallelism)",
        long = "threads",
        short = 't'
    )]
    threads: Option<usize>,

    #[arg(
        help = "Abort on the first volume that fails to process",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(help = "Enable debug logging", long = "verbose", short = 'v', default_value_t = false)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
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

#[cfg(feature = "onnx")]
fn load_models(args: &Args, threads: usize) -> Result<ModelSet, ModelError> {
    use brain_parcellation::model::onnx::OnnxModelProvider;

    let provider = OnnxModelProvider {
        root: args.models.clone(),
        device: args.device,
        threads,
    };
    ModelSet::load(&provider)
}

#[cfg(not(feature = "onnx"))]
fn load_models(_args: &Args, _threads: usize) -> Result<ModelSet, ModelError> {
    Err(ModelError::NoBackend)
}

fn run(args: Args) -> Result<(), Error> {
    if !args.models.is_dir() {
        return Err(Error::InvalidModelFolder {
            path: args.models.clone(),
        });
    }
    let threads = args
        .threads
        .unwrap_or_else(|| available_parallelism().map(NonZero::get).unwrap_or(1));
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        warn!("Could not configure the global thread pool: {}", e);
    }

    let remap_path = args
        .remap
        .clone()
        .unwrap_or_else(|| args.models.join(DEFAULT_REMAP_FILENAME));
    let regions_path = args
        .regions
        .clone()
        .unwrap_or_else(|| args.models.join(DEFAULT_REGIONS_FILENAME));
    let work_dir = args
        .work_dir
        .clone()
        .unwrap_or_else(|| args.output.join(DEFAULT_WORK_DIRNAME));

    let remap = RemapTable::from_csv_path(&remap_path).context(LoadTableSnafu)?;
    let regions = RegionNames::from_path(&regions_path).context(LoadTableSnafu)?;
    info!(
        "Loaded {} region names from {}",
        regions.len(),
        regions_path.display()
    );

    let models = load_models(&args, threads).context(LoadModelsSnafu {
        path: args.models.clone(),
    })?;
    info!("Running on {} with {} threads", args.device, threads);

    let mut pipeline = Pipeline::new(PipelineConfig::default(), work_dir, models, remap, regions);
    let summary = pipeline
        .run(&args.input, &args.output, args.strict)
        .context(PipelineSnafu)?;

    info!(
        "Processed {} volumes, {} failed",
        summary.processed.len(),
        summary.failed.len()
    );
    for path in summary.failed.iter() {
        error!("Failed: {}", path.display());
    }
    Ok(())
}
