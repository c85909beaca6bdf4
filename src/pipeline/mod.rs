//! Per-image processing and batch runs over a folder of scans.
pub mod config;

pub use config::{Geometry, MaskSettings, PipelineConfig};

use indicatif::ProgressFinish;
use ndarray::{Array3, ArrayView3};
use snafu::{OptionExt, Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::{ModelError, TableError, VolumeError};
use crate::file::{default_bar, VolumeFileOperations, LABEL_MARKER};
use crate::load::NiftiVolume;
use crate::model::ModelSet;
use crate::preprocess::{BiasCorrection, NoBiasCorrection, PreprocessError, Preprocessor};
use crate::remap::RemapTable;
use crate::report::{region_volumes, write_reports_csv, RegionNames};
use crate::save::SaveNifti;
use crate::stages::{crop_brain, parcellate, postprocess, separate_hemispheres, strip_skull};
use crate::transform::{Interpolation, Resample, Transform};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("Invalid input folder: {}", path.display()))]
    InvalidInputFolder { path: PathBuf },

    #[snafu(display("No NIfTI volumes found in input folder: {}", path.display()))]
    NoVolumes { path: PathBuf },

    #[snafu(display("Error searching {} for volumes", path.display()))]
    Search {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("Could not create output folder {}", path.display()))]
    OutputFolder {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("Cannot derive an output name from {}", path.display()))]
    InvalidName { path: PathBuf },

    #[snafu(display("Error preprocessing {}", path.display()))]
    Preprocess {
        #[snafu(source(from(PreprocessError, Box::new)))]
        source: Box<PreprocessError>,
        path: PathBuf,
    },

    #[snafu(display("Error segmenting {}", path.display()))]
    Segment {
        #[snafu(source(from(ModelError, Box::new)))]
        source: Box<ModelError>,
        path: PathBuf,
    },

    #[snafu(display("Error writing volume for {}", path.display()))]
    WriteVolume {
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
        path: PathBuf,
    },

    #[snafu(display("Error writing volume report for {}", path.display()))]
    WriteReport {
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
        path: PathBuf,
    },

    #[snafu(display("Cannot map labels back onto the grid of {}", path.display()))]
    RestoreGrid { path: PathBuf },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for PipelineError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}

/// Files written for one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutputs {
    pub directory: PathBuf,
    pub source_copy: PathBuf,
    pub labels: PathBuf,
    pub report: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: Vec<ImageOutputs>,
    pub failed: Vec<PathBuf>,
}

pub struct Pipeline<B = NoBiasCorrection> {
    pub config: PipelineConfig,
    pub preprocessor: Preprocessor<B>,
    pub models: ModelSet,
    pub remap: RemapTable,
    pub regions: RegionNames,
}

impl Pipeline<NoBiasCorrection> {
    pub fn new<P: AsRef<Path>>(
        config: PipelineConfig,
        work_dir: P,
        models: ModelSet,
        remap: RemapTable,
        regions: RegionNames,
    ) -> Self {
        Pipeline {
            preprocessor: Preprocessor::new(config.geometry, work_dir),
            config,
            models,
            remap,
            regions,
        }
    }
}

impl<B: BiasCorrection> Pipeline<B> {
    pub fn with_bias_correction<C: BiasCorrection>(self, bias: C) -> Pipeline<C> {
        Pipeline {
            config: self.config,
            preprocessor: self.preprocessor.with_bias_correction(bias),
            models: self.models,
            remap: self.remap,
            regions: self.regions,
        }
    }

    /// Combined labels of a conformed volume, on the conformed grid.
    pub fn segment(&mut self, conformed: &ArrayView3<f32>) -> Result<Array3<u16>, ModelError> {
        let config = &self.config;
        let models = &mut self.models;

        let start = Instant::now();
        let cropped = crop_brain(conformed, models.cropping.as_mut(), &config.mask)?;
        debug!("Cropping took {:.2?}", start.elapsed());

        let start = Instant::now();
        let stripped = strip_skull(
            &cropped.view(),
            conformed,
            models.stripping.as_mut(),
            &config.geometry,
            &config.mask,
        )?;
        debug!("Skull stripping took {:.2?}", start.elapsed());

        let start = Instant::now();
        let parcels = parcellate(
            &stripped.volume.view(),
            &mut models.parcellation,
            config.parcel_classes,
        )?;
        debug!("Parcellation took {:.2?}", start.elapsed());

        let start = Instant::now();
        let laterality = separate_hemispheres(
            &stripped.volume.view(),
            &mut models.hemisphere,
            config.dilation_iterations,
        )?;
        debug!("Hemisphere separation took {:.2?}", start.elapsed());

        Ok(postprocess(
            &parcels.view(),
            &laterality.view(),
            &self.remap,
            &config.midline_parcels,
            &config.geometry.padding(),
            &stripped.shift,
        ))
    }

    /// Run one image end to end and write its outputs under `<output_folder>/<stem>/`.
    pub fn process(
        &mut self,
        source: &Path,
        output_folder: &Path,
    ) -> Result<ImageOutputs, PipelineError> {
        let stem = source
            .volume_stem()
            .context(InvalidNameSnafu { path: source })?;
        let directory = output_folder.join(&stem);
        std::fs::create_dir_all(&directory).context(OutputFolderSnafu { path: &directory })?;

        let prepared = self
            .preprocessor
            .prepare(source, &stem)
            .context(PreprocessSnafu { path: source })?;

        let source_copy = directory.join(format!("{}.nii", stem));
        prepared
            .source
            .save(&source_copy)
            .context(WriteVolumeSnafu { path: source })?;

        let labels = self
            .segment(&prepared.conformed.data.view())
            .context(SegmentSnafu { path: source })?;

        let report = directory.join(format!("{}_volume.csv", stem));
        let volumes = region_volumes(&stem, &labels.view(), &self.regions);
        write_reports_csv(&report, &[volumes], &self.regions)
            .context(WriteReportSnafu { path: source })?;

        let grid = &prepared.source;
        let resample = Resample::new(
            &prepared.conformed.affine,
            &grid.affine,
            grid.shape(),
            Interpolation::Nearest,
        )
        .context(RestoreGridSnafu { path: source })?;
        let restored = grid.with_data(resample.apply(&labels));
        let labels_path = directory.join(format!("{}{}.nii", stem, LABEL_MARKER));
        restored
            .save(&labels_path)
            .context(WriteVolumeSnafu { path: source })?;

        if let Err(e) = self.preprocessor.cleanup(&prepared.intermediate) {
            warn!("{}", Report::from_error(e));
        }

        Ok(ImageOutputs {
            directory,
            source_copy,
            labels: labels_path,
            report,
        })
    }

    /// Process every NIfTI volume under `input_folder`, one after the other.
    ///
    /// A failing image is logged and skipped, unless `strict` is set.
    pub fn run(
        &mut self,
        input_folder: &Path,
        output_folder: &Path,
        strict: bool,
    ) -> Result<BatchSummary, PipelineError> {
        if !input_folder.is_dir() {
            return InvalidInputFolderSnafu { path: input_folder }.fail();
        }
        let sources = input_folder
            .find_volumes_with_spinner()
            .context(SearchSnafu { path: input_folder })?;
        if sources.is_empty() {
            return NoVolumesSnafu { path: input_folder }.fail();
        }
        info!("Number of volumes found: {}", sources.len());

        let pb = default_bar(sources.len() as u64).with_finish(ProgressFinish::AndLeave);
        pb.set_message("Segmenting volumes");

        let mut summary = BatchSummary::default();
        for source in sources {
            let start = Instant::now();
            match self.process(&source, output_folder) {
                Ok(outputs) => {
                    info!(
                        "Processed {} in {:.1?}",
                        source.display(),
                        start.elapsed()
                    );
                    summary.processed.push(outputs);
                }
                Err(e) if strict => return Err(e),
                Err(e) => {
                    error!(
                        "Error processing file {}: {}",
                        source.display(),
                        Report::from_error(&e)
                    );
                    summary.failed.push(source);
                }
            }
            pb.inc(1);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::model::{ModelKind, ModelProvider, SliceModel};
    use crate::stages::cropping::tests::ThresholdModel;
    use ndarray::s;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    const PARCEL_CLASSES: usize = 5;
    const BLOB_LABEL: u16 = 42;

    struct StubProvider;

    impl ModelProvider for StubProvider {
        fn load(&self, kind: ModelKind) -> Result<Box<dyn SliceModel>, ModelError> {
            let classes = match kind {
                ModelKind::Cropping | ModelKind::Stripping => 1,
                ModelKind::Parcellation(_) => PARCEL_CLASSES,
                ModelKind::Hemisphere(_) => 3,
            };
            Ok(Box::new(ThresholdModel::new(classes)))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            geometry: Geometry {
                conform_shape: [32, 32, 32],
                voxel_size: [1.0; 3],
                margins: [4, 2, 4],
                center: [16, 15, 16],
            },
            parcel_classes: PARCEL_CLASSES,
            ..PipelineConfig::default()
        }
    }

    /// Deletes a file whenever its model is released.
    struct RemovingModel {
        inner: ThresholdModel,
        path: PathBuf,
    }

    impl SliceModel for RemovingModel {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn forward(&mut self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
            self.inner.forward(input)
        }

        fn release(&mut self) {
            self.inner.release();
            let _ = fs::remove_file(&self.path);
        }
    }

    struct RemovingProvider {
        path: PathBuf,
    }

    impl ModelProvider for RemovingProvider {
        fn load(&self, kind: ModelKind) -> Result<Box<dyn SliceModel>, ModelError> {
            match kind {
                ModelKind::Cropping => Ok(Box::new(RemovingModel {
                    inner: ThresholdModel::new(1),
                    path: self.path.clone(),
                })),
                _ => StubProvider.load(kind),
            }
        }
    }

    struct DoublingCorrection;

    impl BiasCorrection for DoublingCorrection {
        fn correct(&self, input: &Path, output: &Path) -> Result<(), PreprocessError> {
            let volume = NiftiVolume::open(input).context(crate::preprocess::VolumeSnafu)?;
            volume
                .with_data(volume.data.mapv(|v| v * 2.0))
                .save(output)
                .context(crate::preprocess::VolumeSnafu)?;
            Ok(())
        }
    }

    fn pipeline_with(work_dir: &Path, models: ModelSet) -> Pipeline {
        let remap = RemapTable::from_entries([((1, 1), BLOB_LABEL), ((2, 1), 43)]).unwrap();
        let regions = RegionNames::new(vec![(BLOB_LABEL, "Blob".to_string()), (43, "Other".to_string())]);
        Pipeline::new(config(), work_dir, models, remap, regions)
    }

    fn pipeline(work_dir: &Path) -> Pipeline {
        pipeline_with(work_dir, ModelSet::load(&StubProvider).unwrap())
    }

    fn blob() -> Array3<f32> {
        let mut volume = Array3::zeros((32, 32, 32));
        volume.slice_mut(s![10..14, 12..16, 14..18]).fill(100.0);
        volume
    }

    fn write_source(path: &Path) {
        let affine = Affine::centered([32, 32, 32], [1.0; 3]);
        NiftiVolume::new(blob(), affine).save(path).unwrap();
    }

    #[test]
    fn test_segment_blob() {
        let temp_dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(temp_dir.path());
        let volume = blob();

        let labels = pipeline.segment(&volume.view()).unwrap();
        let expected = volume.mapv(|v| if v > 0.0 { BLOB_LABEL } else { 0 });
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_process_writes_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        let work = temp_dir.path().join("work");
        fs::create_dir_all(&input).unwrap();
        let source = input.join("subject.nii.gz");
        write_source(&source);

        let mut pipeline = pipeline(&work);
        let outputs = pipeline.process(&source, &output).unwrap();

        let directory = output.join("subject");
        assert_eq!(outputs.directory, directory);
        assert_eq!(outputs.source_copy, directory.join("subject.nii"));
        assert_eq!(outputs.labels, directory.join("subject_280.nii"));
        assert_eq!(outputs.report, directory.join("subject_volume.csv"));
        assert!(!work.join("subject.nii").exists());

        let copy = NiftiVolume::open(&outputs.source_copy).unwrap();
        assert_eq!(copy.data, blob());

        let labels = NiftiVolume::open(&outputs.labels).unwrap();
        assert_eq!(labels.affine, copy.affine);
        assert_eq!(
            labels.data,
            blob().mapv(|v| if v > 0.0 { BLOB_LABEL as f32 } else { 0.0 })
        );

        let mut contents = String::new();
        fs::File::open(&outputs.report)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "uid,Blob,Other\nsubject,64,0\n");
    }

    #[test]
    fn test_process_copies_uncorrected_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("subject.nii");
        let output = temp_dir.path().join("output");
        write_source(&source);

        let mut pipeline =
            pipeline(&temp_dir.path().join("work")).with_bias_correction(DoublingCorrection);
        let outputs = pipeline.process(&source, &output).unwrap();

        let copy = NiftiVolume::open(&outputs.source_copy).unwrap();
        assert_eq!(copy.data, blob());
        let labels = NiftiVolume::open(&outputs.labels).unwrap();
        assert_eq!(labels.affine, copy.affine);
        assert_eq!(
            labels.data,
            blob().mapv(|v| if v > 0.0 { BLOB_LABEL as f32 } else { 0.0 })
        );
    }

    #[test]
    fn test_process_tolerates_failed_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("subject.nii");
        let output = temp_dir.path().join("output");
        let work = temp_dir.path().join("work");
        write_source(&source);

        let provider = RemovingProvider {
            path: work.join("subject.nii"),
        };
        let mut pipeline = pipeline_with(&work, ModelSet::load(&provider).unwrap());
        let outputs = pipeline.process(&source, &output).unwrap();
        assert!(outputs.labels.is_file());
        assert!(outputs.report.is_file());
        assert!(!work.join("subject.nii").exists());
    }

    #[test]
    fn test_run_skips_failures() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        fs::create_dir_all(&input).unwrap();
        write_source(&input.join("good.nii"));
        fs::write(input.join("bad.nii"), b"not a nifti file").unwrap();

        let mut pipeline = pipeline(&temp_dir.path().join("work"));
        let summary = pipeline.run(&input, &output, false).unwrap();
        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.failed, vec![input.join("bad.nii")]);
        assert!(output.join("good").join("good_280.nii").is_file());
    }

    #[test]
    fn test_run_strict_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("bad.nii"), b"not a nifti file").unwrap();

        let mut pipeline = pipeline(&temp_dir.path().join("work"));
        let result = pipeline.run(&input, &temp_dir.path().join("output"), true);
        assert!(matches!(result, Err(PipelineError::Preprocess { .. })));
    }

    #[test]
    fn test_run_empty_input() {
        let temp_dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&temp_dir.path().join("work"));
        let result = pipeline.run(temp_dir.path(), &temp_dir.path().join("output"), false);
        assert!(matches!(result, Err(PipelineError::NoVolumes { .. })));
    }

    #[test]
    fn test_run_invalid_input() {
        let temp_dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&temp_dir.path().join("work"));
        let missing = temp_dir.path().join("missing");
        let result = pipeline.run(&missing, &temp_dir.path().join("output"), false);
        assert!(matches!(result, Err(PipelineError::InvalidInputFolder { .. })));
    }
}
