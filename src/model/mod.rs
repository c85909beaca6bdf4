use ndarray::{Array3, ArrayView3};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

use crate::errors::ModelError;
use crate::orientation::Orientation;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Views used by the parcellation ensemble, in evaluation order.
pub const PARCELLATION_VIEWS: [Orientation; 3] = [
    Orientation::Coronal,
    Orientation::Sagittal,
    Orientation::Axial,
];

/// Views used by the hemisphere ensemble, in evaluation order.
pub const HEMISPHERE_VIEWS: [Orientation; 2] = [Orientation::Coronal, Orientation::Axial];

/// A 2D network evaluated one slice at a time.
pub trait SliceModel {
    fn name(&self) -> &str;

    /// Evaluate one slice given as (channels, height, width) and return raw logits
    /// shaped (classes, height, width).
    fn forward(&mut self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError>;

    /// Drop transient buffers held on the execution device.
    fn release(&mut self) {}
}

impl<M: SliceModel + ?Sized> SliceModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn forward(&mut self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
        (**self).forward(input)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// The networks a full run needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Cropping,
    Stripping,
    Parcellation(Orientation),
    Hemisphere(Orientation),
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Cropping => write!(f, "cnet"),
            ModelKind::Stripping => write!(f, "ssnet"),
            ModelKind::Parcellation(orientation) => write!(f, "pnet-{}", orientation),
            ModelKind::Hemisphere(orientation) => write!(f, "hnet-{}", orientation),
        }
    }
}

impl ModelKind {
    /// Every model of a run, in the order they are loaded.
    pub fn all() -> impl Iterator<Item = ModelKind> {
        [ModelKind::Cropping, ModelKind::Stripping]
            .into_iter()
            .chain(PARCELLATION_VIEWS.into_iter().map(ModelKind::Parcellation))
            .chain(HEMISPHERE_VIEWS.into_iter().map(ModelKind::Hemisphere))
    }

    /// Location of the model file inside a model folder.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            ModelKind::Cropping => PathBuf::from("CNet").join("CNet.onnx"),
            ModelKind::Stripping => PathBuf::from("SSNet").join("SSNet.onnx"),
            ModelKind::Parcellation(orientation) => {
                PathBuf::from("PNet").join(format!("{}.onnx", orientation))
            }
            ModelKind::Hemisphere(orientation) => {
                PathBuf::from("HNet").join(format!("{}.onnx", orientation))
            }
        }
    }
}

/// Source of loaded models, e.g. a folder of ONNX files.
pub trait ModelProvider {
    fn load(&self, kind: ModelKind) -> Result<Box<dyn SliceModel>, ModelError>;
}

/// Execution device for model evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device_str = match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        };
        write!(f, "{}", device_str)
    }
}

/// One model per orientation of an ensemble, kept in evaluation order.
#[derive(Default)]
pub struct ViewModels {
    entries: Vec<(Orientation, Box<dyn SliceModel>)>,
}

impl ViewModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, orientation: Orientation, model: Box<dyn SliceModel>) -> Self {
        self.entries.push((orientation, model));
        self
    }

    pub fn orientations(&self) -> impl Iterator<Item = Orientation> + '_ {
        self.entries.iter().map(|(orientation, _)| *orientation)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (Orientation, Box<dyn SliceModel>)> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load<P: ModelProvider + ?Sized>(
        provider: &P,
        views: &[Orientation],
        kind: fn(Orientation) -> ModelKind,
    ) -> Result<Self, ModelError> {
        views.iter().try_fold(Self::new(), |models, &orientation| {
            Ok(models.with(orientation, load_logged(provider, kind(orientation))?))
        })
    }
}

/// All networks of a run, loaded once and reused for every image.
pub struct ModelSet {
    pub cropping: Box<dyn SliceModel>,
    pub stripping: Box<dyn SliceModel>,
    pub parcellation: ViewModels,
    pub hemisphere: ViewModels,
}

impl ModelSet {
    pub fn load<P: ModelProvider + ?Sized>(provider: &P) -> Result<Self, ModelError> {
        Ok(ModelSet {
            cropping: load_logged(provider, ModelKind::Cropping)?,
            stripping: load_logged(provider, ModelKind::Stripping)?,
            parcellation: ViewModels::load(provider, &PARCELLATION_VIEWS, ModelKind::Parcellation)?,
            hemisphere: ViewModels::load(provider, &HEMISPHERE_VIEWS, ModelKind::Hemisphere)?,
        })
    }
}

fn load_logged<P: ModelProvider + ?Sized>(
    provider: &P,
    kind: ModelKind,
) -> Result<Box<dyn SliceModel>, ModelError> {
    let model = provider.load(kind)?;
    info!("Loaded model {} ({})", kind, model.name());
    Ok(model)
}
