//! ONNX Runtime backend. Each network is exported with a single input of shape
//! (1, channels, height, width) and a single logits output of shape (1, classes, height, width).
use ndarray::{Array3, ArrayView3};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{RunOptions, Session};
use ort::value::TensorRef;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::ModelError;
use crate::model::{Device, ModelKind, ModelProvider, SliceModel};

/// ONNX Runtime run option that returns unused arena chunks of the listed devices at the end of a run.
const ARENA_SHRINKAGE_KEY: &str = "memory.enable_memory_arena_shrinkage";

/// Arena to shrink when a model is released, if any.
///
/// The CPU arena lives in host memory and is reused by the next pass, so releasing on the
/// CPU is a no-op.
fn arena_shrink_target(device: Device) -> Option<&'static str> {
    match device {
        Device::Cpu => None,
        Device::Cuda => Some("gpu:0"),
    }
}

fn backend_error(name: &str, error: impl Display) -> ModelError {
    ModelError::Backend {
        name: name.to_string(),
        message: error.to_string(),
    }
}

pub struct OnnxModel {
    name: String,
    session: Session,
    device: Device,
    /// (channels, height, width) of the last evaluated slice.
    last_input: Option<(usize, usize, usize)>,
}

impl OnnxModel {
    pub fn open<P: AsRef<Path>>(
        path: P,
        name: &str,
        device: Device,
        threads: usize,
    ) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ModelError::MissingModel {
                path: path.to_path_buf(),
            });
        }

        let providers = match device {
            Device::Cpu => vec![CPUExecutionProvider::default().build()],
            Device::Cuda => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        };
        let session = Session::builder()
            .map_err(|e| backend_error(name, e))?
            .with_execution_providers(providers)
            .map_err(|e| backend_error(name, e))?
            .with_intra_threads(threads)
            .map_err(|e| backend_error(name, e))?
            .commit_from_file(path)
            .map_err(|e| backend_error(name, e))?;
        debug!("Opened ONNX session for {} on {}", path.display(), device);

        Ok(OnnxModel {
            name: name.to_string(),
            session,
            device,
            last_input: None,
        })
    }

    /// Evaluate one blank slice with arena shrinkage enabled, so device memory held since
    /// the last release goes back to the driver.
    fn shrink_arena(
        &mut self,
        (channels, height, width): (usize, usize, usize),
        target: &str,
    ) -> Result<(), ModelError> {
        let mut options = RunOptions::new().map_err(|e| backend_error(&self.name, e))?;
        options
            .add_config_entry(ARENA_SHRINKAGE_KEY, target)
            .map_err(|e| backend_error(&self.name, e))?;

        let data = vec![0.0f32; channels * height * width];
        let shape = vec![1i64, channels as i64, height as i64, width as i64];
        let tensor = TensorRef::from_array_view((shape, data.as_slice()))
            .map_err(|e| backend_error(&self.name, e))?;
        self.session
            .run_with_options(ort::inputs![tensor], &options)
            .map_err(|e| backend_error(&self.name, e))?;
        Ok(())
    }
}

impl SliceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
        let (channels, height, width) = input.dim();
        self.last_input = Some((channels, height, width));
        let data = input.as_standard_layout();
        let data = data
            .as_slice()
            .ok_or_else(|| backend_error(&self.name, "input slice is not contiguous"))?;
        let shape = vec![1i64, channels as i64, height as i64, width as i64];
        let tensor = TensorRef::from_array_view((shape, data))
            .map_err(|e| backend_error(&self.name, e))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| backend_error(&self.name, e))?;
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| backend_error(&self.name, e))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let classes = match dims.as_slice() {
            [1, classes, h, w] if *h == height && *w == width => *classes,
            _ => {
                return Err(ModelError::UnexpectedOutputShape {
                    name: self.name.clone(),
                    expected: vec![1, 0, height, width],
                    actual: dims,
                })
            }
        };
        Array3::from_shape_vec((classes, height, width), logits.to_vec()).map_err(|e| {
            backend_error(&self.name, e)
        })
    }

    fn release(&mut self) {
        let Some(target) = arena_shrink_target(self.device) else {
            return;
        };
        let Some(dims) = self.last_input.take() else {
            return;
        };
        match self.shrink_arena(dims, target) {
            Ok(()) => debug!("Released {} arena of {}", target, self.name),
            Err(e) => warn!("Could not release device memory of {}: {}", self.name, e),
        }
    }
}

/// Loads models from a folder laid out as `CNet/`, `SSNet/`, `PNet/`, `HNet/`.
#[derive(Debug, Clone)]
pub struct OnnxModelProvider {
    pub root: PathBuf,
    pub device: Device,
    pub threads: usize,
}

impl ModelProvider for OnnxModelProvider {
    fn load(&self, kind: ModelKind) -> Result<Box<dyn SliceModel>, ModelError> {
        let path = self.root.join(kind.relative_path());
        let model = OnnxModel::open(&path, &kind.to_string(), self.device, self.threads)?;
        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Device::Cpu, None)]
    #[case(Device::Cuda, Some("gpu:0"))]
    fn test_arena_shrink_target(#[case] device: Device, #[case] expected: Option<&str>) {
        assert_eq!(arena_shrink_target(device), expected);
    }

    #[test]
    fn test_open_missing_model() {
        let result = OnnxModel::open("/nonexistent/CNet.onnx", "cnet", Device::Cpu, 1);
        assert!(matches!(result, Err(ModelError::MissingModel { .. })));
    }
}
