use std::path::{Path, PathBuf};

use crate::detect::backend::{DetectorBackend, DetectorFactory};
use crate::detect::options::{Delegate, DetectorOptions};
use crate::detect::result::DetectorError;

/// Resolves model variants to files in a models directory and loads them
/// with the CPU inference runtime.
#[derive(Clone, Debug)]
pub struct AssetDetectorFactory {
    models_dir: PathBuf,
}

impl AssetDetectorFactory {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, options: &DetectorOptions) -> PathBuf {
        self.models_dir.join(options.model.asset_name())
    }
}

impl DetectorFactory for AssetDetectorFactory {
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn DetectorBackend>, DetectorError> {
        if options.delegate == Delegate::Gpu {
            return Err(DetectorError::gpu(
                "GPU delegate is not supported by the ONNX runtime backend",
            ));
        }
        let path = self.model_path(options);
        if !path.is_file() {
            return Err(DetectorError::other(format!(
                "model asset {} not found",
                path.display()
            )));
        }

        #[cfg(feature = "backend-tract")]
        {
            let mut backend = super::TractBackend::new(&path, options)
                .map_err(|e| DetectorError::other(format!("{:#}", e)))?;
            backend
                .warm_up()
                .map_err(|e| DetectorError::other(format!("detector warm-up failed: {:#}", e)))?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            Err(DetectorError::other(format!(
                "cannot load {}: ONNX inference requires the backend-tract feature",
                path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::options::ModelVariant;
    use crate::detect::result::DetectorErrorCode;

    #[test]
    fn missing_asset_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let factory = AssetDetectorFactory::new(dir.path());
        let options = DetectorOptions::default().with_model(ModelVariant::Lite1);

        let err = factory.create(&options).err().unwrap();
        assert_eq!(err.code, DetectorErrorCode::Other);
        assert!(err.message.contains("efficientdet_lite1.onnx"));
    }

    #[test]
    fn gpu_delegate_is_a_gpu_error() {
        let dir = tempfile::tempdir().unwrap();
        let factory = AssetDetectorFactory::new(dir.path());
        let options = DetectorOptions::default().with_delegate(Delegate::Gpu);

        let err = factory.create(&options).err().unwrap();
        assert_eq!(err.code, DetectorErrorCode::Gpu);
    }

    #[test]
    fn corrupt_asset_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let factory = AssetDetectorFactory::new(dir.path());
        let options = DetectorOptions::default();
        std::fs::write(factory.model_path(&options), b"not a model").unwrap();

        let err = factory.create(&options).err().unwrap();
        assert_eq!(err.code, DetectorErrorCode::Other);
    }
}
