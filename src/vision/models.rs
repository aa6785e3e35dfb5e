//! Model management for ONNX Runtime
//!
//! Locates model files on disk, tracks their hashes in a manifest, and wraps
//! loaded sessions. Models are never fetched over the network.

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Model file extensions, in lookup order
pub const MODEL_EXTENSIONS: [&str; 2] = ["onnx", "ort"];

/// Model errors that callers may want to match on
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model '{name}' not found in {dir}")]
    NotFound { name: String, dir: PathBuf },
    #[error("model '{0}' is not loaded")]
    NotLoaded(String),
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Card region detector
    CardDetector,
    /// Text detection model (DBNet)
    TextDetection,
    /// Text recognition model (CRNN), one per language
    TextRecognition,
    /// Character dictionary for recognition, one per language
    Dictionary,
    /// Face detector
    FaceDetection,
}

impl ModelType {
    /// Default base filename, without extension
    pub fn base_name(&self) -> &'static str {
        match self {
            ModelType::CardDetector => "card_detector",
            ModelType::TextDetection => "text_det",
            ModelType::TextRecognition => "text_rec",
            ModelType::Dictionary => "dict",
            ModelType::FaceDetection => "face_detector",
        }
    }

    /// Base filename for a language-specific model
    pub fn language_name(&self, language: &str) -> String {
        format!("{}_{}", self.base_name(), language)
    }

    /// Display name for logging
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::CardDetector => "Card Detector",
            ModelType::TextDetection => "Text Detection",
            ModelType::TextRecognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
            ModelType::FaceDetection => "Face Detection",
        }
    }
}

/// Model manifest tracking known model files
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub recorded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for locating and verifying ONNX models
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Manager over the default data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Find a model by base name, trying `.onnx` then `.ort`
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        MODEL_EXTENSIONS
            .iter()
            .map(|ext| self.models_dir.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
    }

    /// Find a model or fail with [`ModelError::NotFound`]
    pub fn require(&self, name: &str) -> Result<PathBuf, ModelError> {
        self.locate(name).ok_or_else(|| ModelError::NotFound {
            name: name.to_string(),
            dir: self.models_dir.clone(),
        })
    }

    /// Path of a plain auxiliary file (dictionaries)
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.models_dir.join(filename)
    }

    /// Locate, verify against the manifest, and open a session
    pub fn load_session(&self, name: &str) -> Result<OnnxSession> {
        let path = self.require(name)?;
        self.verify(name, &path)?;
        OnnxSession::new(&path)
    }

    /// Compare a model file with its recorded hash, recording it when new
    ///
    /// A changed hash is logged and re-recorded rather than rejected, so that
    /// replacing a model file is a supported upgrade path.
    pub fn verify(&self, name: &str, path: &Path) -> Result<()> {
        let hash = sha256_file(path)?;
        let mut manifest = self.load_manifest().unwrap_or_default();

        match manifest.models.iter().find(|m| m.name == name) {
            Some(existing) if existing.sha256 == hash => {
                debug!("Model {} matches manifest", name);
                return Ok(());
            }
            Some(existing) => {
                warn!(
                    "Model {} changed on disk (was {}, now {})",
                    name, existing.sha256, hash
                );
            }
            None => info!("Recording new model {} ({})", name, hash),
        }

        let size_bytes = std::fs::metadata(path)?.len();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let info = ModelInfo {
            name: name.to_string(),
            filename,
            size_bytes,
            sha256: hash,
            recorded_at: unix_now(),
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.name == name) {
            *existing = info;
        } else {
            manifest.models.push(info);
        }
        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One extracted output tensor
#[derive(Debug, Clone)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// ONNX Runtime session wrapper
///
/// `Session::run` needs exclusive access, so the session sits behind a mutex
/// and one wrapper can be shared between tasks.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            output_names,
        })
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Run a single NCHW input and copy out every f32 output, in output order
    pub fn run(&self, input: Array4<f32>) -> Result<Vec<OutputTensor>> {
        let input_name = self
            .input_names
            .first()
            .cloned()
            .ok_or_else(|| ModelError::UnexpectedOutput("model has no inputs".into()))?;

        let shape = input.shape().to_vec();
        let (data, _offset) = input.into_raw_vec_and_offset();
        let input_value = ort::value::Value::from_array((shape.as_slice(), data))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![input_name.as_str() => input_value])?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            tensors.push(OutputTensor {
                shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
                data: data.to_vec(),
            });
        }
        Ok(tensors)
    }
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("inputs", &self.input_names)
            .field("outputs", &self.output_names)
            .finish()
    }
}
