use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level settings for a scan run. Every section falls back to defaults
/// when absent from the TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub extract: ExtractConfig,
    pub preprocess: PreprocessConfig,
    pub recognizer: RecognizerConfig,
}

/// Heuristic bounds used to promote a text chunk to a phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Fewest digits a candidate may carry (inclusive).
    pub min_digits: usize,
    /// Most digits a candidate may carry (inclusive).
    pub max_digits: usize,
    /// Digits / trimmed length must be strictly greater than this.
    pub min_density: f64,
    /// Chunks shorter than this (trimmed, in characters) are skipped before
    /// any digit counting. Independent of `min_digits`.
    pub min_chunk_len: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { min_digits: 7, max_digits: 16, min_density: 0.4, min_chunk_len: 7 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Uploaded images larger than this on either side are scaled down so the
    /// larger side matches it.
    pub max_upload_dimension: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { max_upload_dimension: 2000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub language: String,
    /// Directory holding `tessdata`; `None` lets the engine use its default.
    pub data_path: Option<String>,
    pub char_whitelist: String,
    pub segmentation: SegmentationMode,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            data_path: None,
            char_whitelist: "0123456789+()- ".to_string(),
            segmentation: SegmentationMode::default(),
        }
    }
}

/// Layout assumption handed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// A single uniform block of text (Tesseract PSM 6).
    #[default]
    SingleBlock,
    /// A single text line (Tesseract PSM 7), for a tight crop around one number.
    SingleLine,
}

impl SegmentationMode {
    /// Value for the `tessedit_pageseg_mode` variable.
    pub fn psm(self) -> &'static str {
        match self {
            SegmentationMode::SingleBlock => "6",
            SegmentationMode::SingleLine => "7",
        }
    }
}

impl ScanConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: ScanConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.extract;
        if e.min_digits == 0 {
            return Err(ConfigError::Invalid("extract.min_digits must be at least 1".into()));
        }
        if e.min_digits > e.max_digits {
            return Err(ConfigError::Invalid(format!(
                "extract.min_digits ({}) exceeds extract.max_digits ({})",
                e.min_digits, e.max_digits
            )));
        }
        if !(0.0..1.0).contains(&e.min_density) {
            return Err(ConfigError::Invalid(format!(
                "extract.min_density must be in [0, 1), got {}",
                e.min_density
            )));
        }
        if self.preprocess.max_upload_dimension == 0 {
            return Err(ConfigError::Invalid(
                "preprocess.max_upload_dimension must be positive".into(),
            ));
        }
        if self.recognizer.char_whitelist.is_empty() {
            return Err(ConfigError::Invalid("recognizer.char_whitelist is empty".into()));
        }
        Ok(())
    }
}
