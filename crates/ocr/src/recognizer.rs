pub use phonescan_core::SegmentationMode;
use phonescan_core::RecognizerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available — build with `tesseract` feature")]
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizeOptions {
    pub char_whitelist: String,
    pub segmentation: SegmentationMode,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self {
            char_whitelist: "0123456789+()- ".to_string(),
            segmentation: SegmentationMode::SingleBlock,
        }
    }
}

impl From<&RecognizerConfig> for RecognizeOptions {
    fn from(config: &RecognizerConfig) -> Self {
        Self {
            char_whitelist: config.char_whitelist.clone(),
            segmentation: config.segmentation,
        }
    }
}

/// Abstraction over an OCR backend.
/// Implementations accept encoded PNG bytes and return the recognized text.
/// Any engine state must be acquired inside `recognize` and released before it
/// returns, on success and failure alike.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8], options: &RecognizeOptions) -> Result<String, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image_bytes: &[u8], options: &RecognizeOptions) -> Result<String, OcrError> {
        (**self).recognize(image_bytes, options)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string — useful for exercising the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

/// Stand-in used when the binary was built without an engine.
pub struct UnavailableRecognizer;

impl OcrBackend for UnavailableRecognizer {
    fn recognize(&self, _image_bytes: &[u8], _options: &RecognizeOptions) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

/// The best engine compiled into this build.
pub fn default_backend(config: &RecognizerConfig) -> Box<dyn OcrBackend> {
    #[cfg(feature = "tesseract")]
    {
        Box::new(tesseract_backend::TesseractRecognizer::new(
            config.data_path.clone(),
            &config.language,
        ))
    }
    #[cfg(not(feature = "tesseract"))]
    {
        tracing::debug!(language = %config.language, "no OCR engine compiled in");
        Box::new(UnavailableRecognizer)
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError, RecognizeOptions};
    use leptess::{LepTess, Variable};

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        // The engine handle lives only for this call; dropping `lt` tears it
        // down on every return path.
        fn recognize(&self, image_bytes: &[u8], options: &RecognizeOptions) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditCharWhitelist, &options.char_whitelist)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, options.segmentation.psm())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}
