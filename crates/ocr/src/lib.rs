pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use extract::{extract_numbers, Extractor};
pub use pipeline::{PipelineError, ScanPipeline};
pub use preprocess::{prepare_for_ocr, prepare_for_ocr_from_bytes, PreprocessError};
pub use recognizer::{
    default_backend, MockRecognizer, OcrBackend, OcrError, RecognizeOptions, SegmentationMode,
};
pub use types::{Candidate, RegionOfInterest, ScanResult, ScanSource};
