pub mod config;
pub mod phone;

pub use config::{
    ConfigError, ExtractConfig, PreprocessConfig, RecognizerConfig, ScanConfig,
    SegmentationMode,
};
pub use phone::PhoneNumber;
