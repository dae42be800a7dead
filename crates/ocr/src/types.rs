use chrono::{DateTime, Utc};
use phonescan_core::PhoneNumber;
use serde::{Deserialize, Serialize};

/// Where a frame came from. Decides which normalization path it takes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    /// Live camera frame: the user framed the number inside the guide box,
    /// so only the centered region is kept.
    Capture,
    /// Uploaded photo: downsampled if huge, then used whole.
    Upload,
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanSource::Capture => write!(f, "capture"),
            ScanSource::Upload => write!(f, "upload"),
        }
    }
}

impl std::str::FromStr for ScanSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(ScanSource::Capture),
            "upload" => Ok(ScanSource::Upload),
            other => Err(format!("Unknown scan source: '{other}'")),
        }
    }
}

/// Axis-aligned crop rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    /// Centered box covering 80% of the width and 30% of the height.
    /// `None` when either side would round down to zero pixels.
    pub fn centered(width: u32, height: u32) -> Option<Self> {
        let crop_w = (u64::from(width) * 4 / 5) as u32;
        let crop_h = (u64::from(height) * 3 / 10) as u32;
        if crop_w == 0 || crop_h == 0 {
            return None;
        }
        Some(Self {
            x: (width - crop_w) / 2,
            y: (height - crop_h) / 2,
            width: crop_w,
            height: crop_h,
        })
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// A trimmed chunk of recognized text considered for promotion to a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub digit_count: usize,
}

impl Candidate {
    pub fn new(text: &str) -> Self {
        let text = text.trim();
        Self {
            text: text.to_string(),
            digit_count: text.chars().filter(char::is_ascii_digit).count(),
        }
    }

    /// Length in characters, not bytes.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Share of the trimmed text made up of digits (0.0 for an empty chunk).
    pub fn density(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        self.digit_count as f64 / len as f64
    }
}

/// The outcome of one pipeline run. Zero numbers is a valid result, not a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub source: ScanSource,
    /// Raw text handed back by the recognizer.
    pub ocr_text: String,
    /// Validated numbers in first-seen order, no duplicates.
    pub numbers: Vec<PhoneNumber>,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}
