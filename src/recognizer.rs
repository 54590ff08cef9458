//! Recognition data model and the recognizer capability trait
//!
//! The recognition engine itself lives outside this crate. The pipeline only
//! needs "analyze one frame" as an abstract capability, so any detector/OCR
//! backend that implements [`PlateRecognizer`] can sit behind the dispatch
//! pool, including scripted stubs in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::VideoFrame;

/// Axis-aligned bounding box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// One corner of the precise plate region quadrilateral
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

/// One recognized character inside a country match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Glyph value
    pub glyph: char,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Character bounding box
    pub bounding_box: BoundingBox,
}

/// One textual interpretation of a candidate under a country template,
/// or the raw reading when no template applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryMatch {
    /// Recognized text
    pub text: String,
    /// Country name, empty for raw/unmatched text
    pub country: String,
    /// Country ISO code, empty for raw/unmatched text
    pub country_iso: String,
    /// Match confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Per-character breakdown
    pub elements: Vec<Element>,
}

impl CountryMatch {
    /// Whether this interpretation is a raw reading with no country template
    pub fn is_raw_text(&self) -> bool {
        self.country_iso.is_empty()
    }
}

/// One detected plate-like region in a single frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionCandidate {
    /// Bounding box of the detected region
    pub bounding_box: BoundingBox,
    /// Precise plate outline when region detection localized one
    pub plate_region_vertices: Vec<Vertex>,
    /// True when dark glyphs sit on a light background
    pub dark_on_light: bool,
    /// Confidence of the geometric plate localization; non-positive for
    /// pure-text detections that carry no plate geometry
    pub plate_detection_confidence: f32,
    /// Textual interpretations, best first
    pub matches: Vec<CountryMatch>,
}

impl RecognitionCandidate {
    /// A template-validated candidate carries more than one interpretation
    /// (the syntax-checked reading plus the raw fallback)
    pub fn is_template_matched(&self) -> bool {
        self.matches.len() > 1
    }

    /// Best interpretation, if any
    pub fn best_match(&self) -> Option<&CountryMatch> {
        self.matches.first()
    }
}

/// Error captured from a recognizer backend for a single frame
///
/// Per-frame failures never abort the pipeline; they travel with the result
/// so the caller can decide what to do with the affected frame.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RecognizerError {
    pub message: String,
}

impl RecognizerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Abstract "analyze one frame" capability
///
/// Implementations must not mutate the frame and must not share mutable
/// state across instances: the dispatch pool runs one instance per worker,
/// concurrently.
pub trait PlateRecognizer: Send {
    /// Look for plate candidates in a single frame
    fn recognize(
        &mut self,
        frame: &VideoFrame,
    ) -> Result<Vec<RecognitionCandidate>, RecognizerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_for(text: &str, iso: &str) -> CountryMatch {
        CountryMatch {
            text: text.to_string(),
            country: if iso.is_empty() { String::new() } else { "Spain".to_string() },
            country_iso: iso.to_string(),
            confidence: 0.9,
            elements: vec![],
        }
    }

    #[test]
    fn test_template_matched() {
        let raw_only = RecognitionCandidate {
            bounding_box: BoundingBox { left: 0, top: 0, width: 10, height: 5 },
            plate_region_vertices: vec![],
            dark_on_light: true,
            plate_detection_confidence: 0.8,
            matches: vec![match_for("1234ABC", "")],
        };
        assert!(!raw_only.is_template_matched());

        let matched = RecognitionCandidate {
            matches: vec![match_for("1234ABC", "ESP"), match_for("1234ABC", "")],
            ..raw_only
        };
        assert!(matched.is_template_matched());
        assert_eq!(matched.best_match().map(|m| m.text.as_str()), Some("1234ABC"));
    }

    #[test]
    fn test_raw_text_flag() {
        assert!(match_for("AB1234", "").is_raw_text());
        assert!(!match_for("AB1234", "ESP").is_raw_text());
    }
}
