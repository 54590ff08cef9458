//! Persistence of closed tracks
//!
//! Each closed track becomes a pair of files in the output directory: a JSON
//! record of the sighting and a JPEG thumbnail of the representative plate
//! region. File names embed frame id, timestamp and plate text so a directory
//! listing reads as a chronological log.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::recognizer::RecognitionCandidate;
use crate::tracker::ClosedTrack;

/// Longest plate text fragment embedded in a file name
const MAX_NAME_TEXT: usize = 50;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("track record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("thumbnail encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Identity of a sighting: where in the stream the track lived
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub track_id: u64,
    pub first_frame_id: u64,
    pub first_timestamp: f64,
    pub newest_frame_id: u64,
    pub newest_timestamp: f64,
    pub representative_frame_id: u64,
    pub representative_timestamp: f64,
}

/// The headline reading of a sighting
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecognition {
    pub plate_text: String,
    pub country: String,
    pub country_iso: String,
    pub confidence: f32,
    pub template_matched: bool,
}

/// Full on-disk record for one closed track
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub metadata: TrackMetadata,
    pub recognition: TrackRecognition,
    /// Complete representative candidate, including per-character elements
    pub candidate_details: RecognitionCandidate,
    /// Thumbnail file name next to this record, when one was captured
    pub thumbnail_file: Option<String>,
}

impl TrackRecord {
    fn from_track(track: &ClosedTrack, thumbnail_file: Option<String>) -> Self {
        let best = track.representative.best_match();
        Self {
            metadata: TrackMetadata {
                track_id: track.track_id,
                first_frame_id: track.first_frame_id,
                first_timestamp: track.first_timestamp,
                newest_frame_id: track.newest_frame_id,
                newest_timestamp: track.newest_timestamp,
                representative_frame_id: track.representative_frame_id,
                representative_timestamp: track.representative_timestamp,
            },
            recognition: TrackRecognition {
                plate_text: track.plate_text.clone(),
                country: best.map(|m| m.country.clone()).unwrap_or_default(),
                country_iso: best.map(|m| m.country_iso.clone()).unwrap_or_default(),
                confidence: best.map(|m| m.confidence).unwrap_or(0.0),
                template_matched: track.representative.is_template_matched(),
            },
            candidate_details: track.representative.clone(),
            thumbnail_file,
        }
    }
}

/// Paths written for one saved track
#[derive(Debug)]
pub struct SavedTrack {
    pub record_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
}

/// Writes closed tracks into one output directory
pub struct TrackSink {
    output_dir: PathBuf,
}

impl TrackSink {
    /// Create the sink, making the output directory if needed
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        debug!(dir = %output_dir.display(), "track sink ready");
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist one closed track as JSON record plus JPEG thumbnail
    pub fn save(&self, track: &ClosedTrack) -> Result<SavedTrack, SinkError> {
        let stem = format!(
            "track_{:06}_{:.2}_{}",
            track.representative_frame_id,
            track.representative_timestamp,
            sanitize_filename(&track.plate_text)
        );

        let thumbnail_path = match &track.thumbnail {
            Some(thumbnail) => {
                let path = self.output_dir.join(format!("{stem}.jpg"));
                thumbnail.save_with_format(&path, image::ImageFormat::Jpeg)?;
                Some(path)
            }
            None => None,
        };
        let thumbnail_file = thumbnail_path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned());

        let record = TrackRecord::from_track(track, thumbnail_file);
        let record_path = self.output_dir.join(format!("{stem}.json"));
        fs::write(&record_path, serde_json::to_string_pretty(&record)?)?;

        info!(
            track = track.track_id,
            text = %track.plate_text,
            file = %record_path.display(),
            "track saved"
        );
        Ok(SavedTrack {
            record_path,
            thumbnail_path,
        })
    }

    /// Write a run summary listing every saved track
    pub fn write_summary(&self, tracks: &[ClosedTrack]) -> Result<PathBuf, SinkError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SummaryEntry {
            track_id: u64,
            plate_text: String,
            first_timestamp: f64,
            newest_timestamp: f64,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Summary {
            track_count: usize,
            tracks: Vec<SummaryEntry>,
        }

        let summary = Summary {
            track_count: tracks.len(),
            tracks: tracks
                .iter()
                .map(|track| SummaryEntry {
                    track_id: track.track_id,
                    plate_text: track.plate_text.clone(),
                    first_timestamp: track.first_timestamp,
                    newest_timestamp: track.newest_timestamp,
                })
                .collect(),
        };
        let path = self.output_dir.join("summary.json");
        fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
        Ok(path)
    }
}

/// Reduce arbitrary plate text to a safe file name fragment
fn sanitize_filename(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .take(MAX_NAME_TEXT)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{BoundingBox, CountryMatch};
    use image::RgbImage;

    fn closed_track(text: &str, with_thumbnail: bool) -> ClosedTrack {
        let representative = RecognitionCandidate {
            bounding_box: BoundingBox { left: 10, top: 20, width: 80, height: 24 },
            plate_region_vertices: vec![],
            dark_on_light: true,
            plate_detection_confidence: 0.92,
            matches: vec![
                CountryMatch {
                    text: text.to_string(),
                    country: "Spain".to_string(),
                    country_iso: "ESP".to_string(),
                    confidence: 0.88,
                    elements: vec![],
                },
                CountryMatch {
                    text: text.to_string(),
                    country: String::new(),
                    country_iso: String::new(),
                    confidence: 0.80,
                    elements: vec![],
                },
            ],
        };
        ClosedTrack {
            track_id: 3,
            plate_text: text.to_string(),
            representative,
            thumbnail: with_thumbnail.then(|| RgbImage::new(256, 128)),
            first_frame_id: 12,
            first_timestamp: 0.48,
            newest_frame_id: 61,
            newest_timestamp: 2.44,
            representative_frame_id: 40,
            representative_timestamp: 1.6,
        }
    }

    #[test]
    fn test_save_writes_record_and_thumbnail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = TrackSink::new(dir.path()).expect("sink");

        let saved = sink.save(&closed_track("1234ABC", true)).expect("save");
        assert!(saved.record_path.exists());
        let thumbnail = saved.thumbnail_path.expect("thumbnail path");
        assert!(thumbnail.exists());
        // Named after the representative frame, not the first detection.
        assert_eq!(
            saved.record_path.file_name().and_then(|n| n.to_str()),
            Some("track_000040_1.60_1234ABC.json")
        );

        let record: TrackRecord = serde_json::from_str(
            &fs::read_to_string(&saved.record_path).expect("read record"),
        )
        .expect("parse record");
        assert_eq!(record.metadata.track_id, 3);
        assert_eq!(record.recognition.plate_text, "1234ABC");
        assert_eq!(record.recognition.country_iso, "ESP");
        assert!(record.recognition.template_matched);
        assert_eq!(
            record.thumbnail_file.as_deref(),
            Some("track_000040_1.60_1234ABC.jpg")
        );
    }

    #[test]
    fn test_save_without_thumbnail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = TrackSink::new(dir.path()).expect("sink");

        let saved = sink.save(&closed_track("1234ABC", false)).expect("save");
        assert!(saved.thumbnail_path.is_none());
        let record: TrackRecord = serde_json::from_str(
            &fs::read_to_string(&saved.record_path).expect("read record"),
        )
        .expect("parse record");
        assert!(record.thumbnail_file.is_none());
    }

    #[test]
    fn test_summary_lists_all_tracks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = TrackSink::new(dir.path()).expect("sink");

        let tracks = vec![closed_track("1234ABC", false), closed_track("777XYZ", false)];
        let path = sink.write_summary(&tracks).expect("summary");
        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse");
        assert_eq!(summary["trackCount"], 2);
        assert_eq!(summary["tracks"][1]["plateText"], "777XYZ");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("1234 ABC"), "1234_ABC");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename(""), "unknown");
        assert_eq!(sanitize_filename(&"X".repeat(80)).len(), MAX_NAME_TEXT);
    }
}
