//! Plate track aggregation
//!
//! Consolidates per-frame recognition candidates into one track per physical
//! plate sighting. Repeated noisy readings of the same plate are grouped by
//! normalized string similarity against each track's hit histogram; a track
//! closes on trigger window expiry, idle timeout, or flush, and emits exactly
//! one best representative observation.
//!
//! The tracker is single-threaded by design and must see frames in
//! non-decreasing timestamp order; callers running it behind a concurrent
//! source serialize at the boundary.

use std::collections::HashMap;
use std::time::Duration;

use image::RgbImage;
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::VideoFrame;
use crate::recognizer::RecognitionCandidate;

/// Configuration for track aggregation
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Once a track has been alive this long it is eligible to close and emit
    pub trigger_window: Duration,
    /// Maximum gap since the last supporting hit before a track is closed
    pub max_idle_time: Duration,
    /// Frames the leading text variant must appear in before the track may
    /// report a representative
    pub min_trigger_frame_count: u32,
    /// Minimum normalized similarity for a candidate text to join a track
    pub min_string_similarity: f64,
    /// Fraction of a track's distinct variants that must be similar enough to
    /// a new observation for the match to count
    pub min_group_match_ratio: f64,
    /// Ignore candidates with no geometric plate localization
    pub discard_non_plate_candidates: bool,
    /// Representative thumbnail width in pixels
    pub thumbnail_width: u32,
    /// Representative thumbnail height in pixels
    pub thumbnail_height: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            trigger_window: Duration::from_secs(3),
            max_idle_time: Duration::from_secs(2),
            min_trigger_frame_count: 3,
            min_string_similarity: 0.75,
            min_group_match_ratio: 0.5,
            discard_non_plate_candidates: true,
            thumbnail_width: 256,
            thumbnail_height: 128,
        }
    }
}

/// Invalid tracker configuration, rejected at construction
#[derive(Debug, Error)]
pub enum TrackerConfigError {
    #[error("min_trigger_frame_count must be at least 1")]
    ZeroTriggerFrames,
    #[error("{name} must lie in [0, 1], got {value}")]
    RatioOutOfRange { name: &'static str, value: f64 },
    #[error("thumbnail dimensions must be non-zero")]
    EmptyThumbnail,
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerConfigError> {
        if self.min_trigger_frame_count == 0 {
            return Err(TrackerConfigError::ZeroTriggerFrames);
        }
        for (name, value) in [
            ("min_string_similarity", self.min_string_similarity),
            ("min_group_match_ratio", self.min_group_match_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(TrackerConfigError::RatioOutOfRange { name, value });
            }
        }
        if self.thumbnail_width == 0 || self.thumbnail_height == 0 {
            return Err(TrackerConfigError::EmptyThumbnail);
        }
        Ok(())
    }
}

/// Representative observation retained for a track
#[derive(Debug, Clone)]
struct Representative {
    candidate: RecognitionCandidate,
    frame_id: u64,
    timestamp: f64,
    thumbnail: Option<RgbImage>,
    template_matched: bool,
    hit_weight: u64,
}

/// One running hypothesis that a sequence of candidates is a single plate
#[derive(Debug)]
struct Track {
    id: u64,
    first_frame_id: u64,
    first_timestamp: f64,
    newest_frame_id: u64,
    newest_timestamp: f64,
    /// Hit count per distinct normalized text variant
    hits: HashMap<String, u32>,
    representative: Option<Representative>,
    /// Set once the track has been emitted; no further updates are accepted
    notified: bool,
}

impl Track {
    /// Highest-weight text variant seen so far: weight = count x text length
    fn leading_variant(&self) -> Option<(&str, u32, u64)> {
        self.hits
            .iter()
            .map(|(text, &count)| {
                let weight = count as u64 * text.chars().count() as u64;
                (text.as_str(), count, weight)
            })
            // Deterministic order under histogram iteration
            .max_by(|a, b| (a.2, a.1, std::cmp::Reverse(a.0)).cmp(&(b.2, b.1, std::cmp::Reverse(b.0))))
    }
}

/// A newly opened track, reported for observability
#[derive(Debug, Clone)]
pub struct OpenedTrack {
    pub track_id: u64,
    /// Normalized text of the opening observation
    pub text: String,
    pub first_frame_id: u64,
    pub first_timestamp: f64,
}

/// One closed track: a single physical plate sighting
#[derive(Debug, Clone)]
pub struct ClosedTrack {
    pub track_id: u64,
    /// Leading text variant at close time
    pub plate_text: String,
    /// Best observation retained for this sighting
    pub representative: RecognitionCandidate,
    /// Private copy of the representative's plate region
    pub thumbnail: Option<RgbImage>,
    pub first_frame_id: u64,
    pub first_timestamp: f64,
    pub newest_frame_id: u64,
    pub newest_timestamp: f64,
    pub representative_frame_id: u64,
    pub representative_timestamp: f64,
}

/// Tracks opened and closed while processing one frame
#[derive(Debug, Default)]
pub struct FrameReport {
    pub opened: Vec<OpenedTrack>,
    pub closed: Vec<ClosedTrack>,
}

/// Temporal aggregator turning per-frame candidates into plate sightings
pub struct PlateTracker {
    config: TrackerConfig,
    open: Vec<Track>,
    next_track_id: u64,
}

impl PlateTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            open: Vec::new(),
            next_track_id: 1,
        })
    }

    /// Number of tracks currently under observation
    pub fn open_track_count(&self) -> usize {
        self.open.len()
    }

    /// Feed one frame's candidates into the aggregator
    ///
    /// Frames must arrive in non-decreasing timestamp order.
    pub fn on_frame(
        &mut self,
        frame: &VideoFrame,
        candidates: &[RecognitionCandidate],
    ) -> FrameReport {
        let now = frame.timestamp;
        let mut report = FrameReport::default();

        // Tracks that went idle before this frame close first, so a late
        // reappearance of the same text opens a fresh track instead of
        // reviving a stale one. The trigger window is only checked after the
        // frame's hits are recorded.
        self.sweep_idle(now, &mut report.closed);
        self.prune(now);

        for candidate in candidates {
            if self.config.discard_non_plate_candidates
                && candidate.plate_detection_confidence <= 0.0
            {
                continue;
            }
            let variants = normalized_variants(candidate);
            if variants.is_empty() {
                continue;
            }
            match self.best_matching_track(&variants) {
                Some(index) => self.record_hit(index, frame, candidate, &variants),
                None => {
                    let opened = self.open_track(frame, candidate, &variants);
                    report.opened.push(opened);
                }
            }
        }

        self.sweep(now, &mut report.closed);
        report
    }

    /// Force-emit every open track with a representative and reset state
    ///
    /// Called on stream end or pipeline abort so no qualified sighting is
    /// silently lost. Idempotent: a second flush with no intervening frames
    /// emits nothing.
    pub fn flush(&mut self) -> Vec<ClosedTrack> {
        let mut closed = Vec::new();
        for track in &mut self.open {
            if !track.notified && track.representative.is_some() {
                track.notified = true;
                closed.push(close_record(track));
            }
        }
        if !self.open.is_empty() {
            debug!(
                emitted = closed.len(),
                dropped = self.open.len() - closed.len(),
                "tracker flushed"
            );
        }
        self.open.clear();
        closed
    }

    /// Find the open track whose hit set best matches the candidate variants
    fn best_matching_track(&self, variants: &[String]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, track) in self.open.iter().enumerate() {
            if track.notified {
                continue;
            }
            if let Some(score) = self.track_match_score(track, variants) {
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((index, score));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    /// Best qualifying similarity between the candidate's variants and a
    /// track's recorded variants
    ///
    /// A variant only qualifies when, besides its own best similarity
    /// clearing `min_string_similarity`, at least `min_group_match_ratio` of
    /// the track's distinct variants are similar enough to it. That keeps one
    /// lucky match against a single noisy hit from merging unrelated tracks.
    fn track_match_score(&self, track: &Track, variants: &[String]) -> Option<f64> {
        if track.hits.is_empty() {
            return None;
        }
        let known = track.hits.len();
        let mut best: Option<f64> = None;
        for variant in variants {
            let mut top = 0.0_f64;
            let mut compatible = 0_usize;
            for text in track.hits.keys() {
                let similarity = normalized_levenshtein(variant, text);
                if similarity >= self.config.min_string_similarity {
                    compatible += 1;
                    if similarity > top {
                        top = similarity;
                    }
                }
            }
            if compatible == 0 {
                continue;
            }
            if (compatible as f64 / known as f64) < self.config.min_group_match_ratio {
                continue;
            }
            if best.map_or(true, |current| top > current) {
                best = Some(top);
            }
        }
        best
    }

    fn open_track(
        &mut self,
        frame: &VideoFrame,
        candidate: &RecognitionCandidate,
        variants: &[String],
    ) -> OpenedTrack {
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.open.push(Track {
            id,
            first_frame_id: frame.sequence_number,
            first_timestamp: frame.timestamp,
            newest_frame_id: frame.sequence_number,
            newest_timestamp: frame.timestamp,
            hits: HashMap::new(),
            representative: None,
            notified: false,
        });
        let index = self.open.len() - 1;
        self.record_hit(index, frame, candidate, variants);
        debug!(track = id, text = %variants[0], frame = frame.sequence_number, "opened track");
        OpenedTrack {
            track_id: id,
            text: variants[0].clone(),
            first_frame_id: frame.sequence_number,
            first_timestamp: frame.timestamp,
        }
    }

    /// Record the hit and re-evaluate the track's representative
    fn record_hit(
        &mut self,
        index: usize,
        frame: &VideoFrame,
        candidate: &RecognitionCandidate,
        variants: &[String],
    ) {
        let config = &self.config;
        let track = &mut self.open[index];

        // Each variant counts at most once per incoming candidate.
        for variant in variants {
            *track.hits.entry(variant.clone()).or_insert(0) += 1;
        }
        track.newest_frame_id = frame.sequence_number;
        track.newest_timestamp = frame.timestamp;

        let Some((_, leading_count, leading_weight)) = track.leading_variant() else {
            return;
        };
        if leading_count < config.min_trigger_frame_count {
            return;
        }

        // Template-validated beats raw text; hit weight breaks the tie.
        // Equal on both counts keeps the earlier representative.
        let template_matched = candidate.is_template_matched();
        let replace = match &track.representative {
            None => true,
            Some(current) => {
                (template_matched, leading_weight) > (current.template_matched, current.hit_weight)
            }
        };
        if replace {
            let thumbnail = frame.thumbnail(
                &candidate.bounding_box,
                config.thumbnail_width,
                config.thumbnail_height,
            );
            // The previous representative (and its thumbnail) drops here,
            // releasing its pixels.
            track.representative = Some(Representative {
                candidate: candidate.clone(),
                frame_id: frame.sequence_number,
                timestamp: frame.timestamp,
                thumbnail,
                template_matched,
                hit_weight: leading_weight,
            });
        }
    }

    /// Emit tracks that went idle before this frame was observed
    fn sweep_idle(&mut self, now: f64, closed: &mut Vec<ClosedTrack>) {
        let idle = self.config.max_idle_time.as_secs_f64();
        for track in &mut self.open {
            if track.notified || track.representative.is_none() {
                continue;
            }
            if now - track.newest_timestamp > idle {
                track.notified = true;
                let record = close_record(track);
                info!(
                    track = record.track_id,
                    text = %record.plate_text,
                    "track closed on idle timeout"
                );
                closed.push(record);
            }
        }
    }

    /// Emit every track whose trigger window elapsed as of `now`
    ///
    /// Idle expiry was already handled by `sweep_idle` and `prune` for the
    /// same timestamp, so only the lifetime check remains here.
    fn sweep(&mut self, now: f64, closed: &mut Vec<ClosedTrack>) {
        let trigger = self.config.trigger_window.as_secs_f64();
        for track in &mut self.open {
            if track.notified || track.representative.is_none() {
                continue;
            }
            if now - track.first_timestamp >= trigger {
                track.notified = true;
                let record = close_record(track);
                info!(
                    track = record.track_id,
                    text = %record.plate_text,
                    frames = record.newest_frame_id - record.first_frame_id + 1,
                    "track closed"
                );
                closed.push(record);
            }
        }
    }

    /// Drop tracks idle beyond the limit, emitted or not
    ///
    /// Tracks that never reached the trigger count disappear silently here.
    fn prune(&mut self, now: f64) {
        let idle = self.config.max_idle_time.as_secs_f64();
        self.open.retain(|track| {
            let expired = now - track.newest_timestamp > idle;
            if expired && !track.notified {
                debug!(track = track.id, "dropped track without representative");
            }
            !expired
        });
    }
}

/// Build the emitted record for a track being closed
fn close_record(track: &mut Track) -> ClosedTrack {
    let plate_text = track
        .leading_variant()
        .map(|(text, _, _)| text.to_string())
        .unwrap_or_default();
    // notified is already set; the representative moves out.
    let representative = track
        .representative
        .take()
        .unwrap_or_else(|| unreachable_representative(track.id));
    ClosedTrack {
        track_id: track.id,
        plate_text,
        representative: representative.candidate,
        thumbnail: representative.thumbnail,
        first_frame_id: track.first_frame_id,
        first_timestamp: track.first_timestamp,
        newest_frame_id: track.newest_frame_id,
        newest_timestamp: track.newest_timestamp,
        representative_frame_id: representative.frame_id,
        representative_timestamp: representative.timestamp,
    }
}

/// Callers only close tracks that hold a representative
fn unreachable_representative(track_id: u64) -> Representative {
    debug!(track = track_id, "closed a track without representative");
    Representative {
        candidate: RecognitionCandidate {
            bounding_box: crate::recognizer::BoundingBox { left: 0, top: 0, width: 0, height: 0 },
            plate_region_vertices: vec![],
            dark_on_light: false,
            plate_detection_confidence: 0.0,
            matches: vec![],
        },
        frame_id: 0,
        timestamp: 0.0,
        thumbnail: None,
        template_matched: false,
        hit_weight: 0,
    }
}

/// Whitespace-stripped text variants of a candidate, each at most once
fn normalized_variants(candidate: &RecognitionCandidate) -> Vec<String> {
    let mut variants: Vec<String> = Vec::with_capacity(candidate.matches.len());
    for country_match in &candidate.matches {
        let normalized: String = country_match
            .text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if normalized.is_empty() || variants.contains(&normalized) {
            continue;
        }
        variants.push(normalized);
    }
    variants
}
