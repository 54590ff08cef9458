//! Pipeline Configuration
//!
//! User settings for the recognition pipeline stored in TOML format.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackerConfig;

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Dispatch pool settings
    pub pool: PoolSettings,
    /// Track aggregation settings
    pub tracking: TrackingSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

/// Dispatch pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Number of concurrent recognition workers
    pub capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { capacity: 2 }
    }
}

/// Track aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Seconds a track lives before it may close and report
    pub trigger_window_sec: f64,
    /// Seconds without a supporting hit before a track closes
    pub max_idle_time_sec: f64,
    /// Frames the leading text must appear in before reporting
    pub min_trigger_frame_count: u32,
    /// Minimum normalized text similarity to join a track (0.0 - 1.0)
    pub min_string_similarity: f64,
    /// Fraction of a track's variants that must match a new reading (0.0 - 1.0)
    pub min_group_match_ratio: f64,
    /// Ignore detections without plate geometry
    pub discard_non_plate_candidates: bool,
    /// Saved thumbnail width in pixels
    pub thumbnail_width: u32,
    /// Saved thumbnail height in pixels
    pub thumbnail_height: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            trigger_window_sec: 3.0,
            max_idle_time_sec: 2.0,
            min_trigger_frame_count: 3,
            min_string_similarity: 0.75,
            min_group_match_ratio: 0.5,
            discard_non_plate_candidates: true,
            thumbnail_width: 256,
            thumbnail_height: 128,
        }
    }
}

impl TrackingSettings {
    /// Convert to the tracker's runtime configuration
    pub fn to_tracker_config(&self) -> Result<TrackerConfig> {
        for (name, value) in [
            ("trigger_window_sec", self.trigger_window_sec),
            ("max_idle_time_sec", self.max_idle_time_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }
        let config = TrackerConfig {
            trigger_window: Duration::from_secs_f64(self.trigger_window_sec),
            max_idle_time: Duration::from_secs_f64(self.max_idle_time_sec),
            min_trigger_frame_count: self.min_trigger_frame_count,
            min_string_similarity: self.min_string_similarity,
            min_group_match_ratio: self.min_group_match_ratio,
            discard_non_plate_candidates: self.discard_non_plate_candidates,
            thumbnail_width: self.thumbnail_width,
            thumbnail_height: self.thumbnail_height,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Load settings from file
pub fn load_settings(path: &Path) -> Result<PipelineSettings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings: PipelineSettings = toml::from_str(&content)?;
    Ok(settings)
}

/// Save settings to file
pub fn save_settings(settings: &PipelineSettings, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)
        .with_context(|| format!("writing settings to {}", path.display()))?;
    Ok(())
}
