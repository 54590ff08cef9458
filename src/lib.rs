//! platetrack - Bounded dispatch and track aggregation for plate recognition
//!
//! Core plumbing for a license plate recognition video pipeline: a
//! fixed-capacity [`pool::DispatchPool`] runs recognizer backends
//! concurrently with natural backpressure, and a [`tracker::PlateTracker`]
//! consolidates the per-frame candidates into one reported sighting per
//! physical plate. [`pipeline::PlatePipeline`] wires the two together for a
//! single stream, and [`sink::TrackSink`] persists closed tracks to disk.
//!
//! The recognition engine itself is pluggable: anything implementing
//! [`recognizer::PlateRecognizer`] can run behind the pool.

pub mod config;
pub mod frame;
pub mod pipeline;
pub mod pool;
pub mod recognizer;
pub mod sink;
pub mod tracker;

pub use config::{load_settings, save_settings, PipelineSettings};
pub use frame::{FrameError, VideoFrame};
pub use pipeline::{PipelineError, PlatePipeline};
pub use pool::{AnalysisResult, DispatchPool, PollOutcome, PoolError, TimeoutPolicy};
pub use recognizer::{PlateRecognizer, RecognitionCandidate, RecognizerError};
pub use sink::{SinkError, TrackSink};
pub use tracker::{ClosedTrack, FrameReport, PlateTracker, TrackerConfig};
