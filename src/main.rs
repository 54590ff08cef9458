//! platetrack demo - synthetic stream through the recognition pipeline
//!
//! Runs a scripted stand-in recognizer over a generated frame sequence so the
//! dispatch pool, tracker and sink can be exercised end to end without a real
//! recognition engine. Each closed track lands in the output directory as a
//! JSON record plus thumbnail.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use platetrack::config::{load_settings, PipelineSettings};
use platetrack::frame::VideoFrame;
use platetrack::pipeline::PlatePipeline;
use platetrack::pool::DispatchPool;
use platetrack::recognizer::{
    BoundingBox, CountryMatch, Element, PlateRecognizer, RecognitionCandidate, RecognizerError,
};
use platetrack::sink::TrackSink;
use platetrack::tracker::PlateTracker;

/// platetrack - plate recognition pipeline demo
#[derive(Parser, Debug)]
#[command(name = "platetrack")]
#[command(about = "Runs a synthetic plate stream through the recognition pipeline")]
struct Args {
    /// Settings file (TOML); defaults apply when absent
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Output directory for closed track records
    #[arg(short, long, default_value = "tracks_out")]
    output: PathBuf,

    /// Number of synthetic frames to generate
    #[arg(long, default_value = "80")]
    frames: u64,

    /// Synthetic stream frame rate
    #[arg(long, default_value = "10.0")]
    fps: f64,

    /// Override the configured worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One scripted vehicle passing through the synthetic stream
struct Sighting {
    text: &'static str,
    first_frame: u64,
    last_frame: u64,
}

const SIGHTINGS: &[Sighting] = &[
    Sighting { text: "7710GKL", first_frame: 4, last_frame: 22 },
    Sighting { text: "1234ABC", first_frame: 30, last_frame: 52 },
    Sighting { text: "9082CWV", first_frame: 60, last_frame: 74 },
];

/// Stand-in recognizer producing scripted detections with occasional misreads
struct SimulatedRecognizer;

impl SimulatedRecognizer {
    fn candidate_for(&self, frame_id: u64, sighting: &Sighting) -> RecognitionCandidate {
        // Every fifth frame misreads the final character, exercising the
        // tracker's similarity grouping.
        let mut text = sighting.text.to_string();
        let misread = frame_id % 5 == 0;
        if misread {
            text.pop();
            text.push('8');
        }
        let confidence = if misread { 0.62 } else { 0.91 };

        let bounding_box = BoundingBox {
            left: 80 + (frame_id % 7) as i32,
            top: 150,
            width: 120,
            height: 32,
        };
        let elements: Vec<Element> = text
            .chars()
            .enumerate()
            .map(|(index, glyph)| Element {
                glyph,
                confidence,
                bounding_box: BoundingBox {
                    left: bounding_box.left + index as i32 * 16,
                    top: bounding_box.top + 4,
                    width: 14,
                    height: 24,
                },
            })
            .collect();

        // Clean reads carry a country match on top of the raw reading.
        let raw = CountryMatch {
            text: text.clone(),
            country: String::new(),
            country_iso: String::new(),
            confidence,
            elements: elements.clone(),
        };
        let matches = if misread {
            vec![raw]
        } else {
            vec![
                CountryMatch {
                    text,
                    country: "Spain".to_string(),
                    country_iso: "ESP".to_string(),
                    confidence,
                    elements,
                },
                raw,
            ]
        };

        RecognitionCandidate {
            bounding_box,
            plate_region_vertices: vec![],
            dark_on_light: true,
            plate_detection_confidence: confidence,
            matches,
        }
    }
}

impl PlateRecognizer for SimulatedRecognizer {
    fn recognize(
        &mut self,
        frame: &VideoFrame,
    ) -> Result<Vec<RecognitionCandidate>, RecognizerError> {
        let candidates = SIGHTINGS
            .iter()
            .filter(|sighting| {
                (sighting.first_frame..=sighting.last_frame).contains(&frame.sequence_number)
            })
            .map(|sighting| self.candidate_for(frame.sequence_number, sighting))
            .collect();
        Ok(candidates)
    }
}

/// Flat gray test frame with a lighter band where the plate would sit
fn synthetic_frame(sequence: u64, timestamp: f64) -> Result<VideoFrame> {
    const WIDTH: u32 = 320;
    const HEIGHT: u32 = 240;
    let stride = WIDTH * 3;
    let mut data = vec![90u8; (stride * HEIGHT) as usize];
    for y in 150..182usize {
        let row = y * stride as usize;
        for x in 80..200usize {
            let offset = row + x * 3;
            data[offset..offset + 3].copy_from_slice(&[210, 210, 200]);
        }
    }
    Ok(VideoFrame::new(data, WIDTH, HEIGHT, stride, sequence, timestamp)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => PipelineSettings::default(),
    };
    let capacity = args.workers.unwrap_or(settings.pool.capacity);
    info!(capacity, frames = args.frames, fps = args.fps, "starting demo stream");

    let recognizers: Vec<Box<dyn PlateRecognizer>> = (0..capacity)
        .map(|_| Box::new(SimulatedRecognizer) as Box<dyn PlateRecognizer>)
        .collect();
    let pool = DispatchPool::new(recognizers)?;
    let tracker = PlateTracker::new(settings.tracking.to_tracker_config()?)?;
    let mut pipeline = PlatePipeline::new(pool, tracker);
    let sink = TrackSink::new(&args.output)?;

    let mut saved = Vec::new();
    for sequence in 0..args.frames {
        let timestamp = sequence as f64 / args.fps;
        let frame = synthetic_frame(sequence, timestamp)
            .with_context(|| format!("building frame {sequence}"))?;
        let report = pipeline.push_frame(frame)?;
        for track in report.closed {
            sink.save(&track)?;
            saved.push(track);
        }
    }
    for track in pipeline.finish() {
        sink.save(&track)?;
        saved.push(track);
    }
    sink.write_summary(&saved)?;

    info!(tracks = saved.len(), dir = %args.output.display(), "demo complete");
    for track in &saved {
        println!(
            "track {:>3}  {:<12} frames {:>3}-{:<3}  t={:.2}s-{:.2}s",
            track.track_id,
            track.plate_text,
            track.first_frame_id,
            track.newest_frame_id,
            track.first_timestamp,
            track.newest_timestamp
        );
    }
    Ok(())
}
