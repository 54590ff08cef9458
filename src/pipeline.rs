//! Stream pipeline: dispatch pool feeding the track aggregator
//!
//! Recognition runs concurrently, so results complete out of submission
//! order. The tracker requires frames in non-decreasing timestamp order, so
//! the pipeline holds completed results back until every earlier submission
//! of the stream has completed, then feeds them in sequence.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::VideoFrame;
use crate::pool::{DispatchPool, PollOutcome, PoolError, TimeoutPolicy};
use crate::recognizer::{RecognitionCandidate, RecognizerError};
use crate::tracker::{ClosedTrack, FrameReport, PlateTracker};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// End-to-end recognition pipeline for one video stream
///
/// Owns a [`DispatchPool`] and a [`PlateTracker`] and keeps the frames of
/// in-flight requests alive until their results have been consumed.
pub struct PlatePipeline {
    pool: DispatchPool,
    tracker: PlateTracker,
    stream_id: u64,
    next_request_id: u64,
    /// Request ids in submission order, heads not yet fed to the tracker
    pending: VecDeque<u64>,
    /// Frames of in-flight requests, keyed by request id
    frames: HashMap<u64, VideoFrame>,
    /// Results that completed ahead of an earlier in-flight request
    completed: HashMap<u64, Result<Vec<RecognitionCandidate>, RecognizerError>>,
    finished: bool,
}

impl PlatePipeline {
    pub fn new(pool: DispatchPool, tracker: PlateTracker) -> Self {
        Self {
            pool,
            tracker,
            stream_id: 0,
            next_request_id: 0,
            pending: VecDeque::new(),
            frames: HashMap::new(),
            completed: HashMap::new(),
            finished: false,
        }
    }

    /// Submit one frame and fold in whatever has completed so far
    ///
    /// Blocks only while every worker is busy; the wait is bounded by one
    /// recognition call. Tracks opened or closed by results folded in during
    /// this call are returned.
    pub fn push_frame(&mut self, frame: VideoFrame) -> Result<FrameReport, PipelineError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.frames.insert(request_id, frame.clone());
        self.pending.push_back(request_id);
        self.pool
            .submit(self.stream_id, request_id, frame, TimeoutPolicy::Infinite)?;

        let mut report = FrameReport::default();
        self.absorb_completed(TimeoutPolicy::Immediate, &mut report);
        Ok(report)
    }

    /// Requests submitted but not yet folded into the tracker
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Drain all in-flight work, flush the tracker and shut the pool down
    ///
    /// Returns the tracks closed by the remaining results plus the flush.
    pub fn finish(&mut self) -> Vec<ClosedTrack> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut report = FrameReport::default();
        while !self.pending.is_empty() {
            let before = self.pending.len();
            self.absorb_completed(
                TimeoutPolicy::WaitFor(Duration::from_millis(100)),
                &mut report,
            );
            // Never poll here: a poll consumes a result, and one consumed
            // outside absorb_completed would be lost. Undelivered work keeps
            // the ongoing count positive, so this check races with nothing.
            if self.pending.len() == before && self.pool.ongoing_count(self.stream_id) == 0 {
                warn!(
                    remaining = self.pending.len(),
                    "pipeline drained with undelivered requests"
                );
                break;
            }
        }

        let mut closed = report.closed;
        closed.extend(self.tracker.flush());
        self.pool.shutdown();
        debug!(tracks = closed.len(), "pipeline finished");
        closed
    }

    /// Pull completed results and feed tracker-ready heads in order
    fn absorb_completed(&mut self, timeout: TimeoutPolicy, report: &mut FrameReport) {
        loop {
            match self.pool.poll_result(self.stream_id, timeout) {
                PollOutcome::Ready(result) => {
                    self.completed.insert(result.request_id, result.outcome);
                }
                PollOutcome::Pending | PollOutcome::Drained => break,
            }
        }

        while let Some(&head) = self.pending.front() {
            let Some(outcome) = self.completed.remove(&head) else {
                break;
            };
            self.pending.pop_front();
            let Some(frame) = self.frames.remove(&head) else {
                continue;
            };
            match outcome {
                Ok(candidates) => {
                    let step = self.tracker.on_frame(&frame, &candidates);
                    report.opened.extend(step.opened);
                    report.closed.extend(step.closed);
                }
                Err(error) => {
                    // A failed frame is skipped; the stream continues.
                    warn!(
                        frame = frame.sequence_number,
                        %error,
                        "recognition failed, frame skipped"
                    );
                }
            }
        }
    }
}
