//! Bounded dispatch pool for concurrent recognition
//!
//! A fixed set of worker threads, each owning one recognizer instance and
//! running at most one recognition call at a time. Submission hands a frame
//! to a free worker over a rendezvous channel, so the pool never queues work
//! it has no capacity for; when every worker is busy the caller gets a
//! "not accepted" outcome and applies its own backpressure. Completed results
//! are collected per stream and re-associated by request id; completion
//! order is not submission order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::VideoFrame;
use crate::recognizer::{PlateRecognizer, RecognitionCandidate, RecognizerError};

/// How long an operation may wait on pool capacity or on a pending result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Report failure or "nothing yet" without waiting
    Immediate,
    /// Wait up to the given duration
    WaitFor(Duration),
    /// Block until the operation can proceed
    Infinite,
}

/// Completed recognition for one submitted request
#[derive(Debug)]
pub struct AnalysisResult {
    pub stream_id: u64,
    /// Request id supplied at submission, for re-association with its frame
    pub request_id: u64,
    /// Candidates found, or the captured per-frame recognizer error
    pub outcome: Result<Vec<RecognitionCandidate>, RecognizerError>,
}

/// Outcome of polling a stream for its next completed result
#[derive(Debug)]
pub enum PollOutcome {
    /// The next completed result for the stream
    Ready(AnalysisResult),
    /// Work is still in flight but nothing completed within the timeout
    Pending,
    /// Every submission for the stream has been delivered
    Drained,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("dispatch pool requires at least one recognizer")]
    ZeroCapacity,
    #[error("dispatch pool has been shut down")]
    ShutDown,
    #[error("failed to spawn pool worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// One unit of work handed to a free worker
struct Job {
    stream_id: u64,
    request_id: u64,
    frame: VideoFrame,
    results: Sender<AnalysisResult>,
}

/// Per-stream result queue and in-flight accounting
#[derive(Clone)]
struct StreamState {
    results_tx: Sender<AnalysisResult>,
    results_rx: Receiver<AnalysisResult>,
    /// Submissions not yet delivered through `poll_result`
    ongoing: Arc<AtomicUsize>,
}

impl StreamState {
    fn new() -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            results_tx,
            results_rx,
            ongoing: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Fixed-capacity pool of recognition workers
///
/// Submission and polling are expected to run on a single coordinating
/// thread; the workers themselves run concurrently.
pub struct DispatchPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    streams: Mutex<HashMap<u64, StreamState>>,
    capacity: usize,
}

impl DispatchPool {
    /// Build a pool with one worker per supplied recognizer instance
    pub fn new(recognizers: Vec<Box<dyn PlateRecognizer>>) -> Result<Self, PoolError> {
        if recognizers.is_empty() {
            return Err(PoolError::ZeroCapacity);
        }
        let capacity = recognizers.len();
        // Rendezvous channel: a send succeeds only while some worker is
        // parked in recv, i.e. free.
        let (jobs_tx, jobs_rx) = bounded::<Job>(0);

        let mut workers = Vec::with_capacity(capacity);
        for (index, recognizer) in recognizers.into_iter().enumerate() {
            let rx = jobs_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("platetrack-worker-{index}"))
                .spawn(move || worker_loop(index, recognizer, rx))?;
            workers.push(handle);
        }
        debug!(capacity, "dispatch pool started");

        Ok(Self {
            jobs: Some(jobs_tx),
            workers,
            streams: Mutex::new(HashMap::new()),
            capacity,
        })
    }

    /// Number of concurrent recognition slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Submit a frame for recognition
    ///
    /// Returns `Ok(true)` once a free worker accepted the frame, `Ok(false)`
    /// when no worker freed up within the timeout policy. Request ids must be
    /// unique among in-flight requests of the same stream.
    pub fn submit(
        &self,
        stream_id: u64,
        request_id: u64,
        frame: VideoFrame,
        timeout: TimeoutPolicy,
    ) -> Result<bool, PoolError> {
        let jobs = self.jobs.as_ref().ok_or(PoolError::ShutDown)?;
        let stream = self.stream_state(stream_id);
        let job = Job {
            stream_id,
            request_id,
            frame,
            results: stream.results_tx.clone(),
        };

        let accepted = match timeout {
            TimeoutPolicy::Immediate => match jobs.try_send(job) {
                Ok(()) => true,
                Err(crossbeam_channel::TrySendError::Full(_)) => false,
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                    return Err(PoolError::ShutDown)
                }
            },
            TimeoutPolicy::WaitFor(limit) => match jobs.send_timeout(job, limit) {
                Ok(()) => true,
                Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => false,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return Err(PoolError::ShutDown)
                }
            },
            TimeoutPolicy::Infinite => match jobs.send(job) {
                Ok(()) => true,
                Err(_) => return Err(PoolError::ShutDown),
            },
        };

        if accepted {
            stream.ongoing.fetch_add(1, Ordering::SeqCst);
        }
        Ok(accepted)
    }

    /// Fetch the next completed result for a stream
    ///
    /// `Pending` means work is still in flight but nothing completed within
    /// the timeout; `Drained` means no submission for the stream remains
    /// undelivered.
    pub fn poll_result(&self, stream_id: u64, timeout: TimeoutPolicy) -> PollOutcome {
        let stream = {
            let streams = self.streams.lock();
            match streams.get(&stream_id) {
                Some(state) => state.clone(),
                None => return PollOutcome::Drained,
            }
        };

        if let Ok(result) = stream.results_rx.try_recv() {
            stream.ongoing.fetch_sub(1, Ordering::SeqCst);
            return PollOutcome::Ready(result);
        }
        if stream.ongoing.load(Ordering::SeqCst) == 0 {
            return PollOutcome::Drained;
        }

        let received = match timeout {
            TimeoutPolicy::Immediate => return PollOutcome::Pending,
            TimeoutPolicy::WaitFor(limit) => match stream.results_rx.recv_timeout(limit) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => None,
            },
            TimeoutPolicy::Infinite => stream.results_rx.recv().ok(),
        };

        match received {
            Some(result) => {
                stream.ongoing.fetch_sub(1, Ordering::SeqCst);
                PollOutcome::Ready(result)
            }
            None => PollOutcome::Pending,
        }
    }

    /// Submissions for the stream that have not yet been delivered
    pub fn ongoing_count(&self, stream_id: u64) -> usize {
        let streams = self.streams.lock();
        streams
            .get(&stream_id)
            .map(|state| state.ongoing.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Wait for in-flight work to drain and release all workers
    ///
    /// Completed results stay pollable afterwards; new submissions fail.
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("pool worker panicked during shutdown");
            }
        }
        debug!("dispatch pool shut down");
    }

    fn stream_state(&self, stream_id: u64) -> StreamState {
        let mut streams = self.streams.lock();
        streams
            .entry(stream_id)
            .or_insert_with(StreamState::new)
            .clone()
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, mut recognizer: Box<dyn PlateRecognizer>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let outcome = recognizer.recognize(&job.frame);
        if let Err(ref error) = outcome {
            debug!(
                worker = index,
                stream = job.stream_id,
                request = job.request_id,
                %error,
                "recognition failed"
            );
        }
        let result = AnalysisResult {
            stream_id: job.stream_id,
            request_id: job.request_id,
            outcome,
        };
        if job.results.send(result).is_err() {
            debug!(worker = index, "result receiver dropped");
        }
        // The frame handle drops here; the buffer is released once no other
        // stage still references it.
    }
    debug!(worker = index, "pool worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{BoundingBox, CountryMatch, RecognitionCandidate};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn test_frame(sequence: u64) -> VideoFrame {
        VideoFrame::new(vec![0u8; 48], 4, 4, 12, sequence, sequence as f64 / 25.0)
            .expect("valid frame")
    }

    fn plate_candidate(text: &str) -> RecognitionCandidate {
        RecognitionCandidate {
            bounding_box: BoundingBox { left: 0, top: 0, width: 4, height: 2 },
            plate_region_vertices: vec![],
            dark_on_light: true,
            plate_detection_confidence: 0.9,
            matches: vec![CountryMatch {
                text: text.to_string(),
                country: String::new(),
                country_iso: String::new(),
                confidence: 0.9,
                elements: vec![],
            }],
        }
    }

    /// Recognizer that sleeps and records its peak concurrency
    struct SlowRecognizer {
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl PlateRecognizer for SlowRecognizer {
        fn recognize(
            &mut self,
            frame: &VideoFrame,
        ) -> Result<Vec<RecognitionCandidate>, RecognizerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![plate_candidate(&format!("REQ{}", frame.sequence_number))])
        }
    }

    struct FailingRecognizer;

    impl PlateRecognizer for FailingRecognizer {
        fn recognize(
            &mut self,
            _frame: &VideoFrame,
        ) -> Result<Vec<RecognitionCandidate>, RecognizerError> {
            Err(RecognizerError::new("engine unavailable"))
        }
    }

    fn slow_pool(
        capacity: usize,
        delay: Duration,
    ) -> (DispatchPool, Arc<AtomicUsize>) {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let recognizers: Vec<Box<dyn PlateRecognizer>> = (0..capacity)
            .map(|_| {
                Box::new(SlowRecognizer {
                    delay,
                    active: active.clone(),
                    peak: peak.clone(),
                }) as Box<dyn PlateRecognizer>
            })
            .collect();
        (DispatchPool::new(recognizers).expect("pool"), peak)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            DispatchPool::new(vec![]),
            Err(PoolError::ZeroCapacity)
        ));
    }

    #[test]
    fn test_all_requests_complete_within_capacity() {
        // Scenario: capacity 2, five submissions with infinite wait.
        let (pool, peak) = slow_pool(2, Duration::from_millis(20));

        for request in 0..5u64 {
            let accepted = pool
                .submit(0, request, test_frame(request), TimeoutPolicy::Infinite)
                .expect("submit");
            assert!(accepted, "infinite-wait submit must be accepted");
        }

        let mut seen = Vec::new();
        loop {
            match pool.poll_result(0, TimeoutPolicy::Infinite) {
                PollOutcome::Ready(result) => {
                    assert!(result.outcome.is_ok());
                    seen.push(result.request_id);
                }
                PollOutcome::Drained => break,
                PollOutcome::Pending => unreachable!("infinite poll cannot be pending"),
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.ongoing_count(0), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2, "capacity exceeded");
    }

    #[test]
    fn test_immediate_submit_rejected_when_saturated() {
        let (pool, _) = slow_pool(1, Duration::from_millis(100));

        let accepted = pool
            .submit(0, 0, test_frame(0), TimeoutPolicy::Infinite)
            .expect("submit");
        assert!(accepted);

        // The single worker is busy sleeping; nothing can take this one.
        let accepted = pool
            .submit(0, 1, test_frame(1), TimeoutPolicy::Immediate)
            .expect("submit");
        assert!(!accepted, "immediate submit must fail while saturated");
        assert_eq!(pool.ongoing_count(0), 1);

        // A bounded wait longer than the job outlasts the busy period.
        let accepted = pool
            .submit(0, 1, test_frame(1), TimeoutPolicy::WaitFor(Duration::from_secs(5)))
            .expect("submit");
        assert!(accepted);
    }

    #[test]
    fn test_ongoing_count_decreases_per_delivery() {
        let (pool, _) = slow_pool(2, Duration::from_millis(5));
        for request in 0..3u64 {
            pool.submit(0, request, test_frame(request), TimeoutPolicy::Infinite)
                .expect("submit");
        }
        assert_eq!(pool.ongoing_count(0), 3);

        let mut remaining = 3;
        while remaining > 0 {
            if let PollOutcome::Ready(_) = pool.poll_result(0, TimeoutPolicy::Infinite) {
                remaining -= 1;
                assert_eq!(pool.ongoing_count(0), remaining);
            }
        }
        assert!(matches!(
            pool.poll_result(0, TimeoutPolicy::Immediate),
            PollOutcome::Drained
        ));
    }

    #[test]
    fn test_recognizer_error_is_captured_not_fatal() {
        // Scenario: a recognizer that always fails leaves the pool usable.
        let pool = DispatchPool::new(vec![Box::new(FailingRecognizer)]).expect("pool");

        pool.submit(0, 10, test_frame(10), TimeoutPolicy::Infinite)
            .expect("submit");
        match pool.poll_result(0, TimeoutPolicy::Infinite) {
            PollOutcome::Ready(result) => {
                assert_eq!(result.request_id, 10);
                assert!(result.outcome.is_err());
            }
            other => panic!("expected a result, got {other:?}"),
        }

        // Worker returned to the free set; a second submission still works.
        let accepted = pool
            .submit(0, 11, test_frame(11), TimeoutPolicy::Infinite)
            .expect("submit");
        assert!(accepted);
        assert!(matches!(
            pool.poll_result(0, TimeoutPolicy::Infinite),
            PollOutcome::Ready(_)
        ));
    }

    #[test]
    fn test_streams_are_isolated() {
        let (pool, _) = slow_pool(2, Duration::from_millis(1));
        pool.submit(1, 100, test_frame(100), TimeoutPolicy::Infinite)
            .expect("submit");
        pool.submit(2, 200, test_frame(200), TimeoutPolicy::Infinite)
            .expect("submit");

        match pool.poll_result(1, TimeoutPolicy::Infinite) {
            PollOutcome::Ready(result) => {
                assert_eq!(result.stream_id, 1);
                assert_eq!(result.request_id, 100);
            }
            other => panic!("expected stream 1 result, got {other:?}"),
        }
        assert!(matches!(
            pool.poll_result(1, TimeoutPolicy::Immediate),
            PollOutcome::Drained
        ));
        assert_eq!(pool.ongoing_count(2), 1);
    }

    #[test]
    fn test_shutdown_drains_and_blocks_submissions() {
        let (mut pool, _) = slow_pool(1, Duration::from_millis(10));
        pool.submit(0, 0, test_frame(0), TimeoutPolicy::Infinite)
            .expect("submit");

        pool.shutdown();

        // The in-flight result survives shutdown.
        assert!(matches!(
            pool.poll_result(0, TimeoutPolicy::Infinite),
            PollOutcome::Ready(_)
        ));
        assert!(matches!(
            pool.submit(0, 1, test_frame(1), TimeoutPolicy::Immediate),
            Err(PoolError::ShutDown)
        ));
    }

    #[test]
    fn test_unknown_stream_is_drained() {
        let (pool, _) = slow_pool(1, Duration::from_millis(1));
        assert!(matches!(
            pool.poll_result(42, TimeoutPolicy::Immediate),
            PollOutcome::Drained
        ));
        assert_eq!(pool.ongoing_count(42), 0);
    }
}
