use bytes::Bytes;
use glowscan_core::{
    analyze_frame, Analysis, BrightnessClassifier, CascadeCache, CascadeDetector, DetectorError,
    DetectorParams, FaceDetector,
};
use glowscan_hw::{Camera, CameraError, FrameSource};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::error::PipelineError;
use crate::publisher::AnalysisPublisher;
use crate::stream::{multipart_chunk, StreamEncoder};

/// Opens the frame source for one stream.
pub trait SourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Supplies the face detector for one stream.
pub trait DetectorProvider: Send + Sync {
    fn acquire(&self) -> Result<Arc<dyn FaceDetector>, PipelineError>;
}

/// Opens the V4L2 camera and discards warmup frames.
pub struct CameraFactory {
    device: String,
    warmup_frames: usize,
}

impl CameraFactory {
    pub fn new(device: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device: device.into(),
            warmup_frames,
        }
    }
}

impl SourceFactory for CameraFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut camera = Camera::open(&self.device)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        camera.discard_frames(self.warmup_frames);
        Ok(Box::new(camera))
    }
}

/// Builds Haar cascade detectors over a shared, lazily loaded cascade.
pub struct CascadeProvider {
    cache: CascadeCache,
    params: DetectorParams,
}

impl CascadeProvider {
    pub fn new(cache: CascadeCache, params: DetectorParams) -> Self {
        Self { cache, params }
    }
}

impl DetectorProvider for CascadeProvider {
    fn acquire(&self) -> Result<Arc<dyn FaceDetector>, PipelineError> {
        let cascade = self.cache.get()?;
        tracing::debug!(path = %self.cache.path().display(), stages = cascade.stage_count(), "cascade acquired");
        Ok(Arc::new(CascadeDetector::new(cascade, self.params)?))
    }
}

/// What the consumer did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Sent,
    /// Consumer is behind; the chunk was discarded.
    Dropped,
    /// Consumer is gone; the loop should stop.
    Closed,
}

/// Why a pipeline loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source reported end of stream.
    Exhausted,
    /// The consumer disconnected.
    Disconnected,
    /// Shutdown was requested.
    Cancelled,
    /// The source failed to deliver a frame.
    DeviceFailed(String),
}

/// Result of one loop iteration.
#[derive(Debug)]
pub enum Tick {
    Chunk(Bytes),
    /// The frame could not be decoded or encoded and was skipped.
    Skipped,
    EndOfStream,
}

/// Consecutive undecodable frames tolerated before the device is treated as failed.
pub const MAX_CORRUPT_FRAMES: u32 = 30;

/// Pulls frames, analyses them, publishes the result and yields stream chunks.
///
/// Owns its source; the source (and the device behind it) is released exactly
/// once, when the loop value is dropped, whichever way the loop ends.
pub struct PipelineLoop<S: FrameSource> {
    source: S,
    detector: Arc<dyn FaceDetector>,
    classifier: BrightnessClassifier,
    encoder: StreamEncoder,
    publisher: Arc<AnalysisPublisher>,
    shutdown: Arc<AtomicBool>,
    corrupt_run: u32,
}

impl<S: FrameSource> PipelineLoop<S> {
    pub fn new(
        source: S,
        detector: Arc<dyn FaceDetector>,
        classifier: BrightnessClassifier,
        encoder: StreamEncoder,
        publisher: Arc<AnalysisPublisher>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            detector,
            classifier,
            encoder,
            publisher,
            shutdown,
            corrupt_run: 0,
        }
    }

    /// Process one frame.
    ///
    /// A corrupt frame is skipped; only device-level errors are returned.
    pub fn tick(&mut self) -> Result<Tick, CameraError> {
        let mut frame = match self.source.next_frame() {
            Ok(Some(frame)) => {
                self.corrupt_run = 0;
                frame
            }
            Ok(None) => return Ok(Tick::EndOfStream),
            Err(CameraError::CorruptFrame(reason)) => {
                self.corrupt_run += 1;
                if self.corrupt_run >= MAX_CORRUPT_FRAMES {
                    return Err(CameraError::CaptureFailed(format!(
                        "{} corrupt frames in a row, last: {reason}",
                        self.corrupt_run
                    )));
                }
                tracing::warn!(reason = %reason, "skipping corrupt frame");
                return Ok(Tick::Skipped);
            }
            Err(e) => return Err(e),
        };

        let (width, height) = (frame.width, frame.height);
        let detector = &*self.detector;
        let classifier = &self.classifier;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            analyze_frame(&mut frame.data, width, height, detector, classifier)
        }))
        .unwrap_or_else(|_| Err(DetectorError::DetectionFailed("analysis panicked".into())));

        let analysis = match outcome {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "frame analysis failed; reporting no face");
                Analysis::no_face()
            }
        };

        let jpeg = match self.encoder.encode_jpeg(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "skipping frame");
                return Ok(Tick::Skipped);
            }
        };

        tracing::trace!(
            sequence = frame.sequence,
            label = ?analysis.label,
            faces = analysis.faces_detected,
            "frame analysed"
        );
        self.publisher.publish(analysis.label, jpeg.clone());
        Ok(Tick::Chunk(multipart_chunk(&jpeg)))
    }

    /// Run until the source ends or fails, the sink closes, or shutdown is requested.
    pub fn run(mut self, mut sink: impl FnMut(Bytes) -> SinkStatus) -> StopReason {
        let mut dropped = 0u64;
        let reason = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            match self.tick() {
                Ok(Tick::Chunk(chunk)) => match sink(chunk) {
                    SinkStatus::Sent => {}
                    SinkStatus::Dropped => dropped += 1,
                    SinkStatus::Closed => break StopReason::Disconnected,
                },
                Ok(Tick::Skipped) => {}
                Ok(Tick::EndOfStream) => break StopReason::Exhausted,
                Err(e) => {
                    tracing::error!(error = %e, "frame acquisition failed; stopping stream");
                    break StopReason::DeviceFailed(e.to_string());
                }
            }
        };
        if dropped > 0 {
            tracing::debug!(dropped, "chunks dropped for a slow consumer");
        }
        reason
    }
}

/// Everything needed to start a stream, shared by all requests.
pub struct PipelineContext {
    pub sources: Arc<dyn SourceFactory>,
    pub detectors: Arc<dyn DetectorProvider>,
    pub classifier: BrightnessClassifier,
    pub encoder: StreamEncoder,
    pub publisher: Arc<AnalysisPublisher>,
    /// Chunks buffered per stream before new ones are dropped.
    pub buffer: usize,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl PipelineContext {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        detectors: Arc<dyn DetectorProvider>,
        classifier: BrightnessClassifier,
        encoder: StreamEncoder,
        publisher: Arc<AnalysisPublisher>,
        buffer: usize,
    ) -> Self {
        Self {
            sources,
            detectors,
            classifier,
            encoder,
            publisher,
            buffer: buffer.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ask every running loop to stop after its current frame.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Number of loops currently running.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Start a pipeline loop on a dedicated OS thread.
    ///
    /// The detector and source are opened on that thread; this returns only
    /// once both are ready, so a missing camera or model fails the request
    /// instead of producing an empty stream. The loop stops when the returned
    /// receiver is dropped.
    pub async fn start_stream(&self) -> Result<mpsc::Receiver<Bytes>, PipelineError> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), PipelineError>>();
        let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(self.buffer);

        let sources = Arc::clone(&self.sources);
        let detectors = Arc::clone(&self.detectors);
        let classifier = self.classifier;
        let encoder = self.encoder;
        let publisher = Arc::clone(&self.publisher);
        let shutdown = Arc::clone(&self.shutdown);
        let active = Arc::clone(&self.active);

        std::thread::Builder::new()
            .name("glowscan-pipeline".into())
            .spawn(move || {
                let opened = detectors.acquire().and_then(|detector| {
                    let source = sources.open()?;
                    Ok((source, detector))
                });
                let (source, detector) = match opened {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    // Requester went away while we were opening the device.
                    return;
                }

                active.fetch_add(1, Ordering::Relaxed);
                tracing::info!("pipeline started");
                let pipeline =
                    PipelineLoop::new(source, detector, classifier, encoder, publisher, shutdown);
                let reason = pipeline.run(|chunk| match chunk_tx.try_send(chunk) {
                    Ok(()) => SinkStatus::Sent,
                    Err(TrySendError::Full(_)) => SinkStatus::Dropped,
                    Err(TrySendError::Closed(_)) => SinkStatus::Closed,
                });
                active.fetch_sub(1, Ordering::Relaxed);
                tracing::info!(?reason, "pipeline stopped");
            })
            .map_err(PipelineError::Spawn)?;

        ready_rx.await.map_err(|_| PipelineError::ChannelClosed)??;
        Ok(chunk_rx)
    }
}
