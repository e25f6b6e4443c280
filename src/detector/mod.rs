mod http;

pub use http::HttpDetector;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DetectorConfig;
use crate::detection::{Detection, DetectionSet};
use crate::error::DetectorError;
use crate::frame::FrameData;
use crate::guard::FlightGuard;
use crate::source::{FrameSourceManager, SourceState};

/// Boundary to the inference engine. Implementations must tolerate a
/// not-yet-ready frame by returning an empty list rather than failing.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, DetectorError>;
}

/// Drives detection attempts on a steady cadence while the frame source
/// is Ready, publishing a fresh [`DetectionSet`] per completed tick.
///
/// Scheduling is cooperative and frame-driven: a tick that fires while
/// the previous inference call is still outstanding is skipped, not
/// queued, so at most one inference call is in flight and no backlog can
/// build up when inference is slower than the refresh rate.
pub struct DetectionLoop {
    detector: Arc<dyn ObjectDetector>,
    source: Arc<FrameSourceManager>,
    config: DetectorConfig,
}

impl DetectionLoop {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        source: Arc<FrameSourceManager>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            detector,
            source,
            config,
        }
    }

    /// Start the scheduling task. Cancelling the token stops further
    /// ticks; an attempt already in flight finishes but will not publish
    /// after cancellation.
    pub fn spawn(self, cancel: CancellationToken) -> DetectionLoopHandle {
        let (detections_tx, detections_rx) = watch::channel(DetectionSet::empty());
        let (message_tx, message_rx) =
            watch::channel("Initializing detection...".to_string());

        let detections_tx = Arc::new(detections_tx);
        let message_tx = Arc::new(message_tx);

        let task = tokio::spawn(run_scheduler(
            self.detector,
            self.source,
            self.config,
            Arc::clone(&detections_tx),
            Arc::clone(&message_tx),
            cancel.clone(),
        ));

        DetectionLoopHandle {
            detections_rx,
            message_rx,
            cancel,
            task,
        }
    }
}

/// Handle to a running detection loop: published sets, the observational
/// status message, and shutdown.
pub struct DetectionLoopHandle {
    detections_rx: watch::Receiver<DetectionSet>,
    message_rx: watch::Receiver<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DetectionLoopHandle {
    /// The most recently published candidate set.
    pub fn latest(&self) -> DetectionSet {
        self.detections_rx.borrow().clone()
    }

    pub fn subscribe_detections(&self) -> watch::Receiver<DetectionSet> {
        self.detections_rx.clone()
    }

    /// Current observational status message. Never gates the loop.
    pub fn message(&self) -> String {
        self.message_rx.borrow().clone()
    }

    pub fn subscribe_message(&self) -> watch::Receiver<String> {
        self.message_rx.clone()
    }

    /// Stop scheduling and wait for the task to wind down.
    pub async fn stop(self, grace: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => info!("Detection loop task completed"),
            Ok(Err(e)) => error!("Detection loop task join error: {}", e),
            Err(_) => warn!("Detection loop task did not stop within {:?}", grace),
        }
    }
}

fn state_message(state: &SourceState) -> String {
    match state {
        SourceState::Uninitialized => "Camera inactive.".to_string(),
        SourceState::Acquiring => "Requesting camera access...".to_string(),
        SourceState::Ready => "Camera ready. Detection active...".to_string(),
        SourceState::Paused => "Camera paused. Resume to continue detection.".to_string(),
        SourceState::Failed { reason } => format!("Camera error: {}", reason),
    }
}

async fn run_scheduler(
    detector: Arc<dyn ObjectDetector>,
    source: Arc<FrameSourceManager>,
    config: DetectorConfig,
    detections_tx: Arc<watch::Sender<DetectionSet>>,
    message_tx: Arc<watch::Sender<String>>,
    cancel: CancellationToken,
) {
    info!(
        "Detection loop started ({}ms tick, threshold {}, smoothing {})",
        config.tick_interval_ms, config.confidence_threshold, config.smoothing_factor
    );

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let guard = FlightGuard::new();
    let mut last_state = SourceState::Uninitialized;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let state = source.state();
        if state != last_state {
            if last_state.is_ready() && !state.is_ready() {
                // The feed went away; drop the stale overlay with it.
                detections_tx.send_replace(DetectionSet::empty());
            }
            message_tx.send_replace(state_message(&state));
            last_state = state.clone();
        }

        if !state.is_ready() {
            continue;
        }

        // Single-flight: skip this tick while an attempt is outstanding.
        let Some(permit) = guard.try_acquire() else {
            continue;
        };

        let detector = Arc::clone(&detector);
        let source = Arc::clone(&source);
        let detections_tx = Arc::clone(&detections_tx);
        let message_tx = Arc::clone(&message_tx);
        let cancel = cancel.clone();
        let threshold = config.confidence_threshold;
        let smoothing = config.smoothing_factor;

        tokio::spawn(async move {
            let _permit = permit;
            run_attempt(
                detector,
                source,
                detections_tx,
                message_tx,
                cancel,
                threshold,
                smoothing,
            )
            .await;
        });
    }

    info!("Detection loop stopped");
}

/// One detection attempt. Errors are logged and swallowed; the loop
/// self-heals on its next scheduled tick.
#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    detector: Arc<dyn ObjectDetector>,
    source: Arc<FrameSourceManager>,
    detections_tx: Arc<watch::Sender<DetectionSet>>,
    message_tx: Arc<watch::Sender<String>>,
    cancel: CancellationToken,
    threshold: f32,
    smoothing: f32,
) {
    let frame = match source.latest_frame().await {
        Ok(frame) => frame,
        Err(e) => {
            debug!("No frame available for this tick: {}", e);
            return;
        }
    };

    match detector.detect(&frame).await {
        Ok(raw) => {
            // The source may have paused, failed, or been released while
            // inference ran; a set may only be published while Ready.
            if cancel.is_cancelled() || !source.state().is_ready() {
                return;
            }

            let prev = detections_tx.borrow().clone();
            let set = DetectionSet::advance(&prev, raw, threshold, smoothing);
            message_tx.send_replace(set.status_message());
            detections_tx.send_replace(set);
        }
        Err(e) => {
            warn!(
                "Inference attempt on frame {} failed (loop continues): {}",
                frame.id, e
            );
        }
    }
}
