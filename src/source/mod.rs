mod pattern;

pub use pattern::TestPatternBackend;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{CameraFacing, SourceConfig};
use crate::error::CaptureError;
use crate::frame::FrameData;

/// Lifecycle state of the live capture device. State changes are the only
/// externally observable signal the manager emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    Uninitialized,
    Acquiring,
    Ready,
    Paused,
    Failed { reason: String },
}

impl SourceState {
    pub fn name(&self) -> &'static str {
        match self {
            SourceState::Uninitialized => "uninitialized",
            SourceState::Acquiring => "acquiring",
            SourceState::Ready => "ready",
            SourceState::Paused => "paused",
            SourceState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SourceState::Ready)
    }

    /// Human-readable failure reason, when failed.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            SourceState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Parameters handed to the capture device on acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub facing: CameraFacing,
    pub resolution: (u32, u32),
    pub fps: u32,
}

impl From<&SourceConfig> for CaptureRequest {
    fn from(config: &SourceConfig) -> Self {
        Self {
            facing: config.facing,
            resolution: config.resolution,
            fps: config.fps,
        }
    }
}

/// Boundary to the platform capture device. Implementations own the real
/// device handle; the manager owns the implementation exclusively.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the device with the requested parameters.
    async fn open(&mut self, request: &CaptureRequest) -> Result<(), CaptureError>;

    /// Grab the most recent frame. Only called while the source is Ready.
    async fn grab(&mut self) -> Result<FrameData, CaptureError>;

    /// Stop all device tracks and release the handle.
    async fn close(&mut self);
}

/// Owns the capture device lifecycle: acquire, pause/resume, tear down,
/// reset, and report health through a watch channel. Frames are handed
/// out one at a time via [`FrameSourceManager::latest_frame`]; no other
/// component touches device state directly.
pub struct FrameSourceManager {
    backend: Mutex<Box<dyn CaptureBackend>>,
    state_tx: watch::Sender<SourceState>,
    last_request: Mutex<Option<CaptureRequest>>,
}

impl FrameSourceManager {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        let (state_tx, _) = watch::channel(SourceState::Uninitialized);
        Self {
            backend: Mutex::new(backend),
            state_tx,
            last_request: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SourceState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SourceState) {
        debug!("Frame source state -> {}", state.name());
        self.state_tx.send_replace(state);
    }

    /// Request the media device. On success the source becomes Ready and
    /// the detection loop may begin; on denial or unavailability it
    /// becomes Failed with a human-readable reason.
    pub async fn acquire(&self, request: CaptureRequest) -> Result<(), CaptureError> {
        info!(
            "Acquiring capture device ({:?}, {}x{} @ {}fps)",
            request.facing, request.resolution.0, request.resolution.1, request.fps
        );
        self.set_state(SourceState::Acquiring);

        let mut backend = self.backend.lock().await;
        match backend.open(&request).await {
            Ok(()) => {
                *self.last_request.lock().await = Some(request);
                self.set_state(SourceState::Ready);
                info!("Capture device ready");
                Ok(())
            }
            Err(e) => {
                warn!("Capture device acquisition failed: {}", e);
                self.set_state(SourceState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop all device tracks. Invoked on every exit path (explicit user
    /// action, teardown, reset) so the capture device is never leaked.
    pub async fn release(&self) {
        debug!("Releasing capture device");
        let mut backend = self.backend.lock().await;
        backend.close().await;
        self.set_state(SourceState::Uninitialized);
    }

    /// Move Ready -> Paused without releasing the device.
    pub async fn pause(&self) {
        if self.state().is_ready() {
            info!("Capture paused");
            self.set_state(SourceState::Paused);
        } else {
            warn!(
                "Pause requested while source is {}; ignoring",
                self.state().name()
            );
        }
    }

    /// Move Paused -> Ready.
    pub async fn resume(&self) {
        if matches!(self.state(), SourceState::Paused) {
            info!("Capture resumed");
            self.set_state(SourceState::Ready);
        } else {
            warn!(
                "Resume requested while source is {}; ignoring",
                self.state().name()
            );
        }
    }

    /// Release then re-acquire with the same parameters. The recovery
    /// path out of Failed.
    pub async fn reset(&self) -> Result<(), CaptureError> {
        let request = self
            .last_request
            .lock()
            .await
            .clone()
            .ok_or(CaptureError::NoAcquireParameters)?;

        info!("Resetting capture device");
        self.release().await;
        self.acquire(request).await
    }

    /// Borrow the most recent frame for one tick. Fails unless the
    /// source is Ready; grab errors are transient and do not change the
    /// lifecycle state.
    pub async fn latest_frame(&self) -> Result<FrameData, CaptureError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(CaptureError::NotReady {
                state: state.name().to_string(),
            });
        }

        let mut backend = self.backend.lock().await;
        backend.grab().await
    }
}
