use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::VeracamConfig;
use crate::detection::DetectionSet;
use crate::detector::{DetectionLoop, DetectionLoopHandle, HttpDetector, ObjectDetector};
use crate::dispatch::{DispatchCoordinator, Provenance};
use crate::error::{CaptureError, Result, VeracamError};
use crate::history::HistorySink;
use crate::source::{
    CaptureBackend, CaptureRequest, FrameSourceManager, SourceState, TestPatternBackend,
};
use crate::verify::{HttpVerificationClient, ResponseRouter, VerificationTransport};

/// Wires the four pipeline components together and owns their lifecycle:
/// frame source manager, detection loop, dispatch coordinator and
/// response router.
pub struct VerificationPipeline {
    config: VeracamConfig,
    source: Arc<FrameSourceManager>,
    coordinator: Arc<DispatchCoordinator>,
    router: Arc<ResponseRouter>,
    detector: Arc<dyn ObjectDetector>,
    cancel: CancellationToken,
    loop_handle: Option<DetectionLoopHandle>,
    sync_task: Option<JoinHandle<()>>,
}

impl VerificationPipeline {
    /// Start the detection loop and acquire the capture device. A failed
    /// acquisition leaves the source Failed (recoverable through
    /// [`VerificationPipeline::reset_camera`]); the rest of the pipeline
    /// keeps running and the loop idles until the source reports Ready.
    pub async fn start(&mut self) -> Result<()> {
        if self.loop_handle.is_some() {
            warn!("Verification pipeline is already running");
            return Ok(());
        }

        info!("Starting verification pipeline");

        let loop_handle = DetectionLoop::new(
            Arc::clone(&self.detector),
            Arc::clone(&self.source),
            self.config.detector.clone(),
        )
        .spawn(self.cancel.child_token());

        // Keep the selection honest against each freshly published set.
        let mut detections_rx = loop_handle.subscribe_detections();
        let coordinator = Arc::clone(&self.coordinator);
        let cancel = self.cancel.clone();
        let sync_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = detections_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let set = detections_rx.borrow_and_update().clone();
                        coordinator.sync_with(&set).await;
                    }
                }
            }
        });

        self.loop_handle = Some(loop_handle);
        self.sync_task = Some(sync_task);

        let request = CaptureRequest::from(&self.config.source);
        if let Err(e) = self.source.acquire(request).await {
            warn!("Camera acquisition failed at startup (reset to retry): {}", e);
        }

        Ok(())
    }

    /// Stop detection scheduling and release the capture device.
    /// In-flight verification dispatches are untouched: they operate on
    /// frozen snapshots and run to completion regardless of camera
    /// lifecycle.
    pub async fn shutdown(&mut self) {
        info!("Shutting down verification pipeline");
        self.cancel.cancel();

        if let Some(handle) = self.loop_handle.take() {
            handle
                .stop(Duration::from_secs(self.config.system.shutdown_timeout_secs))
                .await;
        }

        if let Some(task) = self.sync_task.take() {
            let _ = task.await;
        }

        self.source.release().await;
        info!("Verification pipeline stopped");
    }

    /// Clear camera-side UI state and re-acquire the device with the
    /// same parameters.
    pub async fn reset_camera(&self) -> std::result::Result<(), CaptureError> {
        self.coordinator.clear_selection().await;
        self.router.clear_result(Provenance::Camera);
        self.source.reset().await
    }

    pub fn source(&self) -> Arc<FrameSourceManager> {
        Arc::clone(&self.source)
    }

    pub fn coordinator(&self) -> Arc<DispatchCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn router(&self) -> Arc<ResponseRouter> {
        Arc::clone(&self.router)
    }

    pub fn source_state(&self) -> SourceState {
        self.source.state()
    }

    /// Latest published candidate set; empty before start.
    pub fn latest_detections(&self) -> DetectionSet {
        self.loop_handle
            .as_ref()
            .map(|handle| handle.latest())
            .unwrap_or_default()
    }

    pub fn subscribe_detections(&self) -> Option<watch::Receiver<DetectionSet>> {
        self.loop_handle
            .as_ref()
            .map(|handle| handle.subscribe_detections())
    }

    /// Current observational status message.
    pub fn status_message(&self) -> String {
        self.loop_handle
            .as_ref()
            .map(|handle| handle.message())
            .unwrap_or_else(|| "Pipeline not started.".to_string())
    }

    pub async fn set_current_user(&self, user_id: Option<String>) {
        self.router.set_current_user(user_id).await;
    }
}

/// Builder for [`VerificationPipeline`]. Collaborator boundaries default
/// to their shipped implementations: test-pattern capture, HTTP detector
/// and HTTP verification client.
pub struct VerificationPipelineBuilder {
    config: Option<VeracamConfig>,
    backend: Option<Box<dyn CaptureBackend>>,
    detector: Option<Arc<dyn ObjectDetector>>,
    transport: Option<Arc<dyn VerificationTransport>>,
    history: Option<Arc<dyn HistorySink>>,
}

impl VerificationPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            detector: None,
            transport: None,
            history: None,
        }
    }

    pub fn config(mut self, config: VeracamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn backend(mut self, backend: Box<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn VerificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn build(self) -> Result<VerificationPipeline> {
        let config = self.config.ok_or_else(|| {
            VeracamError::component("pipeline_builder", "Config is required")
        })?;

        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(TestPatternBackend::new()));

        let detector: Arc<dyn ObjectDetector> = match self.detector {
            Some(detector) => detector,
            None => Arc::new(HttpDetector::new(&config.detector)?),
        };

        let transport: Arc<dyn VerificationTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpVerificationClient::new(&config.verify)?),
        };

        let history = if config.history.enabled {
            self.history
        } else {
            None
        };

        let source = Arc::new(FrameSourceManager::new(backend));
        let router = Arc::new(ResponseRouter::new(transport, history));
        let coordinator = Arc::new(DispatchCoordinator::new(
            Arc::clone(&source),
            Arc::clone(&router),
        ));

        Ok(VerificationPipeline {
            config,
            source,
            coordinator,
            router,
            detector,
            cancel: CancellationToken::new(),
            loop_handle: None,
            sync_task: None,
        })
    }
}

impl Default for VerificationPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::error::{DetectorError, TransportError};
    use crate::frame::FrameData;
    use crate::geometry::BoundingBox;
    use crate::history::MemoryHistory;
    use crate::verify::{
        VerificationResult, VerificationStatus, VerifyRequestBody,
    };
    use async_trait::async_trait;

    struct StaticDetector {
        detections: Vec<Detection>,
    }

    #[async_trait]
    impl ObjectDetector for StaticDetector {
        async fn detect(
            &self,
            _frame: &FrameData,
        ) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(self.detections.clone())
        }
    }

    struct StubTransport {
        result: VerificationResult,
        delay: Duration,
    }

    #[async_trait]
    impl VerificationTransport for StubTransport {
        async fn verify(
            &self,
            _body: &VerifyRequestBody,
        ) -> std::result::Result<VerificationResult, TransportError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.result.clone())
        }
    }

    fn test_config() -> VeracamConfig {
        let mut config = VeracamConfig::default();
        config.detector.tick_interval_ms = 5;
        config.source.resolution = (640, 480);
        config
    }

    fn verified_result(id: &str) -> VerificationResult {
        VerificationResult {
            status: VerificationStatus::Verified,
            title: "Authentic".to_string(),
            summary: "No tampering indicators found.".to_string(),
            confidence: Some(92.5),
            explanation: None,
            remediation: None,
            details: None,
            recommended_for_human_review: Some(false),
            verification_id: Some(id.to_string()),
        }
    }

    fn bottle() -> Detection {
        Detection::new("bottle", 0.9, BoundingBox::new(10.0, 10.0, 80.0, 160.0))
    }

    async fn wait_for_detections(pipeline: &VerificationPipeline) {
        let mut rx = pipeline.subscribe_detections().unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while rx.borrow().is_empty() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("no detections published in time");
    }

    #[tokio::test]
    async fn test_builder_requires_config() {
        assert!(VerificationPipelineBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_camera_verification() {
        let history = Arc::new(MemoryHistory::new());
        let mut pipeline = VerificationPipelineBuilder::new()
            .config(test_config())
            .detector(Arc::new(StaticDetector {
                detections: vec![bottle()],
            }))
            .transport(Arc::new(StubTransport {
                result: verified_result("ver-e2e"),
                delay: Duration::from_millis(10),
            }))
            .history(history.clone())
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        pipeline
            .set_current_user(Some("user-9".to_string()))
            .await;

        assert!(pipeline.source_state().is_ready());
        wait_for_detections(&pipeline).await;

        let detection = pipeline.latest_detections().detections()[0].clone();
        assert_eq!(detection.class_label, "bottle");

        let coordinator = pipeline.coordinator();
        coordinator.select(detection).await;
        coordinator.dispatch_camera("general_purpose").await.unwrap();

        // The result lands on the camera sink, never the upload sink
        let router = pipeline.router();
        let mut camera_rx = router.subscribe_results(Provenance::Camera);
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(result) = camera_rx.borrow_and_update().clone() {
                    return result;
                }
                camera_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("camera result not delivered");

        assert_eq!(result.status, VerificationStatus::Verified);
        assert_eq!(result.confidence, Some(92.5));
        assert!(router.latest_result(Provenance::Upload).is_none());

        // History append carries the current user id
        tokio::time::timeout(Duration::from_secs(2), async {
            while history.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("history append not issued");

        let records = history.records().await;
        assert_eq!(records[0].verification_id, "ver-e2e");
        assert_eq!(records[0].user_id, "user-9");
        assert_eq!(records[0].object_class, "bottle");

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_does_not_cancel_inflight_verification() {
        let mut pipeline = VerificationPipelineBuilder::new()
            .config(test_config())
            .detector(Arc::new(StaticDetector {
                detections: vec![bottle()],
            }))
            .transport(Arc::new(StubTransport {
                result: verified_result("ver-late"),
                delay: Duration::from_millis(150),
            }))
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        wait_for_detections(&pipeline).await;

        let coordinator = pipeline.coordinator();
        let detection = pipeline.latest_detections().detections()[0].clone();
        coordinator.select(detection).await;
        coordinator.dispatch_camera("general_purpose").await.unwrap();

        let router = pipeline.router();
        let mut camera_rx = router.subscribe_results(Provenance::Camera);

        // Tear the camera down while the verification is still in flight
        pipeline.shutdown().await;
        assert_eq!(pipeline.source_state(), SourceState::Uninitialized);

        // The dispatch still runs to completion on its frozen snapshot
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(result) = camera_rx.borrow_and_update().clone() {
                    return result;
                }
                camera_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("in-flight verification was cancelled by shutdown");

        assert_eq!(result.status, VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn test_selection_cleared_when_class_leaves_frame() {
        // Detector alternates its output through an interior switch
        struct SwitchDetector {
            with_bottle: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl ObjectDetector for SwitchDetector {
            async fn detect(
                &self,
                _frame: &FrameData,
            ) -> std::result::Result<Vec<Detection>, DetectorError> {
                if self.with_bottle.load(std::sync::atomic::Ordering::SeqCst) {
                    Ok(vec![bottle()])
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let detector = Arc::new(SwitchDetector {
            with_bottle: std::sync::atomic::AtomicBool::new(true),
        });

        let mut pipeline = VerificationPipelineBuilder::new()
            .config(test_config())
            .detector(Arc::clone(&detector) as Arc<dyn ObjectDetector>)
            .transport(Arc::new(StubTransport {
                result: verified_result("ver-x"),
                delay: Duration::from_millis(1),
            }))
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        wait_for_detections(&pipeline).await;

        let coordinator = pipeline.coordinator();
        coordinator.select(bottle()).await;
        assert!(coordinator.selection().await.is_some());

        // The bottle leaves the frame; the next published set clears it
        detector
            .with_bottle
            .store(false, std::sync::atomic::Ordering::SeqCst);

        tokio::time::timeout(Duration::from_secs(2), async {
            while coordinator.selection().await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("selection was not cleared");

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_camera_clears_selection_and_reacquires() {
        let mut pipeline = VerificationPipelineBuilder::new()
            .config(test_config())
            .detector(Arc::new(StaticDetector {
                detections: vec![bottle()],
            }))
            .transport(Arc::new(StubTransport {
                result: verified_result("ver-r"),
                delay: Duration::from_millis(1),
            }))
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        wait_for_detections(&pipeline).await;

        pipeline.coordinator().select(bottle()).await;
        pipeline.reset_camera().await.unwrap();

        assert!(pipeline.coordinator().selection().await.is_none());
        assert!(pipeline.source_state().is_ready());

        pipeline.shutdown().await;
    }
}
