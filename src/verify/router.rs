use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{Provenance, VerificationRequest};
use crate::error::DispatchError;
use crate::guard::FlightGuard;
use crate::history::{HistoryRecord, HistorySink};
use crate::verify::{VerificationResult, VerificationTransport};

/// Per-provenance dispatch lifecycle:
/// `Idle -> Pending -> {Resolved, Failed} -> Idle`.
///
/// UI busy indicators key off this state, not a separate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Pending,
    Resolved,
    Failed,
}

impl ChannelState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Pending => "pending",
            ChannelState::Resolved => "resolved",
            ChannelState::Failed => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ChannelState::Pending)
    }
}

/// One provenance channel: busy guard, observable state, result sink.
struct ChannelSlot {
    provenance: Provenance,
    guard: FlightGuard,
    state_tx: watch::Sender<ChannelState>,
    result_tx: watch::Sender<Option<VerificationResult>>,
}

impl ChannelSlot {
    fn new(provenance: Provenance) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let (result_tx, _) = watch::channel(None);
        Arc::new(Self {
            provenance,
            guard: FlightGuard::new(),
            state_tx,
            result_tx,
        })
    }
}

/// Routes asynchronous verification responses to the sink matching their
/// provenance and emits best-effort history appends. Dispatch tasks are
/// detached: they run to completion on their frozen payload regardless of
/// camera lifecycle.
pub struct ResponseRouter {
    transport: Arc<dyn VerificationTransport>,
    history: Option<Arc<dyn HistorySink>>,
    current_user: Arc<RwLock<Option<String>>>,
    camera: Arc<ChannelSlot>,
    upload: Arc<ChannelSlot>,
}

impl ResponseRouter {
    pub fn new(
        transport: Arc<dyn VerificationTransport>,
        history: Option<Arc<dyn HistorySink>>,
    ) -> Self {
        Self {
            transport,
            history,
            current_user: Arc::new(RwLock::new(None)),
            camera: ChannelSlot::new(Provenance::Camera),
            upload: ChannelSlot::new(Provenance::Upload),
        }
    }

    fn slot(&self, provenance: Provenance) -> &Arc<ChannelSlot> {
        match provenance {
            Provenance::Camera => &self.camera,
            Provenance::Upload => &self.upload,
        }
    }

    /// Set or clear the authenticated user the history log is scoped to.
    pub async fn set_current_user(&self, user_id: Option<String>) {
        *self.current_user.write().await = user_id;
    }

    pub fn channel_state(&self, provenance: Provenance) -> ChannelState {
        *self.slot(provenance).state_tx.borrow()
    }

    pub fn subscribe_channel_state(&self, provenance: Provenance) -> watch::Receiver<ChannelState> {
        self.slot(provenance).state_tx.subscribe()
    }

    pub fn subscribe_results(
        &self,
        provenance: Provenance,
    ) -> watch::Receiver<Option<VerificationResult>> {
        self.slot(provenance).result_tx.subscribe()
    }

    /// Latest result delivered on a channel, if any.
    pub fn latest_result(&self, provenance: Provenance) -> Option<VerificationResult> {
        self.slot(provenance).result_tx.borrow().clone()
    }

    /// Reset a channel's sink to empty (dismissing a displayed result).
    pub fn clear_result(&self, provenance: Provenance) {
        self.slot(provenance).result_tx.send_replace(None);
    }

    /// Accept one verification request and run it to completion on a
    /// detached task. While a request on the same provenance is
    /// outstanding, returns Busy without creating a second request - the
    /// in-flight request stays authoritative.
    pub fn submit(&self, request: VerificationRequest) -> Result<Uuid, DispatchError> {
        let slot = Arc::clone(self.slot(request.provenance));

        let permit = slot.guard.try_acquire().ok_or_else(|| {
            debug!(
                "Rejecting duplicate dispatch on the {} channel",
                request.provenance
            );
            DispatchError::Busy {
                provenance: request.provenance.as_str().to_string(),
            }
        })?;

        slot.state_tx.send_replace(ChannelState::Pending);

        let id = request.id;
        let transport = Arc::clone(&self.transport);
        let history = self.history.clone();
        let current_user = Arc::clone(&self.current_user);

        tokio::spawn(async move {
            let result = match transport.verify(&request.body).await {
                Ok(result) => {
                    info!(
                        "Verification {} resolved on the {} channel ({})",
                        request.id,
                        slot.provenance,
                        result.status.name()
                    );
                    slot.state_tx.send_replace(ChannelState::Resolved);
                    result
                }
                Err(e) => {
                    warn!(
                        "Verification {} failed on the {} channel: {}",
                        request.id, slot.provenance, e
                    );
                    slot.state_tx.send_replace(ChannelState::Failed);
                    VerificationResult::failure(e.to_string())
                }
            };

            slot.result_tx.send_replace(Some(result.clone()));

            if let Some(sink) = history {
                append_history(sink, current_user, &request, &result).await;
            }

            // Free the channel before announcing Idle, so an observer of
            // the Idle state can always dispatch again immediately.
            drop(permit);
            slot.state_tx.send_replace(ChannelState::Idle);
        });

        Ok(id)
    }
}

/// Fire-and-forget history append for identified results. Failures are
/// logged and never surface as a verification failure.
async fn append_history(
    sink: Arc<dyn HistorySink>,
    current_user: Arc<RwLock<Option<String>>>,
    request: &VerificationRequest,
    result: &VerificationResult,
) {
    let Some(verification_id) = result.verification_id.clone() else {
        return;
    };

    let Some(user_id) = current_user.read().await.clone() else {
        debug!("No authenticated user; skipping history append");
        return;
    };

    let record = HistoryRecord {
        verification_id,
        user_id,
        recorded_at: Utc::now(),
        object_class: request.body.object_class.clone(),
        agent_id: request.body.agent_id.clone(),
        status: result.status,
        title: result.title.clone(),
        summary: result.summary.clone(),
        confidence: result.confidence,
    };

    tokio::spawn(async move {
        if let Err(e) = sink.append(record).await {
            warn!("History append failed (result already delivered): {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::history::MemoryHistory;
    use crate::verify::{VerificationStatus, VerifyRequestBody};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Script {
        Succeed(Box<VerificationResult>),
        FailNetwork(String),
        Stall(Duration, Box<VerificationResult>),
    }

    struct ScriptedTransport {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VerificationTransport for ScriptedTransport {
        async fn verify(
            &self,
            _body: &VerifyRequestBody,
        ) -> Result<VerificationResult, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed(result) => Ok((**result).clone()),
                Script::FailNetwork(message) => Err(TransportError::Status {
                    status: 503,
                    body: message.clone(),
                }),
                Script::Stall(delay, result) => {
                    tokio::time::sleep(*delay).await;
                    Ok((**result).clone())
                }
            }
        }
    }

    fn verified_result(id: Option<&str>) -> VerificationResult {
        VerificationResult {
            status: VerificationStatus::Verified,
            title: "Authentic".to_string(),
            summary: "No tampering indicators found.".to_string(),
            confidence: Some(92.5),
            explanation: None,
            remediation: None,
            details: None,
            recommended_for_human_review: Some(false),
            verification_id: id.map(str::to_string),
        }
    }

    fn camera_request(object_class: &str, agent_id: &str) -> VerificationRequest {
        VerificationRequest::new(
            Provenance::Camera,
            VerifyRequestBody {
                object_class: object_class.to_string(),
                agent_id: agent_id.to_string(),
                image_data_url: Some("data:image/jpeg;base64,AAAA".to_string()),
                text_content: None,
                media_data_url: None,
                file_type: "image/jpeg".to_string(),
            },
        )
    }

    async fn wait_for_result(
        rx: &mut watch::Receiver<Option<VerificationResult>>,
    ) -> VerificationResult {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                if let Some(result) = rx.borrow_and_update().clone() {
                    return result;
                }
            }
        })
        .await
        .expect("no result delivered in time")
    }

    async fn wait_for_idle(router: &ResponseRouter, provenance: Provenance) {
        tokio::time::timeout(Duration::from_secs(2), async {
            let mut rx = router.subscribe_channel_state(provenance);
            while *rx.borrow() != ChannelState::Idle {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("channel did not settle back to idle");
    }

    #[tokio::test]
    async fn test_success_routes_to_camera_sink_and_appends_history() {
        let transport =
            ScriptedTransport::new(Script::Succeed(Box::new(verified_result(Some("ver-1")))));
        let history = Arc::new(MemoryHistory::new());
        let router = ResponseRouter::new(transport, Some(history.clone()));
        router.set_current_user(Some("user-123".to_string())).await;

        let mut camera_rx = router.subscribe_results(Provenance::Camera);
        let upload_rx = router.subscribe_results(Provenance::Upload);

        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();

        let result = wait_for_result(&mut camera_rx).await;
        assert_eq!(result.status, VerificationStatus::Verified);
        assert_eq!(result.title, "Authentic");
        assert_eq!(result.confidence, Some(92.5));

        // Never cross-delivered
        assert!(upload_rx.borrow().is_none());

        wait_for_idle(&router, Provenance::Camera).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let records = history.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verification_id, "ver-1");
        assert_eq!(records[0].user_id, "user-123");
        assert_eq!(records[0].object_class, "bottle");
        assert_eq!(records[0].agent_id, "general_purpose");
        assert_eq!(records[0].status, VerificationStatus::Verified);
        assert_eq!(records[0].confidence, Some(92.5));
    }

    #[tokio::test]
    async fn test_failure_synthesizes_danger_result_without_history() {
        let transport =
            ScriptedTransport::new(Script::FailNetwork("service unavailable".to_string()));
        let history = Arc::new(MemoryHistory::new());
        let router = ResponseRouter::new(transport, Some(history.clone()));
        router.set_current_user(Some("user-123".to_string())).await;

        let mut camera_rx = router.subscribe_results(Provenance::Camera);
        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();

        let result = wait_for_result(&mut camera_rx).await;
        assert_eq!(result.status, VerificationStatus::Danger);
        assert_eq!(result.title, "Verification Failed");
        assert!(result.summary.contains("service unavailable"));
        assert!(result.verification_id.is_none());

        wait_for_idle(&router, Provenance::Camera).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No verification_id, no append
        assert!(history.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_rejected_while_pending() {
        let transport = ScriptedTransport::new(Script::Stall(
            Duration::from_millis(200),
            Box::new(verified_result(None)),
        ));
        let router = ResponseRouter::new(transport.clone(), None);

        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();
        assert!(router.channel_state(Provenance::Camera).is_pending());

        let err = router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Busy { .. }));

        // The rejected dispatch never reached the transport
        wait_for_idle(&router, Provenance::Camera).await;
        assert_eq!(transport.calls(), 1);

        // Channel accepts work again once settled
        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();
        wait_for_idle(&router, Provenance::Camera).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let transport = ScriptedTransport::new(Script::Stall(
            Duration::from_millis(100),
            Box::new(verified_result(None)),
        ));
        let router = ResponseRouter::new(transport.clone(), None);

        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();

        // Camera being pending must not block the upload channel
        let upload = VerificationRequest::new(
            Provenance::Upload,
            VerifyRequestBody {
                object_class: "document".to_string(),
                agent_id: "text_analyzer".to_string(),
                image_data_url: None,
                text_content: Some("contract text".to_string()),
                media_data_url: None,
                file_type: "text/plain".to_string(),
            },
        );
        router.submit(upload).unwrap();

        assert!(router.channel_state(Provenance::Camera).is_pending());
        assert!(router.channel_state(Provenance::Upload).is_pending());

        wait_for_idle(&router, Provenance::Camera).await;
        wait_for_idle(&router, Provenance::Upload).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_user_skips_history_append() {
        let transport =
            ScriptedTransport::new(Script::Succeed(Box::new(verified_result(Some("ver-2")))));
        let history = Arc::new(MemoryHistory::new());
        let router = ResponseRouter::new(transport, Some(history.clone()));

        let mut camera_rx = router.subscribe_results(Provenance::Camera);
        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();
        wait_for_result(&mut camera_rx).await;

        wait_for_idle(&router, Provenance::Camera).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(history.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_result_resets_sink() {
        let transport =
            ScriptedTransport::new(Script::Succeed(Box::new(verified_result(None))));
        let router = ResponseRouter::new(transport, None);

        let mut camera_rx = router.subscribe_results(Provenance::Camera);
        router
            .submit(camera_request("bottle", "general_purpose"))
            .unwrap();
        wait_for_result(&mut camera_rx).await;

        router.clear_result(Provenance::Camera);
        assert!(router.latest_result(Provenance::Camera).is_none());
    }
}
