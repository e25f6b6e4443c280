use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agents;
use crate::detection::{Detection, DetectionSet};
use crate::error::{DispatchError, VeracamError};
use crate::frame::{FrameData, FrameFormat};
use crate::source::FrameSourceManager;
use crate::verify::{ResponseRouter, VerifyRequestBody};

/// Logical origin of a verification request, used to route its result to
/// the matching sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Camera,
    Upload,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Camera => "camera",
            Provenance::Upload => "upload",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media content of a verification request, already encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// Base64 data URL of an image
    ImageDataUrl(String),
    /// Base64 data URL of audio/video media
    MediaDataUrl(String),
    /// Plain text passed through as-is
    Text(String),
}

/// A file supplied through the upload channel.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new<S: Into<String>>(name: S, mime_type: S, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Encode this file into a wire payload based on its declared media
    /// kind. Unsupported kinds are rejected here, before any network
    /// round-trip.
    pub fn to_payload(&self) -> Result<MediaPayload, DispatchError> {
        let mime = self.mime_type.as_str();
        if mime.starts_with("image/") {
            Ok(MediaPayload::ImageDataUrl(encode_data_url(
                mime,
                &self.bytes,
            )))
        } else if mime.starts_with("video/") || mime.starts_with("audio/") {
            Ok(MediaPayload::MediaDataUrl(encode_data_url(
                mime,
                &self.bytes,
            )))
        } else if mime.starts_with("text/") {
            Ok(MediaPayload::Text(
                String::from_utf8_lossy(&self.bytes).into_owned(),
            ))
        } else {
            Err(DispatchError::UnsupportedMedia {
                kind: mime.to_string(),
            })
        }
    }
}

fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// One verification dispatch. Immutable once created; never retried
/// automatically.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub id: Uuid,
    pub provenance: Provenance,
    pub body: VerifyRequestBody,
}

impl VerificationRequest {
    pub fn new(provenance: Provenance, body: VerifyRequestBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            provenance,
            body,
        }
    }
}

/// Encoder boundary for dispatch-time frame snapshots.
pub trait SnapshotEncoder: Send + Sync {
    fn encode(&self, frame: &FrameData) -> Result<MediaPayload, DispatchError>;

    /// MIME type declared for encoded snapshots.
    fn file_type(&self) -> &'static str {
        "image/jpeg"
    }
}

/// Default snapshot encoder: frames arrive as JPEG already, so encoding
/// is a base64 data-URL wrap of the frame bytes.
pub struct JpegDataUrlEncoder;

impl SnapshotEncoder for JpegDataUrlEncoder {
    fn encode(&self, frame: &FrameData) -> Result<MediaPayload, DispatchError> {
        if frame.format != FrameFormat::Mjpeg {
            return Err(DispatchError::SnapshotUnavailable {
                details: format!("frame format {:?} is not JPEG-encoded", frame.format),
            });
        }
        Ok(MediaPayload::ImageDataUrl(encode_data_url(
            "image/jpeg",
            &frame.data,
        )))
    }
}

/// Tracks which candidate the user has chosen and assembles verification
/// requests from frozen snapshots or uploaded files, handing each to the
/// response router with its provenance tag. Duplicate dispatches on a
/// channel are rejected by the router's busy guard.
pub struct DispatchCoordinator {
    source: Arc<FrameSourceManager>,
    router: Arc<ResponseRouter>,
    encoder: Box<dyn SnapshotEncoder>,
    selection: Mutex<Option<Detection>>,
}

impl DispatchCoordinator {
    pub fn new(source: Arc<FrameSourceManager>, router: Arc<ResponseRouter>) -> Self {
        Self::with_encoder(source, router, Box::new(JpegDataUrlEncoder))
    }

    pub fn with_encoder(
        source: Arc<FrameSourceManager>,
        router: Arc<ResponseRouter>,
        encoder: Box<dyn SnapshotEncoder>,
    ) -> Self {
        Self {
            source,
            router,
            encoder,
            selection: Mutex::new(None),
        }
    }

    /// Record the user's choice. The detection is assumed to come from
    /// the current tick's published set; no further validation happens
    /// here.
    pub async fn select(&self, detection: Detection) {
        debug!("Object selected: {}", detection.class_label);
        *self.selection.lock().await = Some(detection);
    }

    /// Explicitly clear the current selection.
    pub async fn clear_selection(&self) {
        *self.selection.lock().await = None;
    }

    pub async fn selection(&self) -> Option<Detection> {
        self.selection.lock().await.clone()
    }

    /// Reconcile the selection with a freshly published set: once no
    /// detection carries the selected class, the selection is dropped.
    pub async fn sync_with(&self, set: &DetectionSet) {
        let mut selection = self.selection.lock().await;
        if let Some(selected) = selection.as_ref() {
            if set.find_class(&selected.class_label).is_none() {
                debug!(
                    "Selected class '{}' left the frame; clearing selection",
                    selected.class_label
                );
                *selection = None;
            }
        }
    }

    /// Dispatch the current selection for verification. Freezes a single
    /// frame from the live source at dispatch time, so the payload stays
    /// stable while the detection loop keeps running.
    pub async fn dispatch_camera(&self, agent_id: &str) -> Result<Uuid, VeracamError> {
        let selection = self
            .selection()
            .await
            .ok_or(DispatchError::NoSelection)?;

        let frame = self.source.latest_frame().await?;
        let payload = self.encoder.encode(&frame)?;

        let body = build_body(
            &selection.class_label,
            agent_id,
            payload,
            self.encoder.file_type(),
        );
        let request = VerificationRequest::new(Provenance::Camera, body);

        info!(
            "Dispatching camera verification {} for '{}' (agent: {})",
            request.id, selection.class_label, agent_id
        );
        let id = self.router.submit(request)?;
        Ok(id)
    }

    /// Dispatch an uploaded file for verification. Payload construction
    /// branches on the declared media kind and rejects unsupported kinds
    /// before any network round-trip. An empty object class falls back to
    /// the agent's default.
    pub async fn dispatch_upload(
        &self,
        agent_id: &str,
        object_class: &str,
        file: &UploadFile,
    ) -> Result<Uuid, VeracamError> {
        let payload = file.to_payload()?;

        let object_class = if object_class.is_empty() {
            agents::default_object_class(agent_id)
        } else {
            object_class
        };

        let body = build_body(object_class, agent_id, payload, &file.mime_type);
        let request = VerificationRequest::new(Provenance::Upload, body);

        info!(
            "Dispatching upload verification {} for '{}' ({}, agent: {})",
            request.id, object_class, file.mime_type, agent_id
        );
        let id = self.router.submit(request)?;
        Ok(id)
    }
}

fn build_body(
    object_class: &str,
    agent_id: &str,
    payload: MediaPayload,
    file_type: &str,
) -> VerifyRequestBody {
    let mut body = VerifyRequestBody {
        object_class: object_class.to_string(),
        agent_id: agent_id.to_string(),
        image_data_url: None,
        text_content: None,
        media_data_url: None,
        file_type: file_type.to_string(),
    };

    match payload {
        MediaPayload::ImageDataUrl(url) => body.image_data_url = Some(url),
        MediaPayload::MediaDataUrl(url) => body.media_data_url = Some(url),
        MediaPayload::Text(text) => body.text_content = Some(text),
    }

    body
}
