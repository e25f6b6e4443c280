pub mod agents;
pub mod config;
pub mod detection;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod guard;
pub mod history;
pub mod pipeline;
pub mod source;
pub mod verify;

pub use config::{CameraFacing, VeracamConfig};
pub use detection::{Detection, DetectionSet};
pub use detector::{DetectionLoop, DetectionLoopHandle, HttpDetector, ObjectDetector};
pub use dispatch::{
    DispatchCoordinator, JpegDataUrlEncoder, MediaPayload, Provenance, SnapshotEncoder,
    UploadFile, VerificationRequest,
};
pub use error::{
    CaptureError, DetectorError, DispatchError, HistoryError, Result, TransportError,
    VeracamError,
};
pub use frame::{FrameData, FrameFormat};
pub use geometry::{lerp, to_display_box, BoundingBox, Resolution};
pub use guard::{FlightGuard, FlightPermit};
pub use history::{HistoryRecord, HistorySink, MemoryHistory};
pub use pipeline::{VerificationPipeline, VerificationPipelineBuilder};
pub use source::{
    CaptureBackend, CaptureRequest, FrameSourceManager, SourceState, TestPatternBackend,
};
pub use verify::{
    ChannelState, DetailEntry, HttpVerificationClient, ResponseRouter, VerificationResult,
    VerificationStatus, VerificationTransport, VerifyRequestBody,
};
