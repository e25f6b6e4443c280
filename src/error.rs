use thiserror::Error;

#[derive(Error, Debug)]
pub enum VeracamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl VeracamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Capture device failures. Terminal until an explicit reset succeeds.
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Camera access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("Capture device unavailable: {details}")]
    Unavailable { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },

    #[error("Frame source is not ready (state: {state})")]
    NotReady { state: String },

    #[error("No capture parameters remembered for reset")]
    NoAcquireParameters,
}

/// Per-tick inference failures. Transient; the loop self-heals on the
/// next scheduled tick.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Inference request failed: {details}")]
    Inference { details: String },

    #[error("Inference response malformed: {details}")]
    MalformedResponse { details: String },

    #[error("Inference HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pre-dispatch rejections. User-correctable; no network round-trip has
/// happened when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("A verification is already in flight on the {provenance} channel")]
    Busy { provenance: String },

    #[error("No object selected for verification")]
    NoSelection,

    #[error("Unsupported media kind: {kind}")]
    UnsupportedMedia { kind: String },

    #[error("Snapshot unavailable: {details}")]
    SnapshotUnavailable { details: String },
}

/// Verification service failures. Surfaced to the user as a danger-status
/// result; never retried automatically.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Verification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Verification service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Verification response malformed: {details}")]
    MalformedResponse { details: String },
}

/// History persistence failures. Logged only, never surfaced as a
/// verification failure.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History append failed: {details}")]
    Append { details: String },
}

pub type Result<T> = std::result::Result<T, VeracamError>;
