mod router;

pub use router::{ChannelState, ResponseRouter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::VerifyConfig;
use crate::error::TransportError;

/// Verdict categories returned by the verification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Warning,
    Danger,
}

impl VerificationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Warning => "warning",
            VerificationStatus::Danger => "danger",
        }
    }
}

/// One per-agent finding inside a verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailEntry {
    pub agent: String,
    pub finding: String,
    pub status: String,
}

/// Verification outcome as it travels on the wire. Also synthesized
/// locally when the transport fails, so the sinks always receive the same
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub title: String,
    pub summary: String,

    /// Confidence in percent (0.0 - 100.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<DetailEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_for_human_review: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_id: Option<String>,
}

impl VerificationResult {
    /// Result synthesized for a failed dispatch. Carries no
    /// verification_id, so it never reaches the history log.
    pub fn failure<S: Into<String>>(summary: S) -> Self {
        Self {
            status: VerificationStatus::Danger,
            title: "Verification Failed".to_string(),
            summary: summary.into(),
            confidence: None,
            explanation: None,
            remediation: None,
            details: None,
            recommended_for_human_review: None,
            verification_id: None,
        }
    }
}

/// JSON body posted to the verification service. Exactly one of the
/// media fields is set, depending on the declared media kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequestBody {
    pub object_class: String,
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_data_url: Option<String>,

    pub file_type: String,
}

/// Transport boundary to the verification service. Implementations run
/// each request to completion exactly once; retries are the user's call.
#[async_trait]
pub trait VerificationTransport: Send + Sync {
    async fn verify(&self, body: &VerifyRequestBody) -> Result<VerificationResult, TransportError>;
}

/// reqwest-backed verification client. Any non-2xx response is a hard
/// failure; there is no partial or streaming response handling.
pub struct HttpVerificationClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVerificationClient {
    pub fn new(config: &VerifyConfig) -> Result<Self, TransportError> {
        Self::with_timeout(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl VerificationTransport for HttpVerificationClient {
    async fn verify(&self, body: &VerifyRequestBody) -> Result<VerificationResult, TransportError> {
        let url = format!("{}/verify", self.base_url);
        debug!(
            "Posting verification request for '{}' (agent: {}, file_type: {})",
            body.object_class, body.agent_id, body.file_type
        );

        let resp = self.client.post(&url).json(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        let result: VerificationResult =
            resp.json()
                .await
                .map_err(|e| TransportError::MalformedResponse {
                    details: e.to_string(),
                })?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_absent_media_fields() {
        let body = VerifyRequestBody {
            object_class: "bottle".to_string(),
            agent_id: "general_purpose".to_string(),
            image_data_url: Some("data:image/jpeg;base64,AAAA".to_string()),
            text_content: None,
            media_data_url: None,
            file_type: "image/jpeg".to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["object_class"], "bottle");
        assert_eq!(json["agent_id"], "general_purpose");
        assert_eq!(json["file_type"], "image/jpeg");
        assert!(json.get("text_content").is_none());
        assert!(json.get("media_data_url").is_none());
    }

    #[test]
    fn test_result_deserializes_service_response() {
        let json = r#"{
            "verification_id": "4f7a9a1e",
            "status": "verified",
            "title": "Authentic",
            "confidence": 92.5,
            "summary": "No tampering indicators found.",
            "details": [
                {"agent": "general_purpose", "finding": "Label intact", "status": "success"}
            ],
            "recommended_for_human_review": false
        }"#;

        let result: VerificationResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.status, VerificationStatus::Verified);
        assert_eq!(result.title, "Authentic");
        assert_eq!(result.confidence, Some(92.5));
        assert_eq!(result.verification_id.as_deref(), Some("4f7a9a1e"));
        assert_eq!(result.details.as_ref().unwrap().len(), 1);
        assert!(result.explanation.is_none());
    }

    #[test]
    fn test_failure_result_shape() {
        let result = VerificationResult::failure("connection refused");
        assert_eq!(result.status, VerificationStatus::Danger);
        assert_eq!(result.title, "Verification Failed");
        assert_eq!(result.summary, "connection refused");
        assert!(result.verification_id.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Danger).unwrap(),
            "\"danger\""
        );
        assert_eq!(
            serde_json::from_str::<VerificationStatus>("\"warning\"").unwrap(),
            VerificationStatus::Warning
        );
    }
}
