use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

use crate::config::DetectorConfig;
use crate::detection::Detection;
use crate::detector::ObjectDetector;
use crate::error::DetectorError;
use crate::frame::FrameData;
use crate::geometry::BoundingBox;

/// Inference engine client. Posts the current frame and parses the
/// engine's prediction list:
/// `{"predictions": [{"class": "...", "score": 0.8, "bbox": [x,y,w,h]}]}`.
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        Self::with_timeout(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self, DetectorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct PredictionList {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "class")]
    class_label: String,
    score: f32,
    bbox: [f32; 4],
}

impl From<Prediction> for Detection {
    fn from(p: Prediction) -> Self {
        Detection {
            class_label: p.class_label,
            confidence: p.score,
            bounding_box: BoundingBox::new(p.bbox[0], p.bbox[1], p.bbox[2], p.bbox[3]),
        }
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, frame: &FrameData) -> Result<Vec<Detection>, DetectorError> {
        // A frame with no bytes yet is not an error; there is simply
        // nothing to see this tick.
        if frame.data.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/detect", self.base_url);

        let part = Part::bytes(frame.data.to_vec())
            .file_name("frame.jpg")
            .mime_str(frame.format.mime_type())?;

        let form = Form::new()
            .part("frame", part)
            .text("frame_id", frame.id.to_string())
            .text("width", frame.width.to_string())
            .text("height", frame.height.to_string());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(DetectorError::Inference {
                details: format!("detector returned {}", resp.status()),
            });
        }

        let list: PredictionList =
            resp.json()
                .await
                .map_err(|e| DetectorError::MalformedResponse {
                    details: e.to_string(),
                })?;

        trace!(
            "Frame {} produced {} raw prediction(s)",
            frame.id,
            list.predictions.len()
        );

        Ok(list.predictions.into_iter().map(Detection::from).collect())
    }
}
