use async_trait::async_trait;
use std::time::SystemTime;
use tracing::{debug, trace};

use crate::error::CaptureError;
use crate::frame::{FrameData, FrameFormat};
use crate::source::{CaptureBackend, CaptureRequest};

/// Capture backend that synthesizes MJPEG frames when no real device is
/// attached. Each frame carries a JFIF header, a varying payload pattern
/// and an EOI marker so downstream consumers see structurally plausible
/// JPEG bytes.
pub struct TestPatternBackend {
    request: Option<CaptureRequest>,
    frame_counter: u64,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self {
            request: None,
            frame_counter: 0,
        }
    }
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for TestPatternBackend {
    async fn open(&mut self, request: &CaptureRequest) -> Result<(), CaptureError> {
        debug!(
            "Test pattern backend opened ({}x{} @ {}fps)",
            request.resolution.0, request.resolution.1, request.fps
        );
        self.request = Some(request.clone());
        Ok(())
    }

    async fn grab(&mut self) -> Result<FrameData, CaptureError> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| CaptureError::CaptureStream {
                details: "backend not opened".to_string(),
            })?;

        let frame_id = self.frame_counter;
        self.frame_counter += 1;

        let (width, height) = request.resolution;

        let mut data = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01,
            0x01, 0x00, 0x48, 0x00, 0x48, 0x00, 0x00,
        ];

        let pattern_size = 1000 + (frame_id % 500) as usize;
        let pattern_byte = (frame_id % 256) as u8;
        data.extend(vec![pattern_byte; pattern_size]);
        data.extend_from_slice(&[0xFF, 0xD9]);

        let data_len = data.len();
        let frame = FrameData::new(
            frame_id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Mjpeg,
        );

        trace!(
            "Generated test pattern frame {} ({}x{}, {} bytes)",
            frame_id,
            width,
            height,
            data_len
        );

        Ok(frame)
    }

    async fn close(&mut self) {
        debug!("Test pattern backend closed");
        self.request = None;
    }
}
