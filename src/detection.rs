use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One candidate object reported by the inference engine. Ephemeral -
/// recomputed every detection tick, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Object class reported by the detector (e.g. "bottle")
    pub class_label: String,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
    /// Bounding box in normalized detector coordinate space
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new<S: Into<String>>(class_label: S, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bounding_box,
        }
    }
}

/// The candidate set published for one detection tick. Ordered as the
/// detector emitted them (after filtering and smoothing) and replaced
/// wholesale each tick - class labels absent this tick simply disappear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// Find a detection by class label.
    pub fn find_class(&self, class_label: &str) -> Option<&Detection> {
        self.detections
            .iter()
            .find(|d| d.class_label == class_label)
    }

    /// Build the next published set from the previously published set and
    /// the detector's fresh observations.
    ///
    /// Raw detections at or below `confidence_threshold` are discarded.
    /// A surviving detection whose class label existed in `prev` has its
    /// box blended `smoothing_factor` of the way from the previous box
    /// toward the new observation; first-sight detections pass through
    /// unsmoothed. Matching is by class label only, so two instances of
    /// the same class in frame will blend across each other.
    ///
    /// Pure function of its inputs: re-running with the same `prev` and
    /// `fresh` yields the same set, so smoothing is applied exactly once
    /// per tick.
    pub fn advance(
        prev: &DetectionSet,
        fresh: Vec<Detection>,
        confidence_threshold: f32,
        smoothing_factor: f32,
    ) -> DetectionSet {
        let mut detections = Vec::with_capacity(fresh.len());

        for candidate in fresh {
            if candidate.confidence <= confidence_threshold {
                continue;
            }

            let bounding_box = match prev.find_class(&candidate.class_label) {
                Some(existing) => existing
                    .bounding_box
                    .lerp_toward(&candidate.bounding_box, smoothing_factor),
                None => candidate.bounding_box,
            };

            detections.push(Detection {
                bounding_box,
                ..candidate
            });
        }

        DetectionSet { detections }
    }

    /// Observational status line for the current set. Never gates the
    /// detection loop.
    pub fn status_message(&self) -> String {
        if self.detections.is_empty() {
            "No objects detected. Adjust position or lighting.".to_string()
        } else {
            format!(
                "{} object(s) detected. Tap to verify.",
                self.detections.len()
            )
        }
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}
