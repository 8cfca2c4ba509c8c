use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// Label rendered for faces that resolve to no known identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face embedding vector (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Returns `None` when the dimensions differ; such vectors are not comparable.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

/// Face bounding box in pixel coordinates: (left, top, right, bottom).
///
/// Serialized as a `[left, top, right, bottom]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct FaceBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Map a box found on a frame downscaled by `scale` back to the original frame.
    ///
    /// Every edge is multiplied by `1 / scale` and truncated toward zero.
    pub fn upscale(&self, scale: f64) -> FaceBox {
        let factor = 1.0 / scale;
        let map = |v: i32| (v as f64 * factor) as i32;
        FaceBox {
            left: map(self.left),
            top: map(self.top),
            right: map(self.right),
            bottom: map(self.bottom),
        }
    }
}

impl From<[i32; 4]> for FaceBox {
    fn from([left, top, right, bottom]: [i32; 4]) -> Self {
        FaceBox::new(left, top, right, bottom)
    }
}

impl From<FaceBox> for [i32; 4] {
    fn from(b: FaceBox) -> Self {
        [b.left, b.top, b.right, b.bottom]
    }
}

/// Outcome label for a resolved face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Known(String),
    Unknown,
}

impl Label {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Label::Unknown)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Label::Known(name) => name,
            Label::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of matching a query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: Label,
    /// `1 - distance` of the accepted reference vector, clamped to [0, 1].
    pub confidence: f32,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            label: Label::Unknown,
            confidence: 0.0,
        }
    }
}

/// A face returned by the external encoder, in downscaled coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFace {
    #[serde(rename = "box")]
    pub face_box: FaceBox,
    pub embedding: Embedding,
}

/// One resolved face from a fully processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    /// Box in original-frame coordinates.
    pub face_box: FaceBox,
    pub label: Label,
    pub confidence: f32,
    pub frame_index: u64,
}

/// Status written to the event log for each detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Known,
    Intruder,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Known => "known",
            EventStatus::Intruder => "intruder",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&Label> for EventStatus {
    fn from(label: &Label) -> Self {
        if label.is_unknown() {
            EventStatus::Intruder
        } else {
            EventStatus::Known
        }
    }
}

/// Log entry handed to the event sink for every detection of a full cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub name: String,
    pub status: EventStatus,
    pub snapshot: Option<PathBuf>,
    pub timestamp: DateTime<Local>,
}

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Instant,
    /// Driver sequence number, informational only.
    pub sequence: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_345() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), Some(5.0));
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.6, 0.8, 0.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn test_upscale_quarter_scale() {
        let b = FaceBox::new(10, 20, 30, 40);
        assert_eq!(b.upscale(0.25), FaceBox::new(40, 80, 120, 160));
    }

    #[test]
    fn test_upscale_truncates() {
        // 1 / 0.3 = 3.333..; 10 * 3.333.. = 33.33.. -> 33
        let b = FaceBox::new(10, 1, 2, 7);
        assert_eq!(b.upscale(0.3), FaceBox::new(33, 3, 6, 23));
    }

    #[test]
    fn test_upscale_identity() {
        let b = FaceBox::new(5, 6, 7, 8);
        assert_eq!(b.upscale(1.0), b);
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::Unknown.to_string(), "Unknown");
        assert_eq!(Label::Known("alice".into()).to_string(), "alice");
    }

    #[test]
    fn test_event_status_from_label() {
        assert_eq!(EventStatus::from(&Label::Unknown), EventStatus::Intruder);
        assert_eq!(EventStatus::from(&Label::Known("bob".into())), EventStatus::Known);
    }

    #[test]
    fn test_encoded_face_json_shape() {
        let json = r#"{"box":[1,2,3,4],"embedding":[0.5,0.25]}"#;
        let face: EncodedFace = serde_json::from_str(json).unwrap();
        assert_eq!(face.face_box, FaceBox::new(1, 2, 3, 4));
        assert_eq!(face.embedding.values, vec![0.5, 0.25]);
    }
}
