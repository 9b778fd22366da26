use serde::{Deserialize, Serialize};

use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::UNKNOWN_LABEL;

/// One face found in a processed frame, in original-frame coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    /// Matched identity, `None` when no enrolled identity was close enough.
    pub label: Option<String>,
    pub bbox: BoundingBox,
}

impl DetectedFace {
    pub fn new(label: Option<String>, bbox: BoundingBox) -> Self {
        Self { label, bbox }
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Every face found in one frame. An empty batch means "no faces visible".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub frame_index: u64,
    pub faces: Vec<DetectedFace>,
}

impl DetectionBatch {
    pub fn new(frame_index: u64, faces: Vec<DetectedFace>) -> Self {
        Self { frame_index, faces }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.faces.iter().map(DetectedFace::display_label).collect()
    }
}

/// Wire form of a single face.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Wire form of a [`DetectionBatch`], published as a `faces_update` event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacesUpdate {
    pub faces: Vec<FaceRecord>,
}

impl From<&DetectionBatch> for FacesUpdate {
    fn from(batch: &DetectionBatch) -> Self {
        Self {
            faces: batch
                .faces
                .iter()
                .map(|face| FaceRecord {
                    id: face.display_label().to_string(),
                    x: face.bbox.x,
                    y: face.bbox.y,
                    w: face.bbox.width,
                    h: face.bbox.height,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_face_is_unknown_on_the_wire() {
        let batch = DetectionBatch::new(
            7,
            vec![
                DetectedFace::new(Some("alice".into()), BoundingBox::new(40, 80, 120, 160)),
                DetectedFace::new(None, BoundingBox::new(0, 4, 8, 12)),
            ],
        );
        let update = FacesUpdate::from(&batch);
        assert_eq!(update.faces[0].id, "alice");
        assert_eq!(update.faces[1].id, "Unknown");
        assert_eq!(batch.labels(), vec!["alice", "Unknown"]);
    }

    #[test]
    fn test_wire_shape() {
        let batch = DetectionBatch::new(
            1,
            vec![DetectedFace::new(
                Some("bob".into()),
                BoundingBox::new(4, 8, 12, 16),
            )],
        );
        let json = serde_json::to_value(FacesUpdate::from(&batch)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"faces": [{"id": "bob", "x": 4, "y": 8, "w": 12, "h": 16}]})
        );
    }

    #[test]
    fn test_empty_batch_serializes_to_empty_list() {
        let json = serde_json::to_string(&FacesUpdate::from(&DetectionBatch::default())).unwrap();
        assert_eq!(json, r#"{"faces":[]}"#);
    }
}
