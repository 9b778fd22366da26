/// YOLO face locator using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference and NMS post-processing.
/// Keypoint columns of pose-style face models are ignored.
use std::path::Path;

use crate::detection::domain::face_locator::FaceLocator;
use crate::detection::infrastructure::execution_provider::build_session;
use crate::detection::infrastructure::math::{self, RawDetection};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

pub struct OnnxYoloLocator {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloLocator {
    /// Load a YOLO ONNX model.
    ///
    /// The input resolution is read from the model's NCHW input shape,
    /// falling back to 640 when the shape is dynamic.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl FaceLocator for OnnxYoloLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>> {
        let (input_tensor, letterbox) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let mut raw = parse_detections(data, shape[1], shape[2], self.confidence, &letterbox);
        let (fw, fh) = (frame.width(), frame.height());
        Ok(math::nms(&mut raw, NMS_IOU_THRESH)
            .iter()
            .filter_map(|d| d.to_bounding_box().clamp_to(fw, fh))
            .collect())
    }
}

/// Geometry needed to map letterboxed model coordinates back to the frame.
#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Parse `[1, dim1, dim2]` YOLO output rows `[cx, cy, w, h, conf, ...]`.
///
/// Exports differ on whether features or detections come first; the
/// smaller dimension is taken to be the feature axis.
fn parse_detections(
    data: &[f32],
    dim1: usize,
    dim2: usize,
    confidence: f64,
    letterbox: &Letterbox,
) -> Vec<RawDetection> {
    let transposed = dim1 < dim2;
    let (num_dets, num_feats) = if transposed { (dim2, dim1) } else { (dim1, dim2) };
    if num_feats < 5 {
        return Vec::new();
    }
    let at = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let conf = at(i, 4);
        if conf < confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        dets.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            score: conf,
        });
    }
    dets
}

/// Letterbox-resize a frame to `target_size` × `target_size`, padding with
/// YOLO's conventional 114 gray.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // Scale = min(640/200, 640/100) = 3.2 → 640x320, pad_y = 160
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 3.2).abs() < 0.01);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 160);
    }

    #[test]
    fn test_letterbox_pad_value() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);
        let inside = tensor[[0, 0, lb.pad_y as usize + 1, 1]];
        assert!((inside - 1.0).abs() < 0.01);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_detections_row_major() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0,
            pad_y: 10,
        };
        // Six detections × 5 features; only the first is confident
        let mut data = vec![0.0f32; 6 * 5];
        data[..5].copy_from_slice(&[100.0, 60.0, 40.0, 20.0, 0.9]);
        data[5..10].copy_from_slice(&[10.0, 10.0, 5.0, 5.0, 0.1]);
        let dets = parse_detections(&data, 6, 5, 0.5, &lb);
        assert_eq!(dets.len(), 1);
        // x1 = (100 - 20) / 2 = 40, y1 = (60 - 10 - 10) / 2 = 20
        assert!((dets[0].x1 - 40.0).abs() < 1e-9);
        assert!((dets[0].y1 - 20.0).abs() < 1e-9);
        assert!((dets[0].x2 - 60.0).abs() < 1e-9);
        assert!((dets[0].y2 - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_detections_transposed_matches_row_major() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        };
        // 5 features × 8 detections (features first); only det 3 is confident
        let num_dets = 8;
        let mut data = vec![0.0f32; 5 * num_dets];
        let row = [50.0, 50.0, 10.0, 10.0, 0.8];
        for (feat, value) in row.iter().enumerate() {
            data[feat * num_dets + 3] = *value;
        }
        let dets = parse_detections(&data, 5, num_dets, 0.5, &lb);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].to_bounding_box(), BoundingBox::new(45, 45, 10, 10));
    }

    #[test]
    fn test_parse_detections_too_few_features() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        };
        assert!(parse_detections(&[0.0; 8], 2, 4, 0.5, &lb).is_empty());
    }
}
