//! ONNX inference backends (tract)
//!
//! `OnnxDetector` runs a YOLOv5-style export whose single output is
//! `[1, N, 5 + classes]` rows of (cx, cy, w, h, objectness, class scores...).
//! `OnnxClassifier` runs the legacy 28x28 NHWC classifier.

use std::cmp::Ordering;
use std::path::Path;

use image::GenericImageView;
use tract_onnx::prelude::tract_ndarray::{Array4, ArrayView2, Axis, Ix3};
use tract_onnx::prelude::*;

use super::preprocess::{detector_tensor, open_image, LEGACY_INPUT_SIZE};
use super::recognizer::{Detector, ImageClassifier};
use super::results::{DetectionBox, DetectionResult};
use crate::error::RecognizerError;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Upper bound on boxes kept after suppression
const MAX_DETECTIONS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Which result shape a detector hands back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Tabular,
    BoxList,
}

pub struct OnnxDetector {
    plan: OnnxPlan,
    names: Vec<String>,
    settings: DetectorSettings,
    shape: ResultShape,
}

impl OnnxDetector {
    pub fn load(
        weights: &Path,
        names: Vec<String>,
        settings: DetectorSettings,
        shape: ResultShape,
    ) -> TractResult<Self> {
        if names.is_empty() {
            anyhow::bail!("detector has an empty class vocabulary");
        }
        let side = settings.input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(weights)?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            plan,
            names,
            settings,
            shape,
        })
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, image_path: &Path) -> Result<DetectionResult, RecognizerError> {
        let img = open_image(image_path)?;
        let (width, height) = img.dimensions();
        let input: Tensor = detector_tensor(&img, self.settings.input_size).into();

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| RecognizerError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| RecognizerError::Inference("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| RecognizerError::Parse(e.to_string()))?
            .into_dimensionality::<Ix3>()
            .map_err(|e| RecognizerError::Parse(format!("expected [1, N, 5 + classes]: {}", e)))?;

        let side = self.settings.input_size as f32;
        let boxes = decode_predictions(
            view.index_axis(Axis(0), 0),
            self.settings.conf_threshold,
            self.settings.iou_threshold,
            width as f32 / side,
            height as f32 / side,
        )?;

        match self.shape {
            ResultShape::Tabular => DetectionResult::tabular(&boxes, &self.names)
                .map_err(|e| RecognizerError::Parse(e.to_string())),
            ResultShape::BoxList => Ok(DetectionResult::box_list(boxes, self.names.clone())),
        }
    }
}

/// Turn raw prediction rows into boxes: score filter, class-aware NMS,
/// coordinates scaled back to the source image. Sorted by confidence, highest first.
pub fn decode_predictions(
    rows: ArrayView2<f32>,
    conf_threshold: f32,
    iou_threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<DetectionBox>, RecognizerError> {
    if rows.ncols() < 6 {
        return Err(RecognizerError::Parse(format!(
            "prediction rows have {} values, need at least 6",
            rows.ncols()
        )));
    }

    let mut candidates = Vec::new();
    for row in rows.outer_iter() {
        let objectness = row[4];
        if objectness < conf_threshold {
            continue;
        }

        let (class_id, class_score) = row
            .iter()
            .skip(5)
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &score)| {
                if score > best.1 {
                    (i, score)
                } else {
                    best
                }
            });

        let confidence = objectness * class_score;
        if confidence < conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        candidates.push(DetectionBox {
            xyxy: [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
            confidence,
            class_id,
        });
    }

    Ok(non_max_suppression(candidates, iou_threshold))
}

/// Greedy per-class suppression; stable for equal confidences
pub fn non_max_suppression(mut candidates: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<DetectionBox> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
            if kept.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Legacy small-image classifier
pub struct OnnxClassifier {
    plan: OnnxPlan,
}

impl OnnxClassifier {
    /// Load and check that the output has one score per expected class
    pub fn load(path: &Path, n_classes: usize) -> TractResult<Self> {
        let side = LEGACY_INPUT_SIZE as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, f32::fact([1, side, side, 3]).into())?
            .into_optimized()?
            .into_runnable()?;

        let output = plan.model().output_fact(0)?;
        if let Some(shape) = output.shape.as_concrete() {
            let scores: usize = shape.iter().product();
            if scores != n_classes {
                anyhow::bail!(
                    "legacy classifier outputs {:?}, expected {} class scores",
                    shape,
                    n_classes
                );
            }
        }

        Ok(Self { plan })
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, batch: Array4<f32>) -> Result<Vec<f32>, RecognizerError> {
        let input: Tensor = batch.into();
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| RecognizerError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| RecognizerError::Inference("model produced no outputs".to_string()))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|e| RecognizerError::Parse(e.to_string()))?;
        Ok(scores.iter().copied().collect())
    }
}
