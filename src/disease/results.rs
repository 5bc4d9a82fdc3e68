//! Detector result shapes
//!
//! Loading strategies hand back structurally different results: the hub-style
//! loader produces a detections table, the direct and reference loaders a list
//! of boxes with a separate class-name vocabulary. `DetectionResult` tags which
//! one was produced so extraction never has to guess.

use polars::prelude::*;

use crate::error::RecognizerError;

/// One candidate box in source-image pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub xyxy: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

/// Label + confidence selected from a result
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

pub enum DetectionResult {
    /// Columns `xmin, ymin, xmax, ymax, confidence, class, name`, one row per detection
    Tabular(DataFrame),
    /// Boxes referencing classes by index into `names`
    BoxList {
        boxes: Vec<DetectionBox>,
        names: Vec<String>,
    },
}

/// Column names of the tabular shape
pub const TABULAR_COLUMNS: [&str; 7] = ["xmin", "ymin", "xmax", "ymax", "confidence", "class", "name"];

impl DetectionResult {
    /// Build the tabular shape from decoded boxes
    pub fn tabular(boxes: &[DetectionBox], names: &[String]) -> PolarsResult<Self> {
        let coord = |i: usize| boxes.iter().map(|b| b.xyxy[i] as f64).collect::<Vec<f64>>();
        let confidence: Vec<f64> = boxes.iter().map(|b| b.confidence as f64).collect();
        let class: Vec<i64> = boxes.iter().map(|b| b.class_id as i64).collect();
        let name: Vec<String> = boxes
            .iter()
            .map(|b| names.get(b.class_id).cloned().unwrap_or_else(|| b.class_id.to_string()))
            .collect();

        let df = df!(
            "xmin" => coord(0),
            "ymin" => coord(1),
            "xmax" => coord(2),
            "ymax" => coord(3),
            "confidence" => confidence,
            "class" => class,
            "name" => name,
        )?;
        Ok(DetectionResult::Tabular(df))
    }

    pub fn box_list(boxes: Vec<DetectionBox>, names: Vec<String>) -> Self {
        DetectionResult::BoxList { boxes, names }
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            DetectionResult::Tabular(_) => "tabular",
            DetectionResult::BoxList { .. } => "box-list",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DetectionResult::Tabular(df) => df.height(),
            DetectionResult::BoxList { boxes, .. } => boxes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest-confidence detection; the first one wins a tie.
    /// `Ok(None)` means the model found nothing.
    pub fn best(&self) -> Result<Option<Detection>, RecognizerError> {
        let found = match self {
            DetectionResult::Tabular(df) => best_row(df)?,
            DetectionResult::BoxList { boxes, names } => best_box(boxes, names)?,
        };

        Ok(found.map(|(label, confidence)| Detection {
            label,
            confidence: clamp_confidence(confidence),
        }))
    }
}

fn parse_error(e: impl std::fmt::Display) -> RecognizerError {
    RecognizerError::Parse(e.to_string())
}

fn best_row(df: &DataFrame) -> Result<Option<(String, f64)>, RecognizerError> {
    if let Some(missing) = TABULAR_COLUMNS.iter().find(|name| df.column(name).is_err()) {
        return Err(parse_error(format!("detections table has no {} column", missing)));
    }
    if df.height() == 0 {
        return Ok(None);
    }

    let confidence = df
        .column("confidence")
        .and_then(|c| c.f64())
        .map_err(parse_error)?;
    let names = df.column("name").and_then(|c| c.str()).map_err(parse_error)?;

    let mut best: Option<(usize, f64)> = None;
    for (row, value) in confidence.into_iter().enumerate() {
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            continue;
        };
        if best.map_or(true, |(_, current)| value > current) {
            best = Some((row, value));
        }
    }

    match best {
        Some((row, value)) => {
            let label = names
                .get(row)
                .ok_or_else(|| parse_error(format!("row {} has no name", row)))?;
            Ok(Some((label.to_string(), value)))
        }
        None => Ok(None),
    }
}

fn best_box(boxes: &[DetectionBox], names: &[String]) -> Result<Option<(String, f64)>, RecognizerError> {
    let mut best: Option<&DetectionBox> = None;
    for candidate in boxes.iter().filter(|b| !b.confidence.is_nan()) {
        if best.map_or(true, |current| candidate.confidence > current.confidence) {
            best = Some(candidate);
        }
    }

    match best {
        Some(b) => {
            let label = names.get(b.class_id).ok_or_else(|| {
                parse_error(format!(
                    "class {} outside vocabulary of {} names",
                    b.class_id,
                    names.len()
                ))
            })?;
            Ok(Some((label.clone(), b.confidence as f64)))
        }
        None => Ok(None),
    }
}

/// Confidences are reported in [0, 1]
pub fn clamp_confidence(value: f64) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0) as f32
    }
}
