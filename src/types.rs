use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Extension of every extracted frame image.
pub const FRAME_EXTENSION: &str = "jpg";

/// Extension of every label file.
pub const LABEL_EXTENSION: &str = "txt";

/// Stable identifier assigned to a video when it is ingested.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a single, filesystem-safe path component.
    pub fn dir_name(&self) -> String {
        let sanitized = sanitize_filename::sanitize(&self.0);
        if sanitized.is_empty() {
            "_".to_string()
        } else {
            sanitized
        }
    }

    /// Fails unless the id is its own directory name. Storage is keyed by
    /// `dir_name`, so two ids sanitizing to the same name would share it.
    pub fn ensure_storable(&self) -> Result<()> {
        let dir_name = self.dir_name();
        if dir_name != self.0 {
            return Err(Error::Validation(format!(
                "video id '{}' is not a plain file name (it would be stored as '{}')",
                self.0, dir_name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VideoId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Video metadata. Width and height are fixed at ingestion and are the
/// normalization denominators for every annotation of the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub name: String,
    pub width: u32,
    pub height: u32,
}

fn default_visible() -> bool {
    true
}

/// A pixel-space rectangle on one frame.
///
/// The interpolation fields are carried through storage untouched; the
/// editor that produces keyframes owns their meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    #[serde(rename = "class")]
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default, rename = "interpolationID")]
    pub interpolation_id: Option<i64>,
    #[serde(default)]
    pub interpolation_number: Option<i64>,
}

impl BoundingBox {
    pub fn new(label: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            label: label.into(),
            x,
            y,
            width,
            height,
            display_order: 0,
            visible: true,
            interpolate: false,
            interpolation_id: None,
            interpolation_number: None,
        }
    }

    /// Returns a description of the first geometry violation, if any.
    pub fn check_bounds(&self, frame_width: u32, frame_height: u32) -> Option<String> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Some(format!(
                "box '{}' has negative or non-finite geometry ({}, {}, {}, {})",
                self.label, self.x, self.y, self.width, self.height
            ));
        }
        if self.x + self.width > frame_width as f64 || self.y + self.height > frame_height as f64 {
            return Some(format!(
                "box '{}' at ({}, {}) size {}x{} exceeds frame {}x{}",
                self.label, self.x, self.y, self.width, self.height, frame_width, frame_height
            ));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An ordered outline of at least three vertices on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Polygon {
    #[serde(rename = "class")]
    pub label: String,
    pub points: Vec<Point>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default, rename = "interpolationID")]
    pub interpolation_id: Option<i64>,
    #[serde(default)]
    pub interpolation_number: Option<i64>,
}

impl Polygon {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points: points.into_iter().map(|(x, y)| Point { x, y }).collect(),
            display_order: 0,
            visible: true,
            interpolate: false,
            interpolation_id: None,
            interpolation_number: None,
        }
    }

    pub fn check_bounds(&self, frame_width: u32, frame_height: u32) -> Option<String> {
        if self.points.len() < 3 {
            return Some(format!(
                "polygon '{}' has {} vertices, at least 3 are required",
                self.label,
                self.points.len()
            ));
        }
        let (w, h) = (frame_width as f64, frame_height as f64);
        self.points
            .iter()
            .find(|p| !(p.x.is_finite() && p.y.is_finite()) || p.x < 0.0 || p.y < 0.0 || p.x > w || p.y > h)
            .map(|p| {
                format!(
                    "polygon '{}' vertex ({}, {}) lies outside frame {}x{}",
                    self.label, p.x, p.y, frame_width, frame_height
                )
            })
    }

    /// The axis-aligned rectangle enclosing every vertex.
    pub fn bounding_box(&self) -> BoundingBox {
        let (x_min, y_min, x_max, y_max) = self.points.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(x_min, y_min, x_max, y_max), p| {
                (x_min.min(p.x), y_min.min(p.y), x_max.max(p.x), y_max.max(p.y))
            },
        );
        BoundingBox {
            label: self.label.clone(),
            x: x_min,
            y: y_min,
            width: x_max - x_min,
            height: y_max - y_min,
            display_order: self.display_order,
            visible: self.visible,
            interpolate: self.interpolate,
            interpolation_id: self.interpolation_id,
            interpolation_number: self.interpolation_number,
        }
    }
}

/// Every annotation of one video, keyed by frame index.
///
/// Within a frame the order of insertion is the display order and is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    #[serde(default)]
    pub boxes: BTreeMap<u32, Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub polygons: BTreeMap<u32, Vec<Polygon>>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_box(&mut self, frame: u32, bbox: BoundingBox) {
        self.boxes.entry(frame).or_default().push(bbox);
    }

    pub fn push_polygon(&mut self, frame: u32, polygon: Polygon) {
        self.polygons.entry(frame).or_default().push(polygon);
    }

    pub fn boxes_at(&self, frame: u32) -> &[BoundingBox] {
        self.boxes.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn polygons_at(&self, frame: u32) -> &[Polygon] {
        self.polygons.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest frame index carrying at least one annotation.
    pub fn max_annotated_frame(&self) -> Option<u32> {
        let boxes = self
            .boxes
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| *k)
            .next_back();
        let polygons = self
            .polygons
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| *k)
            .next_back();
        boxes.max(polygons)
    }

    pub fn annotation_count(&self) -> usize {
        self.boxes.values().map(Vec::len).sum::<usize>()
            + self.polygons.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.annotation_count() == 0
    }

    /// Distinct class labels across boxes and polygons, sorted.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.boxes
            .values()
            .flatten()
            .map(|b| b.label.as_str())
            .chain(self.polygons.values().flatten().map(|p| p.label.as_str()))
            .collect()
    }
}

/// The directories and manifest of one video's exported dataset.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub train_labels_dir: PathBuf,
    pub val_labels_dir: PathBuf,
    pub train_images_dir: PathBuf,
    pub val_images_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl OutputDirs {
    pub fn dirs(&self) -> [&PathBuf; 4] {
        [
            &self.train_images_dir,
            &self.val_images_dir,
            &self.train_labels_dir,
            &self.val_labels_dir,
        ]
    }
}

/// Counters collected while writing a dataset.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportStats {
    pub frames_written: usize,
    pub empty_frames: usize,
    pub annotations_written: usize,
    pub unresolved_classes: usize,
    pub invalid_geometry: usize,
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped(&self) -> usize {
        self.unresolved_classes + self.invalid_geometry
    }

    pub fn print_summary(&self) {
        log::info!("=== Export Summary ===");
        log::info!("Frames written: {}", self.frames_written);
        log::info!("Frames without objects: {}", self.empty_frames);
        log::info!("Annotations written: {}", self.annotations_written);

        if self.skipped() > 0 {
            log::warn!(
                "Total skipped annotations: {} (unresolved class: {}, invalid geometry: {})",
                self.skipped(),
                self.unresolved_classes,
                self.invalid_geometry
            );
        }
    }
}
