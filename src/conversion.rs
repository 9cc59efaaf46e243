//! Pixel-space annotations to resolution-independent YOLO label lines.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::catalog::ClassRegistry;
use crate::config::Format;
use crate::error::{Error, Result};
use crate::types::{AnnotationSet, BoundingBox, Polygon};

/// Index written for a class that has no entry in the class map.
pub const UNKNOWN_CLASS: i64 = -1;

/// Class names with stable indices: the index of a class is its position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassMap {
    names: Vec<String>,
    aliases: BTreeMap<String, usize>,
}

impl ClassMap {
    /// Keep the caller's order.
    pub fn ordered<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::default();
        for name in names {
            let name = name.into();
            if !map.aliases.contains_key(&name) {
                map.aliases.insert(name.clone(), map.names.len());
                map.names.push(name);
            }
        }
        map
    }

    /// Sort and deduplicate the names first.
    pub fn sorted<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self::ordered(names)
    }

    /// Build from the class registry. Names are sorted for indexing; a label
    /// may name the class or carry its registry id.
    pub fn from_registry(registry: &ClassRegistry) -> Self {
        let mut map = Self::sorted(registry.values().cloned());
        for (id, name) in registry {
            if let Some(&index) = map.aliases.get(name) {
                map.aliases.entry(id.to_string()).or_insert(index);
            }
        }
        map
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.aliases.get(label).copied()
    }

    /// The class index, or [`UNKNOWN_CLASS`] for an unmapped label.
    pub fn resolve(&self, label: &str) -> i64 {
        self.index_of(label)
            .map(|index| index as i64)
            .unwrap_or(UNKNOWN_CLASS)
    }
}

/// A box in fractions of the frame size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FractionalBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

fn in_unit_range(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// Convert a pixel box into (center, size) fractions of the frame.
///
/// All four values must lie in (0, 1]; anything else means the box is
/// degenerate or leaves the frame and is reported, never clamped.
pub fn to_fractional(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Result<FractionalBox> {
    if frame_width == 0 || frame_height == 0 {
        return Err(Error::Validation(format!(
            "frame size {}x{} cannot normalize boxes",
            frame_width, frame_height
        )));
    }
    let (w, h) = (frame_width as f64, frame_height as f64);
    let fractional = FractionalBox {
        x_center: (bbox.x + bbox.width / 2.0) / w,
        y_center: (bbox.y + bbox.height / 2.0) / h,
        width: bbox.width / w,
        height: bbox.height / h,
    };

    let values = [
        fractional.x_center,
        fractional.y_center,
        fractional.width,
        fractional.height,
    ];
    if values.iter().all(|v| in_unit_range(*v)) && bbox.check_bounds(frame_width, frame_height).is_none() {
        Ok(fractional)
    } else {
        Err(Error::Validation(format!(
            "box '{}' at ({}, {}) size {}x{} does not fit frame {}x{}",
            bbox.label, bbox.x, bbox.y, bbox.width, bbox.height, frame_width, frame_height
        )))
    }
}

/// Normalize every vertex of a polygon to [0, 1].
pub fn polygon_to_fractional(
    polygon: &Polygon,
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<(f64, f64)>> {
    if let Some(problem) = polygon.check_bounds(frame_width, frame_height) {
        return Err(Error::Validation(problem));
    }
    let (w, h) = (frame_width as f64, frame_height as f64);
    Ok(polygon.points.iter().map(|p| (p.x / w, p.y / h)).collect())
}

/// Corners of a box in drawing order, for polygon output.
fn box_corners(bbox: &BoundingBox) -> Polygon {
    let (x1, y1) = (bbox.x, bbox.y);
    let (x2, y2) = (bbox.x + bbox.width, bbox.y + bbox.height);
    let mut polygon = Polygon::new(
        bbox.label.clone(),
        vec![(x1, y1), (x2, y1), (x2, y2), (x1, y2)],
    );
    polygon.display_order = bbox.display_order;
    polygon
}

pub fn format_bbox_line(class_index: usize, b: &FractionalBox) -> String {
    format!(
        "{} {:.6} {:.6} {:.6} {:.6}\n",
        class_index, b.x_center, b.y_center, b.width, b.height
    )
}

pub fn format_polygon_line(class_index: usize, points: &[(f64, f64)]) -> String {
    let mut line = format!("{}", class_index);
    for (x, y) in points {
        line.push_str(&format!(" {:.6} {:.6}", x, y));
    }
    line.push('\n');
    line
}

/// Label file content of one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLabels {
    pub content: String,
    pub written: usize,
    pub unresolved_classes: usize,
    pub invalid_geometry: usize,
}

/// Render the label lines of one frame.
///
/// Annotations with an unmapped class or invalid geometry are left out and
/// counted; the caller decides whether that is acceptable.
pub fn convert_frame(
    boxes: &[BoundingBox],
    polygons: &[Polygon],
    class_map: &ClassMap,
    format: Format,
    frame_width: u32,
    frame_height: u32,
) -> FrameLabels {
    let mut labels = FrameLabels {
        content: String::with_capacity((boxes.len() + polygons.len()) * 64),
        ..FrameLabels::default()
    };

    for bbox in boxes {
        let Some(class_index) = class_map.index_of(&bbox.label) else {
            labels.unresolved_classes += 1;
            continue;
        };
        let line = match format {
            Format::Bbox => to_fractional(bbox, frame_width, frame_height)
                .map(|b| format_bbox_line(class_index, &b)),
            Format::Polygon => to_fractional(bbox, frame_width, frame_height)
                .and_then(|_| polygon_to_fractional(&box_corners(bbox), frame_width, frame_height))
                .map(|points| format_polygon_line(class_index, &points)),
        };
        match line {
            Ok(line) => {
                labels.content.push_str(&line);
                labels.written += 1;
            }
            Err(_) => labels.invalid_geometry += 1,
        }
    }

    for polygon in polygons {
        let Some(class_index) = class_map.index_of(&polygon.label) else {
            labels.unresolved_classes += 1;
            continue;
        };
        let line = match format {
            Format::Bbox => polygon_to_fractional(polygon, frame_width, frame_height)
                .and_then(|_| to_fractional(&polygon.bounding_box(), frame_width, frame_height))
                .map(|b| format_bbox_line(class_index, &b)),
            Format::Polygon => polygon_to_fractional(polygon, frame_width, frame_height)
                .map(|points| format_polygon_line(class_index, &points)),
        };
        match line {
            Ok(line) => {
                labels.content.push_str(&line);
                labels.written += 1;
            }
            Err(_) => labels.invalid_geometry += 1,
        }
    }

    labels
}

/// Normalized state of one box, as written by the `convert` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxState {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
    pub class_id: i64,
}

/// Per-frame normalized box states of a whole video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameStates {
    pub video_name: String,
    pub frame_bbox_states: BTreeMap<u32, Vec<BoxState>>,
}

/// Normalize every box of a set, keeping unmapped classes as [`UNKNOWN_CLASS`].
///
/// Boxes outside the frame are an error here; this document feeds training
/// directly and must not carry out-of-range values.
pub fn to_frame_states(
    video_name: &str,
    set: &AnnotationSet,
    class_map: &ClassMap,
    frame_width: u32,
    frame_height: u32,
) -> Result<FrameStates> {
    let mut frame_bbox_states = BTreeMap::new();
    for (frame, boxes) in &set.boxes {
        let states = boxes
            .iter()
            .map(|bbox| {
                to_fractional(bbox, frame_width, frame_height).map(|b| BoxState {
                    x_center: b.x_center,
                    y_center: b.y_center,
                    width: b.width,
                    height: b.height,
                    class_id: class_map.resolve(&bbox.label),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::Validation(format!("frame {}: {}", frame, e)))?;
        frame_bbox_states.insert(*frame, states);
    }
    Ok(FrameStates {
        video_name: video_name.to_string(),
        frame_bbox_states,
    })
}
