//! Video frames to YOLO dataset converter
//!
//! This library extracts the frames of a video, stores per-frame box and
//! polygon annotations, and exports them as a YOLO dataset: images and label
//! files split into train/val, plus a dataset manifest.

pub mod annotations;
pub mod catalog;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod frames;
pub mod io;
pub mod locks;
pub mod types;
pub mod utils;
pub mod workspace;
pub mod yolo_dataset;

// Re-export commonly used types and functions
pub use annotations::AnnotationModel;
pub use catalog::{Catalog, ClassRegistry, JsonCatalog, MemoryCatalog};
pub use config::{ClassPolicy, ExportConfig, Format};
pub use conversion::{to_fractional, ClassMap, FractionalBox, UNKNOWN_CLASS};
pub use dataset::{partition, Split};
pub use error::{Error, ErrorKind, Result};
pub use frames::{Extraction, FfmpegDecoder, FrameStore, VideoDecoder};
pub use io::{read_annotation_payload, AnnotationPayload, DatasetManifest};
pub use locks::VideoLocks;
pub use types::{AnnotationSet, BoundingBox, ExportStats, Point, Polygon, Video, VideoId};
pub use workspace::{ClassSource, Workspace};
pub use yolo_dataset::{DatasetExporter, ExportReport};
