use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};
use crate::types::{AnnotationSet, BoundingBox, OutputDirs, Polygon, VideoId};
use crate::utils::{read_json, write_atomic};

/// The annotation document saved by the frame editor (`boxes.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPayload {
    pub video_name: String,
    #[serde(default)]
    pub video_id: Option<String>,
    pub video_width: u32,
    pub video_height: u32,
    #[serde(default)]
    pub boxes: BTreeMap<u32, Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub polygons: BTreeMap<u32, Vec<Polygon>>,
}

impl AnnotationPayload {
    pub fn video_id(&self) -> VideoId {
        VideoId::new(self.video_id.clone().unwrap_or_else(|| self.video_name.clone()))
    }

    pub fn annotation_set(&self) -> AnnotationSet {
        AnnotationSet {
            boxes: self.boxes.clone(),
            polygons: self.polygons.clone(),
        }
    }
}

/// Read an editor annotation document.
pub fn read_annotation_payload(path: &Path) -> Result<AnnotationPayload> {
    read_json(path)?
        .ok_or_else(|| Error::NotFound(format!("annotation file {} does not exist", path.display())))
}

/// Class list and directory layout of one exported video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetManifest {
    pub video_name: String,
    /// Dataset root the relative paths below are resolved against.
    pub path: PathBuf,
    pub train: PathBuf,
    pub val: PathBuf,
    pub names: Vec<String>,
}

impl DatasetManifest {
    pub fn class_count(&self) -> usize {
        self.names.len()
    }

    /// Render the manifest as a YOLO dataset YAML document.
    ///
    /// Class names and the root path are free-form, so they are written as
    /// double-quoted scalars (a JSON string is valid YAML).
    pub fn to_yaml(&self) -> String {
        let mut yaml = format!(
            "# {}\npath: {}\ntrain: {}\nval: {}\nnc: {}\n",
            self.video_name.replace(['\r', '\n'], " "),
            yaml_string(&self.path.to_string_lossy()),
            self.train.to_string_lossy(),
            self.val.to_string_lossy(),
            self.class_count()
        );
        yaml.push_str("\nnames:\n");
        for (id, label) in self.names.iter().enumerate() {
            yaml.push_str(&format!("    {}: {}\n", id, yaml_string(label)));
        }
        yaml
    }
}

fn yaml_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Paths of the dataset tree of one video under `dataset_root`.
pub fn output_dirs(dataset_root: &Path, video_id: &VideoId) -> OutputDirs {
    let name = video_id.dir_name();
    let labels_dir = dataset_root.join("labels");
    let images_dir = dataset_root.join("images");
    OutputDirs {
        train_labels_dir: labels_dir.join("train").join(&name),
        val_labels_dir: labels_dir.join("val").join(&name),
        train_images_dir: images_dir.join("train").join(&name),
        val_images_dir: images_dir.join("val").join(&name),
        manifest_path: dataset_root.join(&name).with_extension("yaml"),
    }
}

/// Every path of a previous export that is still on disk.
pub fn existing_outputs(dirs: &OutputDirs) -> Vec<PathBuf> {
    dirs.dirs()
        .into_iter()
        .chain(std::iter::once(&dirs.manifest_path))
        .filter(|path| path.exists())
        .cloned()
        .collect()
}

/// Remove a previous export of the video entirely.
pub fn remove_outputs(dirs: &OutputDirs) -> Result<()> {
    for path in existing_outputs(dirs) {
        warn!("Removing previous export output {}", path.display());
        if path.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("removing {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        }
    }
    Ok(())
}

/// Write the manifest, replacing any previous one in a single step.
pub fn create_dataset_manifest(path: &Path, manifest: &DatasetManifest) -> Result<PathBuf> {
    write_atomic(path, manifest.to_yaml().as_bytes())
}
