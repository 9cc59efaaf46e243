//! Persistence of video metadata, the class registry and annotation sets.

use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, IoContext, Result};
use crate::types::{AnnotationSet, Video, VideoId};
use crate::utils::{read_json, write_json_atomic};

/// Class id to class name, as kept by the class registry.
pub type ClassRegistry = BTreeMap<u32, String>;

/// Storage collaborator for everything the pipeline does not keep on the
/// frame store.
pub trait Catalog: Send + Sync {
    fn get_video(&self, id: &VideoId) -> Result<Option<Video>>;

    fn put_video(&self, video: &Video) -> Result<()>;

    fn list_videos(&self) -> Result<Vec<Video>>;

    fn class_registry(&self) -> Result<ClassRegistry>;

    fn load_annotations(&self, id: &VideoId) -> Result<Option<AnnotationSet>>;

    /// Replace every annotation of a video. Either the whole set is stored or
    /// the previous one stays readable.
    fn replace_annotations(&self, id: &VideoId, set: &AnnotationSet) -> Result<()>;
}

/// Catalog kept as JSON documents under a directory:
///
/// ```text
/// <root>/videos/<video>.json
/// <root>/annotations/<video>.json
/// <root>/classes.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    root: PathBuf,
}

impl JsonCatalog {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("videos"))
            .and_then(|_| fs::create_dir_all(root.join("annotations")))
            .with_context(|| format!("creating catalog at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn video_path(&self, id: &VideoId) -> Result<PathBuf> {
        id.ensure_storable()?;
        Ok(self
            .root
            .join("videos")
            .join(id.as_str())
            .with_extension("json"))
    }

    fn annotations_path(&self, id: &VideoId) -> Result<PathBuf> {
        id.ensure_storable()?;
        Ok(self
            .root
            .join("annotations")
            .join(id.as_str())
            .with_extension("json"))
    }

    fn classes_path(&self) -> PathBuf {
        self.root.join("classes.json")
    }

    pub fn put_class_registry(&self, registry: &ClassRegistry) -> Result<()> {
        write_json_atomic(&self.classes_path(), registry)?;
        Ok(())
    }
}

impl Catalog for JsonCatalog {
    fn get_video(&self, id: &VideoId) -> Result<Option<Video>> {
        read_json(&self.video_path(id)?)
    }

    fn put_video(&self, video: &Video) -> Result<()> {
        write_json_atomic(&self.video_path(&video.id)?, video)?;
        Ok(())
    }

    fn list_videos(&self) -> Result<Vec<Video>> {
        let dir = self.root.join("videos");
        let mut videos = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let path = entry
                .with_context(|| format!("reading {}", dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(video) = read_json::<Video>(&path)? {
                    videos.push(video);
                }
            }
        }
        videos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(videos)
    }

    fn class_registry(&self) -> Result<ClassRegistry> {
        Ok(read_json(&self.classes_path())?.unwrap_or_default())
    }

    fn load_annotations(&self, id: &VideoId) -> Result<Option<AnnotationSet>> {
        read_json(&self.annotations_path(id)?)
    }

    fn replace_annotations(&self, id: &VideoId, set: &AnnotationSet) -> Result<()> {
        let path = self.annotations_path(id)?;
        write_json_atomic(&path, set).map_err(|e| {
            Error::Storage(format!("replacing annotations of {}: {}", id, e))
        })?;
        debug!("Stored {} annotations for {}", set.annotation_count(), id);
        Ok(())
    }
}

/// Catalog held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    videos: RwLock<BTreeMap<VideoId, Video>>,
    annotations: RwLock<HashMap<VideoId, AnnotationSet>>,
    classes: RwLock<ClassRegistry>,
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("catalog lock poisoned".to_string())
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classes(registry: ClassRegistry) -> Self {
        Self {
            classes: RwLock::new(registry),
            ..Self::default()
        }
    }
}

impl Catalog for MemoryCatalog {
    fn get_video(&self, id: &VideoId) -> Result<Option<Video>> {
        Ok(self.videos.read().map_err(poisoned)?.get(id).cloned())
    }

    fn put_video(&self, video: &Video) -> Result<()> {
        video.id.ensure_storable()?;
        self.videos
            .write()
            .map_err(poisoned)?
            .insert(video.id.clone(), video.clone());
        Ok(())
    }

    fn list_videos(&self) -> Result<Vec<Video>> {
        Ok(self.videos.read().map_err(poisoned)?.values().cloned().collect())
    }

    fn class_registry(&self) -> Result<ClassRegistry> {
        Ok(self.classes.read().map_err(poisoned)?.clone())
    }

    fn load_annotations(&self, id: &VideoId) -> Result<Option<AnnotationSet>> {
        Ok(self.annotations.read().map_err(poisoned)?.get(id).cloned())
    }

    fn replace_annotations(&self, id: &VideoId, set: &AnnotationSet) -> Result<()> {
        // The replacement is built before the write lock is taken, so the
        // swap itself cannot fail halfway.
        let staged = set.clone();
        self.annotations
            .write()
            .map_err(poisoned)?
            .insert(id.clone(), staged);
        Ok(())
    }
}
