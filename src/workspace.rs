//! A workspace directory wiring the pipeline components together.
//!
//! ```text
//! <root>/frames/<video>/<index>.jpg
//! <root>/catalog/...
//! <root>/dataset/{images,labels}/{train,val}/<video>/
//! <root>/dataset/<video>.yaml
//! ```

use log::info;
use std::path::{Path, PathBuf};

use crate::annotations::AnnotationModel;
use crate::catalog::{Catalog, JsonCatalog};
use crate::config::ExportConfig;
use crate::conversion::ClassMap;
use crate::error::{Error, Result};
use crate::frames::{FfmpegDecoder, FrameStore, VideoDecoder};
use crate::io::AnnotationPayload;
use crate::locks::VideoLocks;
use crate::types::{Video, VideoId};
use crate::yolo_dataset::{DatasetExporter, ExportReport};

/// How export resolves class indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassSource {
    /// Sorted distinct labels of the exported annotation set.
    #[default]
    Annotations,
    /// The catalog's class registry.
    Registry,
    /// A caller-supplied ordered list.
    Ordered(Vec<String>),
}

pub struct Workspace<C: Catalog> {
    root: PathBuf,
    catalog: C,
    frames: FrameStore,
    locks: VideoLocks,
}

impl Workspace<JsonCatalog> {
    /// Open a workspace backed by a JSON catalog under `<root>/catalog`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let catalog = JsonCatalog::open(root.join("catalog"))?;
        Ok(Self::new(root, catalog))
    }
}

impl<C: Catalog> Workspace<C> {
    pub fn new(root: impl Into<PathBuf>, catalog: C) -> Self {
        let root = root.into();
        Self {
            frames: FrameStore::new(root.join("frames")),
            root,
            catalog,
            locks: VideoLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_root(&self) -> PathBuf {
        self.root.join("dataset")
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn annotations(&self) -> AnnotationModel<'_, C> {
        AnnotationModel::new(&self.catalog, &self.frames, &self.locks)
    }

    pub fn exporter(&self) -> DatasetExporter<'_, C> {
        DatasetExporter::new(&self.catalog, &self.frames, &self.locks, self.dataset_root())
    }

    /// Decode a video file with ffmpeg and register it.
    pub fn ingest(&self, video_path: &Path, name: Option<&str>) -> Result<Video> {
        let stem = video_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Ingest(format!("invalid video path {}", video_path.display())))?;
        let name = name
            .map(str::to_string)
            .or_else(|| {
                video_path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| stem.to_string());

        let mut decoder = FfmpegDecoder::open(video_path)?;
        self.ingest_from(stem, &name, &mut decoder)
    }

    /// Extract frames from `decoder` under a fresh id derived from `stem`
    /// and register the video.
    pub fn ingest_from<D: VideoDecoder + ?Sized>(
        &self,
        stem: &str,
        name: &str,
        decoder: &mut D,
    ) -> Result<Video> {
        let id = self.fresh_id(stem)?;
        let extraction = self.frames.extract(&id, decoder)?;
        let video = Video {
            id,
            name: name.to_string(),
            width: extraction.width,
            height: extraction.height,
        };
        self.catalog.put_video(&video)?;
        info!(
            "Ingested {} as {} ({} frames)",
            video.name, video.id, extraction.frame_count
        );
        Ok(video)
    }

    /// An id not used by any registered video or frame directory: the
    /// sanitized stem itself, or with `-1`, `-2`, ... appended.
    fn fresh_id(&self, stem: &str) -> Result<VideoId> {
        let taken = |id: &VideoId| -> Result<bool> {
            Ok(self.catalog.get_video(id)?.is_some() || self.frames.frame_dir(id).exists())
        };
        let stem = VideoId::new(stem).dir_name();
        let base = VideoId::new(stem.as_str());
        if !taken(&base)? {
            return Ok(base);
        }
        let mut suffix = 1u32;
        loop {
            let id = VideoId::new(format!("{}-{}", stem, suffix));
            if !taken(&id)? {
                return Ok(id);
            }
            suffix += 1;
        }
    }

    /// Extract frames for a video registered without them, e.g. by
    /// [`Workspace::import`]. The decoded size must match the registered one.
    pub fn extract_frames<D: VideoDecoder + ?Sized>(
        &self,
        video_id: &VideoId,
        decoder: &mut D,
    ) -> Result<usize> {
        self.locks.with_video(video_id, || {
            let video = self
                .catalog
                .get_video(video_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown video {}", video_id)))?;
            Ok(self.frames.extract_for(&video, decoder)?.frame_count)
        })
    }

    /// Store the annotations of an editor document.
    ///
    /// An unknown video is registered with the document's size; a known one
    /// must match it, since the size is fixed at ingestion.
    pub fn import(&self, payload: &AnnotationPayload, video_id: Option<VideoId>) -> Result<VideoId> {
        let id = video_id.unwrap_or_else(|| payload.video_id());
        id.ensure_storable()?;
        if payload.video_width == 0 || payload.video_height == 0 {
            return Err(Error::Validation(format!(
                "document for {} has an empty frame size",
                id
            )));
        }
        match self.catalog.get_video(&id)? {
            Some(video) if (video.width, video.height) != (payload.video_width, payload.video_height) => {
                return Err(Error::Validation(format!(
                    "document size {}x{} does not match video {} ({}x{})",
                    payload.video_width, payload.video_height, id, video.width, video.height
                )));
            }
            Some(_) => {}
            None => {
                self.catalog.put_video(&Video {
                    id: id.clone(),
                    name: payload.video_name.clone(),
                    width: payload.video_width,
                    height: payload.video_height,
                })?;
            }
        }
        self.annotations().save(&id, &payload.annotation_set())?;
        Ok(id)
    }

    pub fn export(
        &self,
        video_id: &VideoId,
        classes: &ClassSource,
        config: &ExportConfig,
    ) -> Result<ExportReport> {
        let class_map = match classes {
            ClassSource::Annotations => None,
            ClassSource::Registry => Some(ClassMap::from_registry(&self.catalog.class_registry()?)),
            ClassSource::Ordered(names) => Some(ClassMap::ordered(names.iter().cloned())),
        };
        self.exporter().export(video_id, class_map.as_ref(), config)
    }
}
