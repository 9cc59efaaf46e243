//! Export of one video's annotations as a YOLO training dataset.

use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotations::{check_frame_range, known_frame_count};
use crate::catalog::Catalog;
use crate::config::{ClassPolicy, ExportConfig};
use crate::conversion::{convert_frame, ClassMap, FrameLabels};
use crate::dataset::{partition, split_rng, Split};
use crate::error::{Error, IoContext, Result};
use crate::frames::{FfmpegDecoder, FrameStore};
use crate::io::{create_dataset_manifest, existing_outputs, output_dirs, remove_outputs, DatasetManifest};
use crate::locks::VideoLocks;
use crate::types::{
    AnnotationSet, ExportStats, OutputDirs, Video, VideoId, FRAME_EXTENSION, LABEL_EXTENSION,
};
use crate::utils::{create_output_directory, create_progress_bar};

/// Result of a finished export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub manifest_path: PathBuf,
    pub manifest: DatasetManifest,
    pub split: Split,
    pub stats: ExportStats,
}

/// Writes `images/`, `labels/` and the manifest of a video under a dataset
/// root.
pub struct DatasetExporter<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    frames: &'a FrameStore,
    locks: &'a VideoLocks,
    dataset_root: PathBuf,
}

impl<'a, C: Catalog + ?Sized> DatasetExporter<'a, C> {
    pub fn new(
        catalog: &'a C,
        frames: &'a FrameStore,
        locks: &'a VideoLocks,
        dataset_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            frames,
            locks,
            dataset_root: dataset_root.into(),
        }
    }

    pub fn dataset_root(&self) -> &Path {
        &self.dataset_root
    }

    /// Export the video. Without `class_map`, classes are the sorted distinct
    /// labels of the annotation set.
    pub fn export(
        &self,
        video_id: &VideoId,
        class_map: Option<&ClassMap>,
        config: &ExportConfig,
    ) -> Result<ExportReport> {
        self.locks
            .with_video(video_id, || self.export_locked(video_id, class_map, config))
    }

    fn export_locked(
        &self,
        video_id: &VideoId,
        class_map: Option<&ClassMap>,
        config: &ExportConfig,
    ) -> Result<ExportReport> {
        let video = self
            .catalog
            .get_video(video_id)
            .and_then(|video| {
                video.ok_or_else(|| Error::NotFound(format!("video {} is not registered", video_id)))
            })
            .map_err(|e| Error::export(format!("resolving video {}: {}", video_id, e)))?;
        let set = self
            .catalog
            .load_annotations(video_id)
            .and_then(|set| {
                set.ok_or_else(|| Error::NotFound(format!("no annotations stored for {}", video_id)))
            })
            .map_err(|e| Error::export(format!("loading annotations of {}: {}", video_id, e)))?;
        let max_frame = set.max_annotated_frame().ok_or_else(|| {
            Error::export(format!("video {} has no annotated frames", video_id))
        })?;

        let frame_count = self.ensure_frames(&video, config)?;
        check_frame_range(&set, frame_count)?;

        let class_map = match class_map {
            Some(map) => map.clone(),
            None => ClassMap::sorted(set.labels()),
        };

        // Every frame up to the last annotated one gets a label file, empty
        // frames included.
        let domain: BTreeSet<u32> = (0..=max_frame).collect();
        let (labels, stats) = render_labels(&video, &set, &domain, &class_map, config)?;

        let split = partition(&domain, config.val_size, &mut split_rng(config.seed));
        info!(
            "Split {} frames of {}: {} train, {} val",
            domain.len(),
            video_id,
            split.train.len(),
            split.val.len()
        );

        let dirs = output_dirs(&self.dataset_root, video_id);
        let existing = existing_outputs(&dirs);
        if !existing.is_empty() {
            if !config.overwrite {
                return Err(Error::export(format!(
                    "a previous export of {} exists ({}); confirm overwrite to replace it",
                    video_id,
                    existing
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            remove_outputs(&dirs)?;
        }

        let mut created = Vec::new();
        match self.write_tree(video_id, &dirs, &labels, &split, &mut created) {
            Ok(()) => {}
            Err(e) => return Err(self.abort(e, &dirs, created)),
        }

        let manifest = match self.build_manifest(&video, &class_map) {
            Ok(manifest) => manifest,
            Err(e) => return Err(self.abort(e, &dirs, created)),
        };
        let manifest_path = match create_dataset_manifest(&dirs.manifest_path, &manifest) {
            Ok(path) => path,
            Err(e) => return Err(self.abort(e, &dirs, created)),
        };

        info!(
            "Exported {} with {} classes to {}",
            video_id,
            manifest.class_count(),
            manifest_path.display()
        );
        stats.print_summary();

        Ok(ExportReport {
            manifest_path,
            manifest,
            split,
            stats,
        })
    }

    /// Frame count of the video, extracting frames from the configured video
    /// file when none are stored yet.
    fn ensure_frames(&self, video: &Video, config: &ExportConfig) -> Result<usize> {
        if let Some(count) = known_frame_count(self.frames, &video.id)? {
            return Ok(count);
        }

        let source = resolve_video_source(config).map_err(|e| {
            Error::export(format!("no frames stored for {}: {}", video.id, e))
        })?;
        info!("Extracting frames of {} from {}", video.id, source.display());
        let mut decoder = FfmpegDecoder::open(&source)?;
        Ok(self.frames.extract_for(video, &mut decoder)?.frame_count)
    }

    fn write_tree(
        &self,
        video_id: &VideoId,
        dirs: &OutputDirs,
        labels: &BTreeMap<u32, FrameLabels>,
        split: &Split,
        created: &mut Vec<PathBuf>,
    ) -> Result<()> {
        for dir in dirs.dirs() {
            if create_output_directory(dir)? {
                created.push(dir.clone());
            }
        }

        let pb = create_progress_bar(labels.len() as u64, "Export");
        for (&frame, frame_labels) in labels {
            let (labels_dir, is_val) = if split.is_val(frame) {
                (&dirs.val_labels_dir, true)
            } else {
                (&dirs.train_labels_dir, false)
            };

            let label_path = labels_dir
                .join(frame.to_string())
                .with_extension(LABEL_EXTENSION);
            fs::write(&label_path, frame_labels.content.as_bytes())
                .with_context(|| format!("writing {}", label_path.display()))?;

            // Train is the default placement; validation frames are moved out.
            let file_name = Path::new(&frame.to_string()).with_extension(FRAME_EXTENSION);
            let train_image = dirs.train_images_dir.join(&file_name);
            let source = self.frames.frame_path(video_id, frame);
            fs::copy(&source, &train_image)
                .with_context(|| format!("copying frame {}", source.display()))?;
            if is_val {
                let val_image = dirs.val_images_dir.join(&file_name);
                fs::rename(&train_image, &val_image)
                    .with_context(|| format!("moving {} to validation", train_image.display()))?;
            }
            pb.inc(1);
        }
        pb.finish_with_message("Export complete");
        Ok(())
    }

    fn build_manifest(&self, video: &Video, class_map: &ClassMap) -> Result<DatasetManifest> {
        let path = fs::canonicalize(&self.dataset_root)
            .with_context(|| format!("resolving {}", self.dataset_root.display()))?;
        let name = video.id.dir_name();
        Ok(DatasetManifest {
            video_name: video.name.clone(),
            path,
            train: Path::new("images").join("train").join(&name),
            val: Path::new("images").join("val").join(&name),
            names: class_map.names().to_vec(),
        })
    }

    /// Remove what this export wrote and turn `cause` into an export error
    /// listing the directories it had created.
    fn abort(&self, cause: Error, dirs: &OutputDirs, created: Vec<PathBuf>) -> Error {
        error!("Export failed: {}", cause);
        for path in dirs.dirs() {
            if path.exists() {
                if let Err(e) = fs::remove_dir_all(path) {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
            }
        }
        let leftover: Vec<_> = created.iter().filter(|p| p.exists()).collect();
        if !leftover.is_empty() {
            warn!(
                "{} directories created by the failed export are still on disk",
                leftover.len()
            );
        }
        Error::Export {
            message: cause.to_string(),
            created,
        }
    }
}

/// The first of the configured video paths that exists.
pub fn resolve_video_source(config: &ExportConfig) -> Result<PathBuf> {
    let candidates: Vec<&PathBuf> = config
        .video
        .iter()
        .chain(config.fallback_video.iter())
        .collect();
    if candidates.is_empty() {
        return Err(Error::NotFound("no video file was given".to_string()));
    }
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        warn!("Video file not found: {}", candidate.display());
    }
    Err(Error::NotFound(format!(
        "none of the video files exist: {}",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Render the label content of every frame in `domain`.
///
/// Under the strict policy any skipped annotation fails the export here,
/// before a single file is written.
fn render_labels(
    video: &Video,
    set: &AnnotationSet,
    domain: &BTreeSet<u32>,
    class_map: &ClassMap,
    config: &ExportConfig,
) -> Result<(BTreeMap<u32, FrameLabels>, ExportStats)> {
    let mut stats = ExportStats::new();
    let mut labels = BTreeMap::new();

    for &frame in domain {
        let frame_labels = convert_frame(
            set.boxes_at(frame),
            set.polygons_at(frame),
            class_map,
            config.format,
            video.width,
            video.height,
        );
        stats.frames_written += 1;
        if frame_labels.written == 0 {
            stats.empty_frames += 1;
        }
        stats.annotations_written += frame_labels.written;
        stats.unresolved_classes += frame_labels.unresolved_classes;
        stats.invalid_geometry += frame_labels.invalid_geometry;
        labels.insert(frame, frame_labels);
    }

    if stats.skipped() > 0 {
        let message = format!(
            "{} annotations of {} cannot be exported (unresolved class: {}, invalid geometry: {})",
            stats.skipped(),
            video.id,
            stats.unresolved_classes,
            stats.invalid_geometry
        );
        match config.policy {
            ClassPolicy::Strict => return Err(Error::Validation(message)),
            ClassPolicy::Lenient => warn!("{}; skipping them", message),
        }
    }

    Ok((labels, stats))
}
