use log::info;

use crate::catalog::Catalog;
use crate::error::{Error, ErrorKind, Result};
use crate::frames::FrameStore;
use crate::locks::VideoLocks;
use crate::types::{AnnotationSet, Video, VideoId};

/// Loads and replaces the annotation set of a video, validating it against
/// the video's size and extracted frames.
pub struct AnnotationModel<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    frames: &'a FrameStore,
    locks: &'a VideoLocks,
}

impl<'a, C: Catalog + ?Sized> AnnotationModel<'a, C> {
    pub fn new(catalog: &'a C, frames: &'a FrameStore, locks: &'a VideoLocks) -> Self {
        Self {
            catalog,
            frames,
            locks,
        }
    }

    pub fn load(&self, video_id: &VideoId) -> Result<AnnotationSet> {
        let set = self.catalog.load_annotations(video_id)?.ok_or_else(|| {
            Error::NotFound(format!("no annotations stored for video {}", video_id))
        })?;
        if let Some(frame_count) = known_frame_count(self.frames, video_id)? {
            check_frame_range(&set, frame_count)?;
        }
        Ok(set)
    }

    /// Replace every annotation of the video with `set`.
    ///
    /// When the video's frames are not extracted yet, the frame range check
    /// is deferred to export.
    pub fn save(&self, video_id: &VideoId, set: &AnnotationSet) -> Result<()> {
        self.locks.with_video(video_id, || {
            let video = self
                .catalog
                .get_video(video_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown video {}", video_id)))?;
            validate_geometry(&video, set)?;
            if let Some(frame_count) = known_frame_count(self.frames, video_id)? {
                check_frame_range(set, frame_count)?;
            }

            self.catalog.replace_annotations(video_id, set)?;
            info!(
                "Saved {} annotations for {}",
                set.annotation_count(),
                video_id
            );
            Ok(())
        })
    }
}

/// The frame count of a video, or `None` if nothing is extracted yet.
pub fn known_frame_count(frames: &FrameStore, video_id: &VideoId) -> Result<Option<usize>> {
    match frames.frame_count(video_id) {
        Ok(count) => Ok(Some(count)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Every annotated frame index must address an extracted frame.
pub fn check_frame_range(set: &AnnotationSet, frame_count: usize) -> Result<()> {
    match set.max_annotated_frame() {
        Some(max) if max as usize >= frame_count => Err(Error::Validation(format!(
            "frame {} is annotated but the video has {} frames",
            max, frame_count
        ))),
        _ => Ok(()),
    }
}

/// Reject the first box or polygon lying outside the video frame.
pub fn validate_geometry(video: &Video, set: &AnnotationSet) -> Result<()> {
    for (frame, boxes) in &set.boxes {
        if let Some(problem) = boxes
            .iter()
            .find_map(|b| b.check_bounds(video.width, video.height))
        {
            return Err(Error::Validation(format!("frame {}: {}", frame, problem)));
        }
    }
    for (frame, polygons) in &set.polygons {
        if let Some(problem) = polygons
            .iter()
            .find_map(|p| p.check_bounds(video.width, video.height))
        {
            return Err(Error::Validation(format!("frame {}: {}", frame, problem)));
        }
    }
    Ok(())
}
