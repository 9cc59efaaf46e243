//! Frame extraction and the on-disk frame store.
//!
//! Frames of a video live in `frames/<video>/<index>.jpg`, with indices
//! contiguous from zero. Extraction never merges into an existing directory:
//! the target must be absent or empty, or the caller clears it first with
//! [`FrameStore::clear_and_extract`].

use image::{ImageFormat, RgbImage};
use log::{debug, info, warn};
use serde::Deserialize;
use std::fs;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::error::{Error, IoContext, Result};
use crate::types::{Video, VideoId, FRAME_EXTENSION};
use crate::utils::{create_output_directory, create_spinner, is_empty_dir, remove_path};

/// A source of decoded frames, read front to back.
pub trait VideoDecoder {
    /// Frame size reported when the source was opened.
    fn dimensions(&self) -> (u32, u32);

    /// Decode the next frame. `Ok(None)` signals end of stream; an error is a
    /// read failure and ends the stream as well.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Outcome of a successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    /// Frames actually written, not the count claimed by the container.
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Read the size of the first video stream with `ffprobe`.
pub fn probe_dimensions(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| Error::Ingest(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(Error::Ingest(format!(
            "ffprobe could not open {} (exit code {:?}): {}",
            path.display(),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Ingest(format!("failed to parse ffprobe output: {}", e)))?;
    match probe.streams.first() {
        Some(ProbeStream {
            width: Some(w),
            height: Some(h),
        }) if *w > 0 && *h > 0 => Ok((*w, *h)),
        _ => Err(Error::Ingest(format!(
            "no video stream found in {}",
            path.display()
        ))),
    }
}

/// Decodes a video file by streaming raw RGB frames out of `ffmpeg`.
pub struct FfmpegDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    finished: bool,
}

impl FfmpegDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Ingest(format!(
                "video file not found: {}",
                path.display()
            )));
        }
        let (width, height) = probe_dimensions(path)?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-vsync",
                "passthrough",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Ingest(format!("failed to run ffmpeg: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ingest("ffmpeg stdout is not available".to_string()))?;

        debug!("Opened {} ({}x{})", path.display(), width, height);
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            finished: false,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .map_err(|e| Error::Ingest(format!("waiting for ffmpeg: {}", e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Ingest(format!(
                "ffmpeg exited with code {:?}",
                status.code()
            )))
        }
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }

        let len = self.frame_len();
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Ingest(format!("reading decoded frame: {}", e))),
            }
        }

        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < len {
            self.finished = true;
            return Err(Error::Ingest(format!(
                "truncated frame: got {} of {} bytes",
                filled, len
            )));
        }

        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| Error::Ingest("decoded frame has unexpected size".to_string()))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Per-video frame images under a root directory.
#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frame_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(video_id.dir_name())
    }

    pub fn frame_path(&self, video_id: &VideoId, index: u32) -> PathBuf {
        self.frame_dir(video_id)
            .join(index.to_string())
            .with_extension(FRAME_EXTENSION)
    }

    /// Decode every frame and write it as `<index>.jpg`.
    ///
    /// Stops at end of stream or at the first read failure; the returned
    /// count is the number of frames written. Fails if the frame directory
    /// already holds files or if no frame could be decoded. A failed frame
    /// write removes the frames written so far.
    pub fn extract<D: VideoDecoder + ?Sized>(
        &self,
        video_id: &VideoId,
        decoder: &mut D,
    ) -> Result<Extraction> {
        let dir = self.frame_dir(video_id);
        if !is_empty_dir(&dir)? {
            return Err(Error::Ingest(format!(
                "frame directory {} is not empty; clear it before extracting",
                dir.display()
            )));
        }
        create_output_directory(&dir)?;

        let (width, height) = decoder.dimensions();
        let pb = create_spinner("Extract");
        let mut frame_count = 0usize;

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "Decoding {} stopped after {} frames: {}",
                        video_id, frame_count, e
                    );
                    break;
                }
            };

            let path = self.frame_path(video_id, frame_count as u32);
            if let Err(e) = frame.save_with_format(&path, ImageFormat::Jpeg) {
                pb.finish_and_clear();
                // A partial frame directory would block the next extraction.
                if let Err(cleanup) = remove_path(&dir) {
                    warn!("Could not remove {}: {}", dir.display(), cleanup);
                }
                return Err(Error::Ingest(format!(
                    "writing frame {}: {}",
                    path.display(),
                    e
                )));
            }
            frame_count += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        if frame_count == 0 {
            remove_path(&dir)?;
            return Err(Error::Ingest(format!(
                "no frames could be decoded for {}",
                video_id
            )));
        }

        info!(
            "Extracted {} frames ({}x{}) for {}",
            frame_count, width, height, video_id
        );
        Ok(Extraction {
            frame_count,
            width,
            height,
        })
    }

    /// Extract the frames of a registered video. The decoder must produce
    /// the frame size the video was registered with, since annotations are
    /// normalized against it.
    pub fn extract_for<D: VideoDecoder + ?Sized>(
        &self,
        video: &Video,
        decoder: &mut D,
    ) -> Result<Extraction> {
        let (width, height) = decoder.dimensions();
        if (width, height) != (video.width, video.height) {
            return Err(Error::Validation(format!(
                "video file of {} decodes at {}x{} but the video is registered at {}x{}",
                video.id, width, height, video.width, video.height
            )));
        }
        self.extract(&video.id, decoder)
    }

    /// Remove every stored frame of a video.
    pub fn clear(&self, video_id: &VideoId) -> Result<()> {
        remove_path(&self.frame_dir(video_id))
    }

    pub fn clear_and_extract<D: VideoDecoder + ?Sized>(
        &self,
        video_id: &VideoId,
        decoder: &mut D,
    ) -> Result<Extraction> {
        self.clear(video_id)?;
        self.extract(video_id, decoder)
    }

    /// Number of `<index>.jpg` files in the video's frame directory.
    pub fn frame_count(&self, video_id: &VideoId) -> Result<usize> {
        let dir = self.frame_dir(video_id);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "no frames extracted for video {}",
                video_id
            )));
        }

        let dir_str = dir.to_str().ok_or_else(|| {
            Error::Storage(format!("frame directory is not UTF-8: {}", dir.display()))
        })?;
        let pattern = format!("{}/*.{}", glob::Pattern::escape(dir_str), FRAME_EXTENSION);
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Storage(format!("invalid frame pattern {}: {}", pattern, e)))?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file() && is_frame_stem(path))
            .count())
    }

    /// Video ids that have a frame directory.
    pub fn list_videos(&self) -> Result<Vec<VideoId>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<VideoId> = fs::read_dir(&self.root)
            .with_context(|| format!("reading {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(VideoId::from))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn is_frame_stem(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()))
}
