use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

/// Extract video frames and turn per-frame box annotations into a YOLO dataset.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Cli {
    /// Workspace directory holding frames/, catalog/ and dataset/
    #[arg(short = 'r', long = "root", default_value = "data", global = true)]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract the frames of a video and register it under a new id
    Ingest {
        /// Video file to decode
        video: PathBuf,

        /// Display name, defaults to the file name
        #[arg(long = "name")]
        name: Option<String>,
    },

    /// Store the annotations of an editor `boxes.json` document
    Import {
        /// The annotation document
        json: PathBuf,

        /// Video id the annotations belong to, defaults to the document's video_name
        #[arg(long = "video_id")]
        video_id: Option<String>,
    },

    /// Write the YOLO dataset of one video
    Export(ExportArgs),

    /// Convert an editor `boxes.json` into normalized per-frame box states
    Convert {
        /// The annotation document
        json: PathBuf,

        /// Ordered class list used for class ids; unlisted classes become -1
        #[arg(use_value_delimiter = true)]
        label_list: Vec<String>,
    },

    /// List registered videos
    List,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Id of the video to export
    pub video_id: String,

    /// Proportion of the frames to use for validation
    #[arg(long = "val_size", default_value_t = 0.2, value_parser = validate_size)]
    pub val_size: f64,

    /// Seed for the train/val split; random when omitted
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Output format for YOLO annotations: 'bbox' or 'polygon'
    #[arg(
        long = "output_format",
        visible_alias = "format",
        value_enum,
        default_value = "bbox"
    )]
    pub output_format: Format,

    /// How out-of-frame boxes and unknown classes are handled
    #[arg(long = "policy", value_enum, default_value = "lenient")]
    pub policy: ClassPolicy,

    /// Confirm removal of a previous export of the same video
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    /// Video file to extract frames from when none are stored
    #[arg(long = "video")]
    pub video: Option<PathBuf>,

    /// Second location of the video file, tried when --video is missing
    #[arg(long = "fallback_video")]
    pub fallback_video: Option<PathBuf>,

    /// Resolve classes through the catalog's class registry
    #[arg(long = "use_registry")]
    pub use_registry: bool,

    /// Ordered class list; indices follow this order instead of sorted names
    #[arg(use_value_delimiter = true)]
    pub label_list: Vec<String>,
}

// Enumeration for the YOLO output format
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum Format {
    Polygon,
    #[default]
    Bbox,
}

/// What to do with annotations that cannot be written faithfully.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum ClassPolicy {
    /// Skip them and report counts as warnings
    #[default]
    Lenient,
    /// Fail the export before anything is written
    Strict,
}

/// Settings of one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub val_size: f64,
    pub seed: Option<u64>,
    pub format: Format,
    pub policy: ClassPolicy,
    pub overwrite: bool,
    pub video: Option<PathBuf>,
    pub fallback_video: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            val_size: 0.2,
            seed: None,
            format: Format::Bbox,
            policy: ClassPolicy::Lenient,
            overwrite: false,
            video: None,
            fallback_video: None,
        }
    }
}

impl From<&ExportArgs> for ExportConfig {
    fn from(args: &ExportArgs) -> Self {
        Self {
            val_size: args.val_size,
            seed: args.seed,
            format: args.output_format,
            policy: args.policy,
            overwrite: args.overwrite,
            video: args.video.clone(),
            fallback_video: args.fallback_video.clone(),
        }
    }
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}
