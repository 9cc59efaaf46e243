use clap::Parser;

use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use video2yolo::config::{Cli, Command};
use video2yolo::conversion::{to_frame_states, ClassMap};
use video2yolo::utils::write_json_atomic;
use video2yolo::{
    read_annotation_payload, Catalog, ClassSource, ExportConfig, Result, VideoId, Workspace,
};

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest { video, name } => {
            let workspace = Workspace::open(&cli.root)?;
            let video = workspace.ingest(&video, name.as_deref())?;
            info!(
                "Registered {} as {} ({}x{})",
                video.name, video.id, video.width, video.height
            );
        }
        Command::Import { json, video_id } => {
            let workspace = Workspace::open(&cli.root)?;
            let payload = read_annotation_payload(&json)?;
            let id = workspace.import(&payload, video_id.map(VideoId::from))?;
            info!("Imported annotations of {} from {}", id, json.display());
        }
        Command::Export(args) => {
            let workspace = Workspace::open(&cli.root)?;
            let classes = if !args.label_list.is_empty() {
                ClassSource::Ordered(args.label_list.clone())
            } else if args.use_registry {
                ClassSource::Registry
            } else {
                ClassSource::Annotations
            };
            let report = workspace.export(
                &VideoId::from(args.video_id.as_str()),
                &classes,
                &ExportConfig::from(&args),
            )?;
            info!("Dataset manifest written to {}", report.manifest_path.display());
        }
        Command::Convert { json, label_list } => {
            let payload = read_annotation_payload(&json)?;
            let states = to_frame_states(
                &payload.video_name,
                &payload.annotation_set(),
                &ClassMap::ordered(label_list),
                payload.video_width,
                payload.video_height,
            )?;
            let output = json
                .parent()
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(format!(
                    "{}.states.json",
                    sanitize_filename::sanitize(&payload.video_name)
                ));
            write_json_atomic(&output, &states)?;
            info!("Normalized box states written to {}", output.display());
        }
        Command::List => {
            let workspace = Workspace::open(&cli.root)?;
            for video in workspace.catalog().list_videos()? {
                println!("{}\t{}\t{}x{}", video.id, video.name, video.width, video.height);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[{}] {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
