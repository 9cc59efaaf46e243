use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;

use image::{Rgb, RgbImage};
use video2yolo::{
    AnnotationPayload, AnnotationSet, BoundingBox, Catalog, ClassPolicy, ClassSource, ErrorKind,
    ExportConfig, MemoryCatalog, Polygon, Result, VideoDecoder, VideoId, Workspace,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

struct SyntheticDecoder {
    size: (u32, u32),
    total: u32,
    next: u32,
}

impl SyntheticDecoder {
    fn new(total: u32) -> Self {
        Self::with_size(total, WIDTH, HEIGHT)
    }

    fn with_size(total: u32, width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            total,
            next: 0,
        }
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn dimensions(&self) -> (u32, u32) {
        self.size
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.next >= self.total {
            return Ok(None);
        }
        let shade = (self.next * 40) as u8;
        self.next += 1;
        let (width, height) = self.size;
        Ok(Some(RgbImage::from_pixel(width, height, Rgb([shade, 0, 255 - shade]))))
    }
}

fn ingested(dir: &Path, frames: u32) -> (Workspace<MemoryCatalog>, VideoId) {
    let workspace = Workspace::new(dir, MemoryCatalog::new());
    let video = workspace
        .ingest_from("buoy_left", "buoy_left.mp4", &mut SyntheticDecoder::new(frames))
        .unwrap();
    (workspace, video.id)
}

fn buoy_gate_set() -> AnnotationSet {
    let mut set = AnnotationSet::new();
    set.push_box(0, BoundingBox::new("buoy", 8.0, 12.0, 16.0, 12.0));
    set.push_box(3, BoundingBox::new("gate", 0.0, 0.0, WIDTH as f64, HEIGHT as f64));
    set
}

fn config(val_size: f64, overwrite: bool) -> ExportConfig {
    ExportConfig {
        val_size,
        overwrite,
        ..ExportConfig::default()
    }
}

/// Label file content per frame, whichever split it landed in.
fn read_labels(dataset: &Path, id: &VideoId) -> BTreeMap<u32, String> {
    let mut labels = BTreeMap::new();
    for split in ["train", "val"] {
        let dir = dataset.join("labels").join(split).join(id.dir_name());
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let frame: u32 = path.file_stem().unwrap().to_str().unwrap().parse().unwrap();
            let previous = labels.insert(frame, fs::read_to_string(&path).unwrap());
            assert!(previous.is_none(), "frame {} labelled in both splits", frame);
        }
    }
    labels
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let key = path.strip_prefix(dir).unwrap().to_string_lossy().to_string();
                files.insert(key, fs::read(&path).unwrap());
            }
        }
    }
    files
}

#[test]
fn test_buoy_gate_export() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 5);
    workspace.annotations().save(&id, &buoy_gate_set()).unwrap();

    let report = workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap();

    assert_eq!(report.split.val.len(), 1);
    assert_eq!(report.split.train.len(), 3);
    assert_eq!(report.manifest.names, vec!["buoy", "gate"]);
    assert_eq!(report.stats.frames_written, 4);
    assert_eq!(report.stats.empty_frames, 2);
    assert_eq!(report.stats.annotations_written, 2);

    let dataset = workspace.dataset_root();
    let labels = read_labels(&dataset, &id);
    assert_eq!(labels.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(labels[&0], "0 0.250000 0.375000 0.250000 0.250000\n");
    assert_eq!(labels[&1], "");
    assert_eq!(labels[&2], "");
    assert_eq!(labels[&3], "1 0.500000 0.500000 1.000000 1.000000\n");

    // Images follow their labels; frame 4 lies past the last annotation.
    for frame in 0..4u32 {
        let split = if report.split.val.contains(&frame) { "val" } else { "train" };
        let other = if split == "val" { "train" } else { "val" };
        let name = format!("{}.jpg", frame);
        assert!(dataset.join("images").join(split).join("buoy_left").join(&name).is_file());
        assert!(!dataset.join("images").join(other).join("buoy_left").join(&name).exists());
        assert!(dataset
            .join("labels")
            .join(split)
            .join("buoy_left")
            .join(format!("{}.txt", frame))
            .is_file());
    }
    assert!(!dataset.join("images/train/buoy_left/4.jpg").exists());

    let yaml_content = fs::read_to_string(&report.manifest_path).unwrap();
    assert_eq!(report.manifest_path, dataset.join("buoy_left.yaml"));
    assert!(yaml_content.contains("train: images/train/buoy_left"));
    assert!(yaml_content.contains("val: images/val/buoy_left"));
    assert!(yaml_content.contains("nc: 2"));
    assert!(yaml_content.contains("0: \"buoy\""));
    assert!(yaml_content.contains("1: \"gate\""));

    // Frames in the frame store are copied, not consumed.
    assert_eq!(workspace.frames().frame_count(&id).unwrap(), 5);
}

#[test]
fn test_overwrite_export_produces_identical_labels() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 6);
    let mut set = buoy_gate_set();
    set.push_box(5, BoundingBox::new("buoy", 1.0, 2.0, 3.0, 5.0));
    workspace.annotations().save(&id, &set).unwrap();

    workspace
        .export(&id, &ClassSource::Annotations, &config(0.5, false))
        .unwrap();
    let first = read_labels(&workspace.dataset_root(), &id);

    let report = workspace
        .export(&id, &ClassSource::Annotations, &config(0.5, true))
        .unwrap();
    let second = read_labels(&workspace.dataset_root(), &id);

    assert_eq!(first, second);
    assert_eq!(report.split.val.len(), 3);
    let images = snapshot(&workspace.dataset_root().join("images"));
    assert_eq!(images.len(), 6);
}

#[test]
fn test_second_export_without_overwrite_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 5);
    workspace.annotations().save(&id, &buoy_gate_set()).unwrap();

    workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap();
    let before = snapshot(&workspace.dataset_root());

    let err = workspace
        .export(&id, &ClassSource::Annotations, &config(0.8, false))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Export);
    assert_eq!(snapshot(&workspace.dataset_root()), before);
}

#[test]
fn test_strict_policy_rejects_unknown_class() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 5);
    workspace.annotations().save(&id, &buoy_gate_set()).unwrap();
    let classes = ClassSource::Ordered(vec!["buoy".to_string()]);

    let strict = ExportConfig {
        policy: ClassPolicy::Strict,
        ..config(0.2, false)
    };
    let err = workspace.export(&id, &classes, &strict).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!workspace.dataset_root().exists());

    let report = workspace.export(&id, &classes, &config(0.2, false)).unwrap();
    assert_eq!(report.stats.unresolved_classes, 1);
    assert_eq!(report.stats.annotations_written, 1);
    assert_eq!(report.manifest.names, vec!["buoy"]);
    assert_eq!(read_labels(&workspace.dataset_root(), &id)[&3], "");
}

#[test]
fn test_registry_classes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let catalog = MemoryCatalog::with_classes(
        [(4, "gate".to_string()), (9, "buoy".to_string()), (1, "torpedo".to_string())]
            .into_iter()
            .collect(),
    );
    let workspace = Workspace::new(temp_dir.path(), catalog);
    let id = workspace
        .ingest_from("clip", "clip.mp4", &mut SyntheticDecoder::new(2))
        .unwrap()
        .id;
    let mut set = AnnotationSet::new();
    // Labels may carry the registry id instead of the name.
    set.push_box(1, BoundingBox::new("4", 0.0, 0.0, 32.0, 24.0));
    workspace.annotations().save(&id, &set).unwrap();

    let report = workspace
        .export(&id, &ClassSource::Registry, &config(0.0, false))
        .unwrap();

    assert_eq!(report.manifest.names, vec!["buoy", "gate", "torpedo"]);
    assert_eq!(
        read_labels(&workspace.dataset_root(), &id)[&1],
        "1 0.250000 0.250000 0.500000 0.500000\n"
    );
    assert!(report.split.val.is_empty());
}

#[test]
fn test_export_without_annotations_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 3);

    let err = workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Export);

    workspace.annotations().save(&id, &AnnotationSet::new()).unwrap();
    let err = workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Export);
    assert!(!workspace.dataset_root().exists());
}

#[test]
fn test_export_without_frames_or_video_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(temp_dir.path(), MemoryCatalog::new());
    let payload = AnnotationPayload {
        video_name: "lost".to_string(),
        video_id: None,
        video_width: WIDTH,
        video_height: HEIGHT,
        boxes: buoy_gate_set().boxes,
        polygons: BTreeMap::new(),
    };
    let id = workspace.import(&payload, None).unwrap();

    let config = ExportConfig {
        video: Some(temp_dir.path().join("lost.mp4")),
        fallback_video: Some(temp_dir.path().join("backup/lost.mp4")),
        ..config(0.2, false)
    };
    let err = workspace
        .export(&id, &ClassSource::Annotations, &config)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Export);
    assert!(err.to_string().contains("backup"));
}

#[test]
fn test_annotation_beyond_last_frame_fails_export() {
    let temp_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(temp_dir.path(), MemoryCatalog::new());
    let payload = AnnotationPayload {
        video_name: "short".to_string(),
        video_id: None,
        video_width: WIDTH,
        video_height: HEIGHT,
        boxes: buoy_gate_set().boxes,
        polygons: BTreeMap::new(),
    };
    // Annotations saved before extraction are checked at export.
    let id = workspace.import(&payload, None).unwrap();
    workspace
        .frames()
        .extract(&id, &mut SyntheticDecoder::new(2))
        .unwrap();

    let err = workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_polygons_export_in_polygon_format() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 3);
    let mut set = AnnotationSet::new();
    set.push_polygon(
        2,
        Polygon::new("buoy", vec![(0.0, 0.0), (32.0, 0.0), (32.0, 48.0)]),
    );
    workspace.annotations().save(&id, &set).unwrap();

    let polygon_config = ExportConfig {
        format: video2yolo::Format::Polygon,
        ..config(0.0, false)
    };
    workspace
        .export(&id, &ClassSource::Annotations, &polygon_config)
        .unwrap();

    let labels = read_labels(&workspace.dataset_root(), &id);
    assert_eq!(
        labels[&2],
        "0 0.000000 0.000000 0.500000 0.000000 0.500000 1.000000\n"
    );
    assert_eq!(labels.len(), 3);
}

#[test]
fn test_reingest_creates_new_id() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, first) = ingested(temp_dir.path(), 2);
    let second = workspace
        .ingest_from("buoy_left", "buoy_left.mp4", &mut SyntheticDecoder::new(3))
        .unwrap();

    assert_eq!(first, VideoId::new("buoy_left"));
    assert_eq!(second.id, VideoId::new("buoy_left-1"));
    assert_eq!(workspace.frames().frame_count(&first).unwrap(), 2);
    assert_eq!(workspace.frames().frame_count(&second.id).unwrap(), 3);
    assert_eq!(workspace.catalog().list_videos().unwrap().len(), 2);
}

#[test]
fn test_json_workspace_import_and_export() {
    let temp_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::open(temp_dir.path()).unwrap();
    let video = workspace
        .ingest_from("gate_run", "gate_run.mp4", &mut SyntheticDecoder::new(4))
        .unwrap();

    let json_path = temp_dir.path().join("boxes.json");
    fs::write(
        &json_path,
        r#"{
            "video_name": "gate_run",
            "video_width": 64,
            "video_height": 48,
            "boxes": {
                "1": [
                    {"class": "gate", "x": 0, "y": 0, "width": 16, "height": 16,
                     "displayOrder": 1, "visible": true, "interpolate": true,
                     "interpolationID": 2, "interpolationNumber": 1},
                    {"class": "buoy", "x": 16, "y": 16, "width": 16, "height": 16,
                     "displayOrder": 0, "visible": true, "interpolate": false,
                     "interpolationID": null, "interpolationNumber": null}
                ]
            }
        }"#,
    )
    .unwrap();
    let payload = video2yolo::read_annotation_payload(&json_path).unwrap();
    let id = workspace.import(&payload, None).unwrap();
    assert_eq!(id, video.id);

    let loaded = workspace.annotations().load(&id).unwrap();
    assert_eq!(loaded, payload.annotation_set());
    assert_eq!(loaded.boxes_at(1)[0].interpolation_id, Some(2));

    workspace
        .export(&id, &ClassSource::Annotations, &config(0.5, false))
        .unwrap();
    let labels = read_labels(&workspace.dataset_root(), &id);
    // Display order within the frame is kept in the label file.
    assert_eq!(
        labels[&1],
        "1 0.125000 0.166667 0.250000 0.333333\n0 0.375000 0.500000 0.250000 0.333333\n"
    );
}

#[test]
fn test_import_rejects_size_mismatch() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 2);
    let payload = AnnotationPayload {
        video_name: id.to_string(),
        video_id: None,
        video_width: WIDTH * 2,
        video_height: HEIGHT,
        boxes: BTreeMap::new(),
        polygons: BTreeMap::new(),
    };
    assert_eq!(
        workspace.import(&payload, None).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn test_concurrent_save_and_export_of_one_video() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (workspace, id) = ingested(temp_dir.path(), 5);
    let first = buoy_gate_set();
    let mut second = AnnotationSet::new();
    second.push_box(0, BoundingBox::new("gate", 8.0, 12.0, 16.0, 12.0));
    second.push_box(3, BoundingBox::new("buoy", 0.0, 0.0, WIDTH as f64, HEIGHT as f64));

    let labels_of = |small: &str, full: &str| -> BTreeMap<u32, String> {
        BTreeMap::from([
            (0, format!("{} 0.250000 0.375000 0.250000 0.250000\n", small)),
            (1, String::new()),
            (2, String::new()),
            (3, format!("{} 0.500000 0.500000 1.000000 1.000000\n", full)),
        ])
    };
    let first_labels = labels_of("0", "1");
    let second_labels = labels_of("1", "0");

    workspace.annotations().save(&id, &first).unwrap();
    thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..20 {
                let set = if round % 2 == 0 { &second } else { &first };
                workspace.annotations().save(&id, set).unwrap();
            }
        });
        for _ in 0..10 {
            workspace
                .export(&id, &ClassSource::Annotations, &config(0.5, true))
                .unwrap();
            let labels = read_labels(&workspace.dataset_root(), &id);
            assert!(
                labels == first_labels || labels == second_labels,
                "labels mix two annotation sets: {:?}",
                labels
            );
        }
    });
}

#[test]
fn test_ids_sharing_a_directory_are_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::open(temp_dir.path()).unwrap();
    let video = workspace
        .ingest_from("ab", "ab.mp4", &mut SyntheticDecoder::new(4))
        .unwrap();
    workspace.annotations().save(&video.id, &buoy_gate_set()).unwrap();

    let mut boxes = BTreeMap::new();
    boxes.insert(0, vec![BoundingBox::new("gate", 0.0, 0.0, 8.0, 8.0)]);
    let payload = AnnotationPayload {
        video_name: "ab".to_string(),
        video_id: Some("a:b".to_string()),
        video_width: WIDTH,
        video_height: HEIGHT,
        boxes,
        polygons: BTreeMap::new(),
    };

    let err = workspace.import(&payload, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = workspace
        .import(&payload, Some(VideoId::new("a:b")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(workspace.annotations().load(&video.id).unwrap(), buoy_gate_set());
    assert_eq!(workspace.catalog().list_videos().unwrap(), vec![video]);

    // Ingestion sanitizes the stem instead of failing.
    let sanitized = workspace
        .ingest_from("a:b", "a:b.mp4", &mut SyntheticDecoder::new(2))
        .unwrap();
    assert_eq!(sanitized.id, VideoId::new("ab-1"));
}

#[test]
fn test_frames_must_match_imported_size() {
    let temp_dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(temp_dir.path(), MemoryCatalog::new());
    let payload = AnnotationPayload {
        video_name: "dock".to_string(),
        video_id: None,
        video_width: WIDTH,
        video_height: HEIGHT,
        boxes: buoy_gate_set().boxes,
        polygons: BTreeMap::new(),
    };
    let id = workspace.import(&payload, None).unwrap();

    let err = workspace
        .extract_frames(&id, &mut SyntheticDecoder::with_size(5, WIDTH * 2, HEIGHT * 2))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!workspace.frames().frame_dir(&id).exists());

    let frame_count = workspace
        .extract_frames(&id, &mut SyntheticDecoder::new(5))
        .unwrap();
    assert_eq!(frame_count, 5);
    let report = workspace
        .export(&id, &ClassSource::Annotations, &config(0.2, false))
        .unwrap();
    assert_eq!(report.stats.annotations_written, 2);
}
