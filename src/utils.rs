use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Error, IoContext, Result};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Progress bar with an unknown length, for streams such as video decoding.
pub fn create_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] {{pos}} frames",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

/// Create a directory, returning whether it did not exist before.
pub fn create_output_directory(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(true)
}

/// Whether a directory is absent or has no entries.
pub fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let mut entries =
        fs::read_dir(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(entries.next().is_none())
}

/// Remove a file or a directory tree if present.
pub fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("removing {}", path.display()))
    } else if path.exists() {
        fs::remove_file(path).with_context(|| format!("removing {}", path.display()))
    } else {
        Ok(())
    }
}

/// Read and parse a JSON document from a file stream.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(format!("opening {}", path.display()), e)),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| Error::Validation(format!("malformed JSON in {}: {}", path.display(), e)))
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so readers see either the old content or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp =
        NamedTempFile::new_in(dir).with_context(|| format!("staging {}", path.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .with_context(|| format!("writing {}", path.display()))?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| Error::io(format!("replacing {}", path.display()), e.error))?;
    Ok(path.to_path_buf())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Storage(format!("serializing {}: {}", path.display(), e)))?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/value.json");

        write_json_atomic(&path, &BTreeMap::from([("a", 1)])).unwrap();
        write_json_atomic(&path, &BTreeMap::from([("b", 2)])).unwrap();

        let value: BTreeMap<String, i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(value, BTreeMap::from([("b".to_string(), 2)]));
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_json_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        assert!(read_json::<i32>(&path).unwrap().is_none());

        fs::write(&path, "{not json").unwrap();
        let err = read_json::<i32>(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_is_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_empty_dir(&dir.path().join("missing")).unwrap());
        assert!(is_empty_dir(dir.path()).unwrap());
        fs::write(dir.path().join("0.jpg"), b"x").unwrap();
        assert!(!is_empty_dir(dir.path()).unwrap());
    }
}
