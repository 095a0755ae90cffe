//! JSONL reading recorder with file rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::reading::Reading;
use crate::error::Result;

const FILE_PREFIX: &str = "readings-";
const FILE_EXTENSION: &str = "jsonl";

/// Appends readings as JSON Lines
///
/// A new file is started after `max_records_per_file` records. Only the
/// newest `max_files_to_keep` files are retained in `dir`.
pub struct Recorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    file_index: u32,
}

impl Recorder {
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            file_index: 0,
        }
    }

    /// File currently being written, once the first record has landed
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    pub fn records_in_file(&self) -> usize {
        self.records_in_file
    }

    /// Append one reading, rotating first if the current file is full
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written, or the
    /// reading cannot be serialized.
    pub fn record(&mut self, reading: &Reading) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, reading)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            self.records_in_file += 1;
        }

        Ok(())
    }

    /// Flush and close the current file
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.close()?;
        fs::create_dir_all(&self.dir)?;

        let name = format!(
            "{}{}-{:04}.{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d-%H%M%S"),
            self.file_index,
            FILE_EXTENSION
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!("Recording readings to {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;
        self.file_index = self.file_index.wrapping_add(1);

        self.prune()
    }

    fn prune(&self) -> Result<()> {
        let mut files = recorded_files(&self.dir)?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        let excess = files.len() - self.max_files_to_keep;
        for path in files.drain(..excess) {
            debug!("Removing old recording {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to flush recorder: {}", e);
        }
    }
}

/// Recording files in `dir`, oldest first
pub fn recorded_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let is_recording = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(FILE_PREFIX))
                .unwrap_or(false);
            is_recording && path.extension().and_then(|ext| ext.to_str()) == Some(FILE_EXTENSION)
        })
        .collect();
    // Timestamp and index are zero-padded, so name order is creation order
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(sequence: u64) -> Reading {
        Reading::sample(sequence, 20.5, 1500 + sequence as i64, true, "{}")
    }

    fn read_readings(path: &Path) -> Vec<Reading> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_no_file_before_first_record() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::new(dir.path().join("logs"), 10, 3);
        assert!(recorder.current_path().is_none());
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_records_are_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(dir.path(), 10, 3);

        recorder.record(&sample(1)).unwrap();
        recorder.record(&Reading::opaque("boot")).unwrap();

        let path = recorder.current_path().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("readings-"));
        assert!(name.ends_with(".jsonl"));

        let readings = read_readings(&path);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sequence, Some(1));
        assert_eq!(readings[0].moisture_raw, Some(1501));
        assert!(readings[1].is_opaque());
        assert_eq!(readings[1].raw_line, "boot");
    }

    #[test]
    fn test_rotation_after_max_records() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(dir.path(), 2, 10);

        for i in 0..5 {
            recorder.record(&sample(i)).unwrap();
        }

        let files = recorded_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(read_readings(&files[0]).len(), 2);
        assert_eq!(read_readings(&files[1]).len(), 2);
        assert_eq!(read_readings(&files[2]).len(), 1);
        assert_eq!(recorder.records_in_file(), 1);
        assert_eq!(read_readings(&files[2])[0].sequence, Some(4));
    }

    #[test]
    fn test_retention_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(dir.path(), 1, 2);

        for i in 0..5 {
            recorder.record(&sample(i)).unwrap();
        }

        let files = recorded_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(read_readings(&files[0])[0].sequence, Some(3));
        assert_eq!(read_readings(&files[1])[0].sequence, Some(4));
    }

    #[test]
    fn test_unrelated_files_untouched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        fs::write(dir.path().join("readings-old.csv"), "keep").unwrap();

        let mut recorder = Recorder::new(dir.path(), 1, 1);
        for i in 0..3 {
            recorder.record(&sample(i)).unwrap();
        }

        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("readings-old.csv").exists());
        assert_eq!(recorded_files(dir.path()).unwrap().len(), 1);
    }
}
