//! Destinations for completed file transfers.

use std::path::{Component, Path, PathBuf};

use tracing::info;

/// Errors from delivering a completed file.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

/// Receives each completed, name-matched transfer exactly once.
///
/// `accept` is synchronous and may block on file I/O. Async callers should
/// run the `file_end` step on the blocking pool.
pub trait Sink {
    fn accept(&mut self, filename: &str, data: Vec<u8>) -> Result<(), SinkError>;
}

/// Writes completed files into a download directory.
///
/// Only bare file names are accepted; the hub cannot place files outside
/// the directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// The directory is created on the first accepted file.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Sink for DirectorySink {
    fn accept(&mut self, filename: &str, data: Vec<u8>) -> Result<(), SinkError> {
        validate_file_name(filename)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, &data)?;
        info!(path = %path.display(), bytes = data.len(), "file saved");
        Ok(())
    }
}

/// Collects completed files in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Vec<(String, Vec<u8>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files received so far, in completion order.
    pub fn files(&self) -> &[(String, Vec<u8>)] {
        &self.files
    }
}

impl Sink for MemorySink {
    fn accept(&mut self, filename: &str, data: Vec<u8>) -> Result<(), SinkError> {
        self.files.push((filename.to_string(), data));
        Ok(())
    }
}

/// Accepts a single path component with no traversal or drive prefix.
fn validate_file_name(name: &str) -> Result<(), SinkError> {
    if name.is_empty() {
        return Err(SinkError::InvalidName("empty name".into()));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(SinkError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    // Reject Windows-style drive prefixes.
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(SinkError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(SinkError::InvalidName(format!("not a plain file name: {name}"))),
    }
}
