use std::path::PathBuf;

use crate::utils::validation::normalize_output_filename;

/// One file part of a merge upload, before it reaches disk
#[derive(Debug)]
pub struct UploadPart<R> {
    pub filename: String,
    /// Zero-based position in the client's submission order
    pub position: usize,
    pub reader: R,
}

impl<R> UploadPart<R> {
    pub fn new(filename: impl Into<String>, position: usize, reader: R) -> Self {
        Self {
            filename: filename.into(),
            position,
            reader,
        }
    }
}

/// An upload copied to the spool directory. The file itself is owned by the
/// request's `CleanupGuard`; this is only a handle to it.
#[derive(Debug, Clone)]
pub struct SpooledFile {
    pub path: PathBuf,
    pub original_name: String,
    pub position: usize,
    pub size: u64,
}

/// Spooled inputs in output page order plus the download name
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub files: Vec<SpooledFile>,
    pub output_name: String,
}

impl MergeRequest {
    pub fn new(mut files: Vec<SpooledFile>, requested_name: Option<&str>) -> Self {
        files.sort_by_key(|f| f.position);
        Self {
            files,
            output_name: normalize_output_filename(requested_name),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}
