use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::config::MergeConfig;
use crate::models::MergeRequest;
use crate::services::merger::{MergeCache, MergeError, MergeSource, MergeSummary, PdfMergeUtility};

/// Drives one merge over a request's spooled files. Built per request.
#[derive(Debug, Clone)]
pub struct MergeOrchestrator {
    cache: MergeCache,
    compress: bool,
}

impl MergeOrchestrator {
    pub fn new(config: &MergeConfig) -> Self {
        Self::with_cache_dir(config.spool_dir.clone(), config.compress_output)
    }

    pub fn with_cache_dir(dir: PathBuf, compress: bool) -> Self {
        Self {
            cache: MergeCache::disk(dir),
            compress,
        }
    }

    /// Merges `request.files` in order into `output`.
    ///
    /// `output` is dropped before this returns, whatever the outcome.
    pub fn merge<W>(&self, request: &MergeRequest, output: W) -> Result<MergeSummary, MergeError>
    where
        W: Write + Send + 'static,
    {
        let mut utility = PdfMergeUtility::new().with_compression(self.compress);
        for file in &request.files {
            utility.add_source(MergeSource::file(&file.path, &file.original_name));
        }
        utility.set_destination(output);

        let summary = utility.merge(Some(&self.cache))?;
        info!(
            "📄 Merged {} documents into '{}' ({} pages, {} bytes)",
            summary.documents, request.output_name, summary.pages, summary.bytes_written
        );
        Ok(summary)
    }
}
