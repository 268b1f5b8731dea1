use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime configuration for the merge service
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Maximum multipart request body in bytes (default: 512 MB)
    pub max_upload_size: usize,

    /// Directory holding spooled uploads and merge cache files
    pub spool_dir: PathBuf,

    /// Size of each streamed response chunk in bytes (default: 64 KB)
    pub stream_chunk_size: usize,

    /// Chunks buffered between the merge task and a slow client (default: 8)
    pub stream_buffer_chunks: usize,

    /// Total upload size above which /api/validate warns (default: 100 MB)
    pub size_warning_threshold: u64,

    /// Compress content streams of the merged document (default: false)
    pub compress_output: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 512 * 1024 * 1024, // 512 MB
            spool_dir: env::temp_dir().join("pdf-merge-spool"),
            stream_chunk_size: 64 * 1024, // 64 KB
            stream_buffer_chunks: 8,
            size_warning_threshold: 100 * 1024 * 1024, // 100 MB
            compress_output: false,
        }
    }
}

impl MergeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: parse_env("MAX_UPLOAD_SIZE", default.max_upload_size),

            spool_dir: env::var("SPOOL_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.spool_dir),

            stream_chunk_size: parse_env("STREAM_CHUNK_SIZE", default.stream_chunk_size).max(1),

            stream_buffer_chunks: parse_env("STREAM_BUFFER_CHUNKS", default.stream_buffer_chunks)
                .max(1),

            size_warning_threshold: parse_env(
                "SIZE_WARNING_THRESHOLD",
                default.size_warning_threshold,
            ),

            compress_output: env::var("COMPRESS_OUTPUT")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.compress_output),
        }
    }

    /// Config rooted at a specific spool directory, everything else default
    pub fn with_spool_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: dir.into(),
            ..Self::default()
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MergeConfig::default();
        assert_eq!(config.max_upload_size, 512 * 1024 * 1024);
        assert_eq!(config.stream_chunk_size, 64 * 1024);
        assert_eq!(config.stream_buffer_chunks, 8);
        assert!(!config.compress_output);
        assert!(config.spool_dir.ends_with("pdf-merge-spool"));
    }

    #[test]
    fn test_with_spool_dir() {
        let config = MergeConfig::with_spool_dir("/var/spool/merge");
        assert_eq!(config.spool_dir, PathBuf::from("/var/spool/merge"));
        assert_eq!(config.size_warning_threshold, 100 * 1024 * 1024);
    }

    #[test]
    fn test_parse_env_falls_back_when_unset() {
        assert_eq!(parse_env("PDF_MERGE_TEST_UNSET_KEY", 42usize), 42);
    }
}
