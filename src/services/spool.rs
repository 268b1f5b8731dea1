use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

use crate::models::{SpooledFile, UploadPart};
use crate::services::cleanup::CleanupGuard;

const SPOOL_PREFIX: &str = "upload-";
const SPOOL_SUFFIX: &str = ".pdf";

/// Filesystem holding area for uploads, so request memory does not grow with
/// upload size. Shared by all requests; file names are random so requests
/// never collide.
#[derive(Debug, Clone)]
pub struct SpoolStore {
    dir: PathBuf,
}

impl SpoolStore {
    /// Opens the spool directory, creating it when missing.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies one upload to a new spool file.
    ///
    /// The file is handed to `guard` before any byte is written, so a failed
    /// copy still leaves it scheduled for removal.
    pub async fn spool<R>(
        &self,
        part: UploadPart<R>,
        guard: &mut CleanupGuard,
    ) -> io::Result<SpooledFile>
    where
        R: AsyncRead + Unpin,
    {
        let UploadPart {
            filename,
            position,
            mut reader,
        } = part;

        let (file, temp_path) = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .suffix(SPOOL_SUFFIX)
            .rand_bytes(12)
            .tempfile_in(&self.dir)?
            .into_parts();
        let path = guard.register(temp_path);

        let mut file = tokio::fs::File::from_std(file);
        let size = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        debug!(
            "Spooled '{}' (#{}) to {} ({} bytes)",
            filename,
            position,
            path.display(),
            size
        );

        Ok(SpooledFile {
            path,
            original_name: filename,
            position,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    /// Yields a few bytes, then fails like a dropped client connection
    struct BrokenReader {
        sent: bool,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            self.sent = true;
            buf.put_slice(b"%PDF-1.");
            Poll::Ready(Ok(()))
        }
    }

    fn entries(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn test_spool_copies_bytes_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path()).unwrap();
        let mut guard = CleanupGuard::new();

        let payload = b"%PDF-1.5 fake body".to_vec();
        let spooled = store
            .spool(UploadPart::new("a.pdf", 0, &payload[..]), &mut guard)
            .await
            .unwrap();

        assert_eq!(spooled.original_name, "a.pdf");
        assert_eq!(spooled.size, payload.len() as u64);
        assert_eq!(std::fs::read(&spooled.path).unwrap(), payload);
        assert!(spooled.path.starts_with(dir.path()));
        assert_eq!(guard.len(), 1);

        guard.release();
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_spool_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path()).unwrap();
        let mut guard = CleanupGuard::new();

        let a = store
            .spool(UploadPart::new("same.pdf", 0, &b"one"[..]), &mut guard)
            .await
            .unwrap();
        let b = store
            .spool(UploadPart::new("same.pdf", 1, &b"two"[..]), &mut guard)
            .await
            .unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(entries(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_failed_copy_is_still_cleaned() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path()).unwrap();
        let mut guard = CleanupGuard::new();

        store
            .spool(UploadPart::new("ok.pdf", 0, &b"fine"[..]), &mut guard)
            .await
            .unwrap();
        let err = store
            .spool(
                UploadPart::new("broken.pdf", 1, BrokenReader { sent: false }),
                &mut guard,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(guard.len(), 2);

        drop(guard);
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("spool").join("nested");
        let store = SpoolStore::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.dir(), nested.as_path());
    }
}
