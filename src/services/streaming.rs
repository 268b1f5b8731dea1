//! Bridges the blocking merge writer to a chunked HTTP body.
//!
//! The merge runs on the blocking pool and writes into a `ChunkWriter`, which
//! hands fixed-size chunks to the response body through a bounded channel. A
//! full channel blocks the writer, so a slow client throttles the merge
//! instead of growing memory; a dropped body makes the next send fail.

use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Span, debug, error, warn};

use crate::api::error::AppError;
use crate::models::MergeRequest;
use crate::services::cleanup::CleanupGuard;
use crate::services::merger::{MergeError, MergeSummary};
use crate::services::orchestrator::MergeOrchestrator;
use crate::utils::validation::content_disposition;

type Chunk = Result<Bytes, io::Error>;

/// `std::io::Write` end of the response body channel
pub struct ChunkWriter {
    tx: mpsc::Sender<Chunk>,
    buf: BytesMut,
    chunk_size: usize,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<Chunk>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let chunk = self.buf.split_to(self.chunk_size).freeze();
            self.tx
                .blocking_send(Ok(chunk))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub buffer_chunks: usize,
}

/// A merge running in the background, feeding a response body
pub struct MergeStream {
    rx: mpsc::Receiver<Chunk>,
    handle: JoinHandle<Result<MergeSummary, MergeError>>,
    filename: String,
}

/// Starts the merge on the blocking pool.
///
/// The task owns `guard` and releases it only after the orchestrator has
/// finished writing, successfully or not. The channel closes after that
/// release, so the end of the response body implies the spool is clean.
pub fn spawn_merge(
    orchestrator: MergeOrchestrator,
    request: MergeRequest,
    guard: CleanupGuard,
    options: StreamOptions,
) -> MergeStream {
    let (tx, rx) = mpsc::channel(options.buffer_chunks.max(1));
    let failure_tx = tx.clone();
    let filename = request.output_name.clone();
    let span = Span::current();

    let handle = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();

        let writer = ChunkWriter::new(tx, options.chunk_size);
        let outcome = orchestrator.merge(&request, writer);

        if let Err(e) = &outcome {
            if e.is_disconnect() {
                warn!("Client went away while streaming '{}': {}", request.output_name, e);
            } else {
                error!("Merge of '{}' failed: {}", request.output_name, e);
            }
            // Surfaces as a body error so a committed response is aborted, not truncated
            let _ = failure_tx.blocking_send(Err(io::Error::other(e.to_string())));
        }

        let report = guard.release();
        debug!(
            removed = report.removed,
            failed = report.failed,
            "Released spooled files"
        );

        drop(failure_tx);
        outcome
    });

    MergeStream {
        rx,
        handle,
        filename,
    }
}

impl MergeStream {
    /// Waits for the first output chunk, then commits a streaming 200.
    ///
    /// A merge that fails before producing output is returned as an error so
    /// the client gets a proper status code instead of a broken download.
    pub async fn into_response(self) -> Result<Response, AppError> {
        let MergeStream {
            mut rx,
            handle,
            filename,
        } = self;

        match rx.recv().await {
            Some(Ok(first)) => {
                let stream = async_stream::stream! {
                    yield Ok::<Bytes, io::Error>(first);
                    while let Some(chunk) = rx.recv().await {
                        yield chunk;
                    }
                };

                let headers = [
                    (header::CONTENT_TYPE, mime::APPLICATION_PDF.to_string()),
                    (header::CONTENT_DISPOSITION, content_disposition(&filename)),
                ];

                Ok((headers, Body::from_stream(stream)).into_response())
            }
            _ => {
                drop(rx);
                match handle.await {
                    Ok(Err(e)) => Err(AppError::Merge(e)),
                    Ok(Ok(_)) => Err(AppError::Internal(
                        "merge finished without producing output".to_string(),
                    )),
                    Err(e) => Err(AppError::Internal(format!("merge task failed: {}", e))),
                }
            }
        }
    }
}
