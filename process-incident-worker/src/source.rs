//! Line-delimited message source.
//!
//! Each non-blank line of the input is one message payload. Payloads are
//! forwarded as raw bytes; decoding is the controller's job.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("reading input failed after {forwarded} messages: {source}")]
    Io {
        forwarded: u64,
        source: std::io::Error,
    },
}

/// Spawn a task reading payloads from `reader` into `tx`.
///
/// Ends at EOF or once the receiving side is dropped, yielding the number of
/// payloads forwarded. Backpressure comes from the bounded channel.
pub fn spawn_line_source<R>(reader: R, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<Result<u64, SourceError>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(forward_lines(reader, tx))
}

async fn forward_lines<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> Result<u64, SourceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut forwarded = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|source| SourceError::Io { forwarded, source })?;
        if read == 0 {
            tracing::debug!(forwarded, "Input exhausted");
            return Ok(forwarded);
        }

        let payload = line.trim_ascii();
        if payload.is_empty() {
            continue;
        }

        if tx.send(payload.to_vec()).await.is_err() {
            tracing::debug!(forwarded, "Consumer gone, stopping source");
            return Ok(forwarded);
        }
        forwarded += 1;
    }
}
