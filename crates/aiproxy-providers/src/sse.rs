//! Upstream SSE plumbing: a line scanner over the response byte stream and
//! the single reader task every streaming executor spawns.

use aiproxy_auth::{ExecutorError, StreamChunk};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::client::header_map_from;

const MAX_BUFFER: usize = 50 * 1024 * 1024;
const CHANNEL_CAPACITY: usize = 64;

/// Verifies the response is a healthy stream and returns its raw byte
/// stream; non-2xx responses are drained into an error.
pub(crate) async fn ensure_stream(
    response: wreq::Response,
) -> Result<wreq::Response, ExecutorError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let headers = header_map_from(response.headers());
    let body = response.bytes().await.unwrap_or_else(|_| Bytes::new());
    tracing::debug!(status, body = %String::from_utf8_lossy(&body), "upstream stream error response");
    Err(ExecutorError::new(status, String::from_utf8_lossy(&body).into_owned()).with_headers(headers))
}

/// Spawns the single reader task for one upstream stream.
///
/// `translate` maps one upstream line to zero or more client chunks; it is
/// called once more with `[DONE]` at EOF so stateful translators can flush.
/// The returned receiver closes when upstream ends or the consumer goes away.
pub(crate) fn spawn_reader<F>(
    response: wreq::Response,
    mut translate: F,
) -> mpsc::Receiver<StreamChunk>
where
    F: FnMut(&[u8]) -> Vec<String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();
        loop {
            let item = match stream.next().await {
                Some(item) => item,
                None => break,
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx
                        .send(StreamChunk::error(ExecutorError::transport(format!(
                            "upstream stream read failed: {err}"
                        ))))
                        .await;
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            if buffer.len() > MAX_BUFFER {
                let _ = tx
                    .send(StreamChunk::error(ExecutorError::fatal(
                        "stream buffer overflow",
                    )))
                    .await;
                return;
            }
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.split_to(pos + 1);
                let line = trim_line(&line);
                if line.is_empty() {
                    continue;
                }
                for out in translate(line) {
                    if tx.send(StreamChunk::payload(out.into_bytes())).await.is_err() {
                        // Consumer went away; stop reading upstream.
                        return;
                    }
                }
            }
        }
        // Flush any unterminated trailing line, then the terminal sentinel.
        let trailing = trim_line(&buffer);
        if !trailing.is_empty() {
            for out in translate(trailing) {
                if tx.send(StreamChunk::payload(out.into_bytes())).await.is_err() {
                    return;
                }
            }
        }
        for out in translate(b"[DONE]") {
            if tx.send(StreamChunk::payload(out.into_bytes())).await.is_err() {
                return;
            }
        }
    });
    rx
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let Some((first, rest)) = line.split_first() {
        if *first == b' ' {
            line = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = line.split_last() {
        if matches!(*last, b'\n' | b'\r' | b' ') {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Collects every payload chunk from a stream receiver; used by providers
/// that are stream-only upstream but must answer unary requests.
pub(crate) async fn collect_stream(
    mut rx: mpsc::Receiver<StreamChunk>,
) -> Result<Vec<Vec<u8>>, ExecutorError> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        if let Some(err) = chunk.err {
            return Err(err);
        }
        if !chunk.payload.is_empty() {
            chunks.push(chunk.payload);
        }
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::trim_line;

    #[test]
    fn trims_sse_line_endings() {
        assert_eq!(trim_line(b"data: {}\r\n"), b"data: {}");
        assert_eq!(trim_line(b"  \r\n"), b"");
        assert_eq!(trim_line(b"plain"), b"plain");
    }
}
