//! On-the-fly request body compression.
//!
//! An encoder runs on a blocking task and writes compressed chunks into a
//! bounded pipe; the HTTP transport reads the other end as a streaming
//! request body. The full payload is never materialised in memory.
//!
//! The pipe closes deterministically in both directions:
//! - a producer or encoder error, including a failure to finish the frame,
//!   is delivered to the reader as the next stream item;
//! - a dropped reader makes the next write fail with `BrokenPipe`, which
//!   aborts the producer.

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::Stream;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Size of the chunks handed to the reader.
const CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks the pipe buffers before the writer blocks.
const PIPE_DEPTH: usize = 4;

/// zstd level 0 selects the library default.
const ZSTD_LEVEL: i32 = 0;

/// `Content-Encoding` of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentEncoding {
    /// Uncompressed.
    #[default]
    Identity,
    Gzip,
    Zstd,
}

impl ContentEncoding {
    /// Header value, or `None` for an uncompressed body.
    pub fn as_header(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
            Self::Zstd => Some("zstd"),
        }
    }
}

/// Reader end of an encoder pipe.
#[derive(Debug)]
pub struct EncodedStream {
    inner: ReceiverStream<io::Result<Bytes>>,
}

impl EncodedStream {
    /// Turns the stream into a streaming request body.
    pub fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(self)
    }
}

impl Stream for EncodedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Compresses everything read from `input`.
///
/// Must be called from within a Tokio runtime.
pub fn encode<R>(encoding: ContentEncoding, mut input: R) -> EncodedStream
where
    R: Read + Send + 'static,
{
    encode_with(encoding, move |w| io::copy(&mut input, w).map(|_| ()))
}

/// Compresses everything `produce` writes.
///
/// `produce` runs on a blocking task. Must be called from within a Tokio
/// runtime.
pub fn encode_with<F>(encoding: ContentEncoding, produce: F) -> EncodedStream
where
    F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut pipe = PipeWriter::new(tx);
        if let Err(e) = run_encoder(encoding, &mut pipe, produce) {
            tracing::debug!(error = %e, ?encoding, "encoder pipe closed with error");
            // The reader may already be gone; nothing else to do then.
            let _ = pipe.tx.blocking_send(Err(e));
        }
    });
    EncodedStream {
        inner: ReceiverStream::new(rx),
    }
}

fn run_encoder<F>(encoding: ContentEncoding, pipe: &mut PipeWriter, produce: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    match encoding {
        ContentEncoding::Identity => produce(pipe)?,
        ContentEncoding::Gzip => {
            let mut enc = GzEncoder::new(&mut *pipe, Compression::default());
            produce(&mut enc)?;
            enc.finish()?;
        }
        ContentEncoding::Zstd => {
            let mut enc = zstd::stream::write::Encoder::new(&mut *pipe, ZSTD_LEVEL)?;
            produce(&mut enc)?;
            enc.finish()?;
        }
    }
    pipe.flush()
}

/// Writer end of an encoder pipe.
struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl PipeWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "encoder pipe reader closed"))
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "encoder pipe reader closed",
            ));
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(mut stream: EncodedStream) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn sample() -> Vec<u8> {
        (0..200_000u32)
            .flat_map(|i| format!("{{\"n\":{i}}}\n").into_bytes())
            .collect()
    }

    #[tokio::test]
    async fn gzip_round_trip() {
        let input = sample();
        let compressed = collect(encode(ContentEncoding::Gzip, io::Cursor::new(input.clone())))
            .await
            .unwrap();
        assert!(compressed.len() < input.len());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, input);
    }

    #[tokio::test]
    async fn zstd_round_trip() {
        let input = sample();
        let compressed = collect(encode(ContentEncoding::Zstd, io::Cursor::new(input.clone())))
            .await
            .unwrap();
        assert_eq!(zstd::decode_all(&compressed[..]).unwrap(), input);
    }

    #[tokio::test]
    async fn identity_passes_bytes_through() {
        let out = collect(encode(ContentEncoding::Identity, io::Cursor::new(b"abc".to_vec())))
            .await
            .unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(ContentEncoding::Identity.as_header(), None);
        assert_eq!(ContentEncoding::Zstd.as_header(), Some("zstd"));
    }

    #[tokio::test]
    async fn producer_error_reaches_reader() {
        let stream = encode_with(ContentEncoding::Gzip, |w| {
            w.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad event"))
        });
        let err = collect(stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "bad event");
    }

    #[tokio::test]
    async fn dropped_reader_stops_the_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let stream = encode_with(ContentEncoding::Identity, move |w| {
            let chunk = vec![b'x'; CHUNK_SIZE];
            let result = loop {
                if let Err(e) = w.write_all(&chunk) {
                    break e;
                }
            };
            let _ = done_tx.send(result.kind());
            Err(result)
        });
        drop(stream);

        let kind = done_rx.await.unwrap();
        assert_eq!(kind, io::ErrorKind::BrokenPipe);
    }
}
