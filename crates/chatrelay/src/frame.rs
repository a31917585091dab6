//! Length-delimited framing: a 4-byte big-endian length followed by exactly
//! that many payload bytes.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::LengthDelimitedCodec;

/// Largest payload accepted by default (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const LEN_PREFIX_BYTES: usize = 4;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("stream ended mid-frame: got {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
/// Short reads are accumulated; only end of stream or an I/O error ends a
/// frame early.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX_BYTES];
    let got = read_full(reader, &mut prefix).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < LEN_PREFIX_BYTES {
        return Err(FramingError::Truncated {
            expected: LEN_PREFIX_BYTES,
            received: got,
        });
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(FramingError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload).await?;
    if got < len {
        return Err(FramingError::Truncated {
            expected: len,
            received: got,
        });
    }
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| FramingError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// Fills `buf` unless the stream ends first; returns the number of bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `FramedRead`/`FramedWrite` codec for the same wire format, capped at
/// `max_len` payload bytes in both directions.
pub fn frame_codec(max_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LEN_PREFIX_BYTES)
        .big_endian()
        .max_frame_length(max_len)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn roundtrip_through_tiny_pipe() {
        // A 3-byte pipe forces every frame to arrive in fragments.
        let (mut client, mut server) = tokio::io::duplex(3);
        let payloads: Vec<Vec<u8>> = vec![
            b"hello".to_vec(),
            Vec::new(),
            (0..=255u8).cycle().take(10_000).collect(),
        ];

        let expected = payloads.clone();
        let writer = tokio::spawn(async move {
            for p in &payloads {
                write_frame(&mut client, p).await.unwrap();
            }
        });

        for want in expected {
            let got = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
                .await
                .unwrap()
                .expect("frame");
            assert_eq!(got, want);
        }
        writer.await.unwrap();
        assert!(read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pipelined_frames_in_one_read() {
        let mut bytes = framed(b"one");
        bytes.extend(framed(b"two"));
        let mut reader = &bytes[..];

        let first = read_frame(&mut reader, 64).await.unwrap().unwrap();
        let second = read_frame(&mut reader, 64).await.unwrap().unwrap();
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
        assert!(read_frame(&mut reader, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_prefix() {
        let bytes = [0u8, 0];
        let mut reader = &bytes[..];
        let err = read_frame(&mut reader, 64).await.unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: 4,
                received: 2
            }
        ));
    }

    #[tokio::test]
    async fn truncated_payload() {
        let mut bytes = framed(b"abcdef");
        bytes.truncate(7);
        let mut reader = &bytes[..];
        let err = read_frame(&mut reader, 64).await.unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: 6,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn oversized_length_fails_before_payload() {
        // Only the prefix is present; the limit check must not wait for the body.
        let bytes = 5000u32.to_be_bytes();
        let mut reader = &bytes[..];
        let err = read_frame(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            FramingError::TooLarge {
                len: 5000,
                max: 1024
            }
        ));
    }

    #[tokio::test]
    async fn codec_reads_what_write_frame_wrote() {
        let (mut client, server) = tokio::io::duplex(5);
        tokio::spawn(async move {
            write_frame(&mut client, b"first").await.unwrap();
            write_frame(&mut client, b"second frame").await.unwrap();
            client.shutdown().await.unwrap();
        });

        let mut reader = FramedRead::new(server, frame_codec(DEFAULT_MAX_FRAME_BYTES));
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"first");
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"second frame");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn read_frame_reads_what_codec_wrote() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, frame_codec(DEFAULT_MAX_FRAME_BYTES));
        writer.send(Bytes::from_static(b"hello")).await.unwrap();
        drop(writer);

        let got = read_frame(&mut server, 64).await.unwrap().unwrap();
        assert_eq!(got, b"hello");
        assert!(read_frame(&mut server, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn codec_eof_mid_frame_is_an_error() {
        let bytes = framed(b"cut short");
        let mut reader = FramedRead::new(&bytes[..8], frame_codec(64));
        assert!(reader.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn codec_enforces_limit_both_ways() {
        let bytes = framed(b"too long");
        let mut reader = FramedRead::new(&bytes[..], frame_codec(4));
        assert!(reader.next().await.unwrap().is_err());

        let mut sink = Vec::new();
        let mut writer = FramedWrite::new(&mut sink, frame_codec(4));
        assert!(writer.send(Bytes::from_static(b"too long")).await.is_err());
        writer.send(Bytes::from_static(b"ok")).await.unwrap();
        drop(writer);
        assert_eq!(sink, framed(b"ok"));
    }
}
