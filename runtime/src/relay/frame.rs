//! Length-prefixed frame codec for the network channel.
//!
//! Wire format: `u32` big-endian length followed by that many bytes.

use guest_harness_core::error::{HarnessError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const PREFIX_LEN: usize = 4;

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame.
/// A stream ending inside the prefix or payload is `FrameTruncated`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(HarnessError::FrameTruncated {
                expected: PREFIX_LEN,
                received: filled,
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    let mut payload = Vec::with_capacity(len.min(64 * 1024));
    let received = (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut payload)
        .await?;
    if received != len {
        return Err(HarnessError::FrameTruncated {
            expected: len,
            received,
        });
    }

    Ok(Some(payload))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        HarnessError::Other(format!("frame of {} bytes exceeds u32 length", payload.len()))
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_reference_frame() {
        let bytes: &[u8] = &[0x00, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04];
        let mut reader = bytes;
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame, Some(vec![1, 2, 3, 4]));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let payloads: Vec<Vec<u8>> = vec![vec![], vec![0xff], (0..=255u8).collect(), vec![7; 3000]];

        let expected = payloads.clone();
        let writer = tokio::spawn(async move {
            for p in &payloads {
                write_frame(&mut a, p).await.unwrap();
            }
        });

        for p in expected {
            assert_eq!(read_frame(&mut b).await.unwrap(), Some(p));
        }
        writer.await.unwrap();
        // Writer dropped: clean end of stream at a frame boundary
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mut reader: &[u8] = &[0, 0, 0, 0];
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_partial_prefix_is_truncation() {
        let mut reader: &[u8] = &[0, 0];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::FrameTruncated {
                expected: 4,
                received: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_short_payload_is_truncation() {
        let mut reader: &[u8] = &[0, 0, 0, 8, 1, 2, 3];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::FrameTruncated {
                expected: 8,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_write_prefix_is_big_endian() {
        let mut out = Vec::new();
        write_frame(&mut out, &[9; 258]).await.unwrap();
        assert_eq!(&out[..4], &[0, 0, 1, 2]);
        assert_eq!(out.len(), 262);
    }
}
