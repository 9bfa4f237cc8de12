//! Framed encrypted tunnel substrate
//!
//! Wraps the two halves of an upstream socket in independent RC4
//! keystreams of the session key, one per direction, and speaks the
//! frame codec over them. Frames are read with exact-length reads:
//! header first, then payload.

use super::{Frame, FrameHeader, MuxError, FRAME_HEADER_SIZE};
use crate::crypto::KEY_LEN;
use bytes::BytesMut;
use rc4::{consts::U32, KeyInit, Rc4, StreamCipher};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

fn keystream(key: &[u8; KEY_LEN]) -> Rc4<U32> {
    Rc4::new(key.into())
}

/// Wrap a socket's halves into the framed encrypted tunnel
pub fn wrap<R, W>(reader: R, writer: W, key: &[u8; KEY_LEN]) -> (TunnelReader, TunnelWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    (
        TunnelReader {
            inner: Box::new(reader),
            cipher: keystream(key),
        },
        TunnelWriter {
            inner: Box::new(writer),
            cipher: keystream(key),
        },
    )
}

/// Deciphering, frame-parsing read half of a tunnel
pub struct TunnelReader {
    inner: BoxedRead,
    cipher: Rc4<U32>,
}

impl TunnelReader {
    /// Read the next frame. Errors on socket failure, EOF, or a
    /// header that does not parse (which on an enciphered stream also
    /// catches key mismatch).
    pub async fn read_frame(&mut self) -> Result<Frame, MuxError> {
        let mut hdr = [0u8; FRAME_HEADER_SIZE];
        self.inner.read_exact(&mut hdr).await?;
        self.cipher.apply_keystream(&mut hdr);
        let header = FrameHeader::parse(&hdr)?;

        let mut payload = BytesMut::zeroed(header.len as usize);
        if header.len > 0 {
            self.inner.read_exact(&mut payload).await?;
            self.cipher.apply_keystream(&mut payload);
        }

        Ok(Frame {
            frame_type: header.frame_type,
            link_id: header.link_id,
            payload: payload.freeze(),
        })
    }
}

/// Enciphering, frame-encoding write half of a tunnel
pub struct TunnelWriter {
    inner: BoxedWrite,
    cipher: Rc4<U32>,
}

impl TunnelWriter {
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), MuxError> {
        let mut buf = frame.encode();
        self.cipher.apply_keystream(&mut buf);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
