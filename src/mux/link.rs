//! One logical stream inside a hub
//!
//! A link pairs an accepted local socket with a link id on its hub.
//! Outbound bytes become `Data` frames on the hub's shared frame
//! queue; inbound events arrive on the link's own channel, fed by the
//! hub's read loop.

use super::{Frame, LinkId, MuxError};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Event delivered to a link by its hub
#[derive(Debug)]
pub enum LinkEvent {
    /// Payload bytes from the remote peer
    Data(Bytes),
    /// Remote close, or the hub died
    Close,
}

/// Read chunk size for the local socket; fits the frame length field
const READ_CHUNK: usize = 16 * 1024;

/// Handle for one multiplexed stream
pub struct Link {
    id: LinkId,
    outbound: mpsc::Sender<Frame>,
    events: mpsc::Receiver<LinkEvent>,
}

impl Link {
    pub(super) fn new(
        id: LinkId,
        outbound: mpsc::Sender<Frame>,
        events: mpsc::Receiver<LinkEvent>,
    ) -> Self {
        Self {
            id,
            outbound,
            events,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Announce this link to the remote demultiplexer. The hub's frame
    /// queue is FIFO, so the announcement reaches the remote before any
    /// payload bytes pumped afterwards.
    pub async fn send_create(&self) -> Result<(), MuxError> {
        self.outbound
            .send(Frame::link_create(self.id))
            .await
            .map_err(|_| MuxError::TunnelClosed)
    }

    /// Shuttle bytes between the local socket and this link until
    /// either side closes.
    pub async fn pump<S>(self, conn: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut local_read, mut local_write) = tokio::io::split(conn);
        let id = self.id;
        let outbound = self.outbound;
        let mut events = self.events;

        let mut inbound = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LinkEvent::Data(data) => {
                        if local_write.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    LinkEvent::Close => break,
                }
            }
            let _ = local_write.shutdown().await;
        });

        let mut local_to_tunnel = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match local_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if outbound.send(Frame::data(id, data)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = outbound.send(Frame::link_close(id)).await;
        });

        tokio::select! {
            _ = &mut inbound => {
                // Remote side is gone; stop reading the local socket.
                local_to_tunnel.abort();
            }
            _ = &mut local_to_tunnel => {
                // Local EOF sent our close; drain what the remote still
                // has in flight until it closes too.
                let _ = (&mut inbound).await;
            }
        }
    }
}
