//! One persistent, authenticated, encrypted tunnel
//!
//! A hub owns the framed tunnel, the link id allocator, and the link
//! table. Its write half is serviced by a background task draining a
//! bounded frame queue; `start` runs the read loop, dispatching frames
//! to links, until the tunnel dies.

use super::wire::{TunnelReader, TunnelWriter};
use super::{
    Frame, FrameType, IdAllocator, Link, LinkEvent, LinkId, LinkTable, MuxError,
    HEARTBEAT_INTERVAL, LINK_BACKLOG, MAX_LINKS_PER_TUNNEL, OUTBOUND_BACKLOG,
};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

pub struct Hub {
    allocator: IdAllocator,
    table: LinkTable<mpsc::Sender<LinkEvent>>,
    outbound: mpsc::Sender<Frame>,
    reader: Mutex<Option<TunnelReader>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Build a hub over an established, authenticated tunnel. Spawns
    /// the writer task immediately; the read loop waits for `start`.
    pub fn new(reader: TunnelReader, writer: TunnelWriter) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BACKLOG);
        let writer_task = tokio::spawn(Self::write_loop(writer, outbound_rx));

        Self {
            allocator: IdAllocator::new(MAX_LINKS_PER_TUNNEL),
            table: LinkTable::new(MAX_LINKS_PER_TUNNEL as usize),
            outbound,
            reader: Mutex::new(Some(reader)),
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    async fn write_loop(mut writer: TunnelWriter, mut rx: mpsc::Receiver<Frame>) {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            debug!(error = %e, "tunnel write failed");
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if writer.write_frame(&Frame::heartbeat()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Take a free link id, or `None` when this hub is saturated
    pub fn acquire_id(&self) -> Option<LinkId> {
        self.allocator.acquire()
    }

    /// Return a link id to the free set. Must happen only after
    /// `release_link` for the same id, so a re-issued id never collides
    /// with a stale table entry.
    pub fn release_id(&self, id: LinkId) {
        self.allocator.release(id);
    }

    /// Create the link for an id acquired from this hub
    pub fn new_link(&self, id: LinkId) -> Result<Link, MuxError> {
        let (event_tx, event_rx) = mpsc::channel(LINK_BACKLOG);
        if !self.table.set(id, event_tx) {
            return Err(MuxError::LinkIdInUse(id));
        }
        Ok(Link::new(id, self.outbound.clone(), event_rx))
    }

    /// Remove a link from the table. Returns false if the slot was
    /// already empty (the hub tore down first).
    pub fn release_link(&self, id: LinkId) -> bool {
        self.table.reset(id)
    }

    /// Run the tunnel read loop until the tunnel dies, then tear down
    /// every live link. Call once.
    pub async fn start(&self) -> Result<(), MuxError> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut reader) = reader else {
            return Err(MuxError::TunnelClosed);
        };

        let result = loop {
            match reader.read_frame().await {
                Ok(frame) => self.dispatch(frame).await,
                Err(e) => break Err(e),
            }
        };

        self.shutdown();
        result
    }

    async fn dispatch(&self, frame: Frame) {
        match frame.frame_type {
            FrameType::Data => {
                if frame.link_id == 0 {
                    warn!("data frame on reserved link id 0");
                    return;
                }
                match self.table.get(frame.link_id) {
                    Some(events) => {
                        if events.send(LinkEvent::Data(frame.payload)).await.is_err() {
                            trace!(link_id = frame.link_id, "link receiver gone, dropping data");
                        }
                    }
                    None => {
                        // Stale data for a link we no longer track; tell
                        // the remote to stop sending.
                        debug!(link_id = frame.link_id, "data for unknown link");
                        let _ = self.outbound.try_send(Frame::link_close(frame.link_id));
                    }
                }
            }
            FrameType::LinkClose => {
                if let Some(events) = self.table.get(frame.link_id) {
                    let _ = events.send(LinkEvent::Close).await;
                }
            }
            FrameType::Heartbeat => trace!("heartbeat"),
            FrameType::LinkCreate => {
                warn!(link_id = frame.link_id, "unexpected link create from remote");
            }
        }
    }

    fn shutdown(&self) {
        for events in self.table.drain() {
            let _ = events.try_send(LinkEvent::Close);
        }
        if let Some(task) = self
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// Number of links currently bound in the table
    pub fn active_links(&self) -> usize {
        self.table.active()
    }

    /// Number of link ids still free
    pub fn free_ids(&self) -> usize {
        self.allocator.available()
    }

    /// Log a one-line health summary
    pub fn status(&self) {
        info!(
            active_links = self.active_links(),
            free_ids = self.free_ids(),
            "hub status"
        );
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Some(task) = self
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::mux::wire;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    /// A hub wired to a scripted remote over in-memory pipes.
    fn hub_pair() -> (Arc<Hub>, wire::TunnelReader, wire::TunnelWriter) {
        let key = [0x11u8; KEY_LEN];
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (nr, nw) = tokio::io::split(near);
        let (fr, fw) = tokio::io::split(far);
        let (reader, writer) = wire::wrap(nr, nw, &key);
        let (remote_reader, remote_writer) = wire::wrap(fr, fw, &key);
        (Arc::new(Hub::new(reader, writer)), remote_reader, remote_writer)
    }

    async fn next_non_heartbeat(reader: &mut wire::TunnelReader) -> Frame {
        loop {
            let frame = reader.read_frame().await.unwrap();
            if frame.frame_type != FrameType::Heartbeat {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_link_lifecycle() {
        let (hub, mut remote_reader, mut remote_writer) = hub_pair();
        let runner = hub.clone();
        tokio::spawn(async move {
            let _ = runner.start().await;
        });

        let id = hub.acquire_id().unwrap();
        let link = hub.new_link(id).unwrap();
        link.send_create().await.unwrap();

        let frame = next_non_heartbeat(&mut remote_reader).await;
        assert_eq!(frame.frame_type, FrameType::LinkCreate);
        assert_eq!(frame.link_id, id);

        // Pump a local socket through the link.
        let (local, app) = tokio::io::duplex(4096);
        let pump = tokio::spawn(link.pump(local));
        let (mut app_read, mut app_write) = tokio::io::split(app);

        tokio::io::AsyncWriteExt::write_all(&mut app_write, b"outbound")
            .await
            .unwrap();
        let frame = next_non_heartbeat(&mut remote_reader).await;
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(&frame.payload[..], b"outbound");

        remote_writer
            .write_frame(&Frame::data(id, Bytes::from_static(b"inbound")))
            .await
            .unwrap();
        let mut buf = [0u8; 7];
        tokio::io::AsyncReadExt::read_exact(&mut app_read, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"inbound");

        // Local close sends LinkClose; the remote acks with its own.
        tokio::io::AsyncWriteExt::shutdown(&mut app_write)
            .await
            .unwrap();
        let frame = next_non_heartbeat(&mut remote_reader).await;
        assert_eq!(frame.frame_type, FrameType::LinkClose);
        assert_eq!(frame.link_id, id);
        remote_writer
            .write_frame(&Frame::link_close(id))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump should finish after both sides close")
            .unwrap();

        assert!(hub.release_link(id));
        hub.release_id(id);
        assert_eq!(hub.active_links(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_link_id_rejected() {
        let (hub, _remote_reader, _remote_writer) = hub_pair();

        let id = hub.acquire_id().unwrap();
        let _link = hub.new_link(id).unwrap();

        assert!(matches!(
            hub.new_link(id),
            Err(MuxError::LinkIdInUse(conflict)) if conflict == id
        ));
    }

    #[tokio::test]
    async fn test_teardown_closes_live_links() {
        let (hub, _remote_reader, remote_writer) = hub_pair();

        let id = hub.acquire_id().unwrap();
        let link = hub.new_link(id).unwrap();

        let (local, app) = tokio::io::duplex(4096);
        let pump = tokio::spawn(link.pump(local));

        // Remote end vanishes: the read loop errors out and teardown
        // must wake the pump via a Close event.
        drop(remote_writer);
        drop(_remote_reader);
        assert!(hub.start().await.is_err());

        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump should observe hub teardown")
            .unwrap();

        assert_eq!(hub.active_links(), 0, "teardown drains the table");
        drop(app);
    }
}
