//! Mux layer - many logical links over one encrypted tunnel
//!
//! Provides:
//! - Frame encoding/decoding
//! - The framed RC4 tunnel substrate
//! - Link id allocation and the link table
//! - The hub (frame dispatch, link lifecycle)

mod alloc;
mod frame;
mod hub;
mod link;
pub mod wire;

pub use alloc::{IdAllocator, LinkId, LinkTable};
pub use frame::{Frame, FrameHeader, FrameType, FRAME_HEADER_SIZE};
pub use hub::Hub;
pub use link::{Link, LinkEvent};

use thiserror::Error;

/// Mux layer errors
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Link id {0} already in use")]
    LinkIdInUse(LinkId),

    #[error("Tunnel closed")]
    TunnelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upper bound on simultaneous links per hub; id 0 is reserved
pub const MAX_LINKS_PER_TUNNEL: u16 = 8192;

/// Capacity of a hub's outbound frame queue
pub(crate) const OUTBOUND_BACKLOG: usize = 256;

/// Capacity of a link's inbound event queue
pub(crate) const LINK_BACKLOG: usize = 64;

/// Interval between keepalive frames on an idle tunnel
pub(crate) const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
