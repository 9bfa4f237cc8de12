//! # muxtun
//!
//! The client half of a TCP-over-TCP multiplexing tunnel. Many
//! short-lived local TCP connections are carried through a small, fixed
//! pool of persistent, authenticated, encrypted upstream connections
//! ("hubs") to a remote peer that demultiplexes them back out.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Acceptor                         │
//! │        (local listener, least-loaded hub pick)       │
//! ├─────────────────────────────────────────────────────┤
//! │                     Hub pool                         │
//! │        (min-heap of live hubs keyed by load)         │
//! ├─────────────────────────────────────────────────────┤
//! │                       Hub                            │
//! │     (link id allocation, frame dispatch, links)      │
//! ├─────────────────────────────────────────────────────┤
//! │                Framed encrypted tunnel               │
//! │        (frame codec over an RC4 byte stream)         │
//! ├─────────────────────────────────────────────────────┤
//! │                    Handshake                         │
//! │   (challenge/response auth, session key derivation)  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod mux;
pub mod pool;

pub use client::Client;
pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Mux error: {0}")]
    Mux(#[from] mux::MuxError),

    #[error("Configuration error: {0}")]
    Config(String),
}
