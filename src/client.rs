//! Tunnel client: hub supervision, the local acceptor, and the
//! per-connection handler
//!
//! `Client::start` dials one worker per configured tunnel, waits for
//! every first attempt to report in, then binds the local listener.
//! Workers keep their slot alive forever after a successful first
//! dial: on tunnel loss they pull the hub from the pool, wait out the
//! reconnect delay, and dial again.

use crate::config::ClientConfig;
use crate::crypto::{Authenticator, CHALLENGE_LEN};
use crate::mux::{wire, Hub};
use crate::pool::{HubItem, HubPool};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay between reconnect attempts after a tunnel is lost
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// TCP keepalive period on accepted local sockets
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

pub struct Client {
    listen: String,
    server: String,
    tunnels: usize,
    auth: Arc<Authenticator>,
    pool: Arc<HubPool>,
    local_addr: Mutex<Option<SocketAddr>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            listen: config.listen.clone(),
            server: config.server.clone(),
            tunnels: config.tunnels,
            auth: Arc::new(Authenticator::new(&config.secret)),
            pool: Arc::new(HubPool::new()),
            local_addr: Mutex::new(None),
            acceptor: Mutex::new(None),
        }
    }

    /// Bring up the hub pool, then the local listener.
    ///
    /// Fails if any tunnel's first dial or handshake fails, or if the
    /// local address cannot be bound; in both cases nothing is left
    /// listening. After a successful return the acceptor runs until
    /// the listener breaks.
    pub async fn start(&self) -> Result<()> {
        if self.tunnels == 0 {
            return Err(Error::Config("tunnels must be at least 1".to_string()));
        }

        let (ready_tx, mut ready_rx) = mpsc::channel(self.tunnels);
        for index in 0..self.tunnels {
            tokio::spawn(hub_worker(
                index,
                self.server.clone(),
                self.auth.clone(),
                self.pool.clone(),
                ready_tx.clone(),
            ));
        }
        drop(ready_tx);

        for _ in 0..self.tunnels {
            match ready_rx.recv().await {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(e),
                None => return Err(Error::Config("tunnel worker vanished".to_string())),
            }
        }

        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr);
        info!(%addr, "listening");

        let pool = self.pool.clone();
        let handle = tokio::spawn(accept_loop(listener, pool));
        *self.acceptor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Block until the acceptor terminates
    pub async fn wait(&self) {
        let handle = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Address the acceptor is bound to, once `start` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of hubs currently in the pool
    pub fn active_hubs(&self) -> usize {
        self.pool.len()
    }

    /// Load of every pooled hub, unordered
    pub fn hub_loads(&self) -> Vec<i64> {
        self.pool.loads()
    }

    /// Log a health summary of the pool and its hubs
    pub fn status(&self) {
        info!(hubs = self.active_hubs(), "client status");
        self.pool.status();
    }
}

/// Dial the upstream peer and run the handshake, producing a keyed hub
async fn create_hub(server: &str, auth: &Authenticator) -> Result<Hub> {
    let mut stream = TcpStream::connect(server).await?;
    stream.set_nodelay(true)?;
    info!(
        local = ?stream.local_addr().ok(),
        remote = ?stream.peer_addr().ok(),
        "tunnel connected"
    );

    let mut challenge = [0u8; CHALLENGE_LEN];
    stream.read_exact(&mut challenge).await?;
    let response = auth.respond(&challenge)?;
    stream.write_all(&response.token).await?;

    let (read_half, write_half) = stream.into_split();
    let (reader, writer) = wire::wrap(read_half, write_half, &response.session_key);
    Ok(Hub::new(reader, writer))
}

/// One supervisor slot: dial, register, run, reconnect forever. The
/// first attempt's outcome goes to `ready`; a first-attempt failure
/// ends the worker so startup can fail fast.
async fn hub_worker(
    index: usize,
    server: String,
    auth: Arc<Authenticator>,
    pool: Arc<HubPool>,
    ready: mpsc::Sender<Result<()>>,
) {
    let mut ready = Some(ready);
    loop {
        match create_hub(&server, &auth).await {
            Ok(hub) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(())).await;
                }
                info!(tunnel = index, "tunnel established");

                let item = HubItem::new(hub);
                pool.push(item.clone());
                if let Err(e) = item.hub().start().await {
                    debug!(tunnel = index, error = %e, "tunnel read loop ended");
                }
                pool.remove(&item);
                error!(tunnel = index, "tunnel disconnected");
            }
            Err(e) => {
                if let Some(tx) = ready.take() {
                    error!(tunnel = index, error = %e, "tunnel connect failed");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                error!(tunnel = index, error = %e, "tunnel reconnect failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, pool: Arc<HubPool>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "new connection");
                if let Err(e) = enable_keepalive(&stream) {
                    debug!(%peer, error = %e, "keepalive setup failed");
                }
                let Some(item) = pool.fetch_least_loaded() else {
                    error!(%peer, "no active hub");
                    continue;
                };
                tokio::spawn(handle_conn(pool.clone(), item, stream));
            }
            Err(e) if is_temporary_accept_error(&e) => {
                warn!(error = %e, "accept failed, retrying");
            }
            Err(e) => {
                error!(error = %e, "accept failed, stopping listener");
                break;
            }
        }
    }
}

fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

fn is_temporary_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

/// Undoes the admission taken by `fetch_least_loaded`
struct LoadGuard {
    pool: Arc<HubPool>,
    item: Arc<HubItem>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.pool.drop_load(&self.item);
    }
}

/// Returns the link id to the hub's free set
struct IdGuard {
    item: Arc<HubItem>,
    link_id: u16,
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        self.item.hub().release_id(self.link_id);
    }
}

/// Clears the link's table slot. Declared after [`IdGuard`] in the
/// handler so it drops first: the slot must be empty before the id can
/// be re-issued.
struct LinkGuard {
    item: Arc<HubItem>,
    link_id: u16,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.item.hub().release_link(self.link_id);
    }
}

/// Carry one accepted connection over the picked hub. Every exit path,
/// panics included, runs the guards: release the link, then the id,
/// then the admission.
async fn handle_conn(pool: Arc<HubPool>, item: Arc<HubItem>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let _load = LoadGuard {
        pool,
        item: item.clone(),
    };

    let Some(link_id) = item.hub().acquire_id() else {
        error!(?peer, "link id allocation failed");
        return;
    };
    let _id = IdGuard {
        item: item.clone(),
        link_id,
    };

    let link = match item.hub().new_link(link_id) {
        Ok(link) => link,
        Err(e) => {
            error!(link_id, ?peer, error = %e, "link creation failed");
            return;
        }
    };
    let _link = LinkGuard {
        item: item.clone(),
        link_id,
    };

    info!(link_id, ?peer, "link open");
    if link.send_create().await.is_err() {
        debug!(link_id, "tunnel closed before link create");
        return;
    }
    link.pump(stream).await;
    debug!(link_id, "link closed");
}
