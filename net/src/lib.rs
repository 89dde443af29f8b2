//! Datagram-like messaging over per-peer TCP streams.
//!
//! A [`Node`] owns a listening socket and one [`Client`] per neighbor,
//! multiplexed through a single poll-based readiness scan that the
//! application drives. Messages are length-prefixed byte buffers; delivery
//! is in order per peer (TCP) and unordered across peers, which gives the
//! overlay a UDP-like send/receive surface without datagram loss.
//!
//! Everything runs on the caller's thread. The only suspension point is
//! the scan inside [`Node::recv_from`] and [`Node::wait_for_data`]; every
//! other call returns after bounded, non-blocking progress.
#![warn(missing_docs)]

pub mod client;
pub mod dictionary;
pub mod error;
pub mod frame;
pub mod hello;
pub mod inbox;
pub mod recver;
pub mod sender;

pub use client::Client;
pub use dictionary::Dictionary;
pub use error::Error;
pub use inbox::UserFd;
pub use trellis_common::peer::PeerId;

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use log::info;
use trellis_common::config::Tags;
use trellis_common::time::Deadline;

use inbox::Inbox;

/// Listen backlog when the host configures none.
const DEFAULT_BACKLOG: i64 = 50;

/// Configuration tag carrying the listen backlog.
const TAG_TCP_BACKLOG: &str = "tcp_backlog";

/// A local overlay endpoint.
///
/// Dropping the node releases the server socket, every neighbor stream and
/// any undelivered inbound messages.
#[derive(Debug)]
pub struct Node {
    id: PeerId,
    listener: TcpListener,
    neighbors: Dictionary,
    inbox: Inbox,
}

impl Node {
    /// Bind the local endpoint and start listening.
    ///
    /// `config` is a tag list; `tcp_backlog` (default 50) sizes the accept
    /// queue and `dict_size` hints the neighbor table capacity. Binding
    /// port 0 picks a free port, reflected in [`Node::local_id`].
    pub fn init(ip: IpAddr, port: u16, config: Option<&str>) -> Result<Self, Error> {
        let tags = match config {
            Some(raw) => Tags::parse(raw)?,
            None => Tags::default(),
        };
        let backlog = tags.int_default(TAG_TCP_BACKLOG, DEFAULT_BACKLOG);

        let listener = TcpListener::bind(SocketAddr::new(ip, port))?;
        listener.set_nonblocking(true)?;

        // `bind` already listens with the platform default; re-issuing
        // `listen` adjusts the backlog to the configured depth.
        if unsafe { libc::listen(listener.as_raw_fd(), backlog as libc::c_int) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let id = listener.local_addr()?;
        info!(target: "net", "listening on {} (backlog {})", id, backlog);

        Ok(Self {
            id,
            listener,
            neighbors: Dictionary::new(&tags),
            inbox: Inbox::new(),
        })
    }

    /// The local identity: the address this node listens on and advertises
    /// in its hello exchanges.
    pub fn local_id(&self) -> PeerId {
        self.id
    }

    /// Number of neighbors the dictionary currently tracks.
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Queue `payload` for delivery to `to`, connecting first if needed.
    ///
    /// Returns the payload length once the message is subscribed. Fails
    /// with [`Error::SenderBusy`] while an earlier message to the same
    /// peer is still in flight; a failed connect leaves the neighbor slot
    /// clean for retry. One zero-wait scan runs before returning so the
    /// write makes progress without the caller reaching the receive path.
    pub fn send_to(&mut self, to: PeerId, payload: &[u8]) -> Result<usize, Error> {
        let local = self.id;
        let client = self.neighbors.get_or_create(to);

        if client.conn().is_none() {
            client.connect(to, local)?;
        }
        client.write(payload)?;

        self.inbox.scan(
            &mut self.neighbors,
            &self.listener,
            &mut [],
            Some(Duration::ZERO),
        )?;
        Ok(payload.len())
    }

    /// Deliver the next completed inbound message, blocking until one
    /// arrives.
    ///
    /// Returns the sender's advertised address and the owned payload.
    /// Messages complete in FIFO order: within one scan, dictionary
    /// iteration order; across scans, scan order.
    pub fn recv_from(&mut self) -> Result<(PeerId, Vec<u8>), Error> {
        loop {
            if let Some(addr) = self.inbox.next(&mut self.neighbors) {
                if let Some(msg) = self.neighbors.get_mut(&addr).and_then(Client::read) {
                    return Ok((addr, msg));
                }
                continue;
            }
            self.inbox
                .scan(&mut self.neighbors, &self.listener, &mut [], None)?;
        }
    }

    /// Wait until an inbound message is ready or one of `user_fds` becomes
    /// readable.
    ///
    /// Returns `true` promptly when data is already queued, `true` as soon
    /// as a scan queues data or flags a user descriptor, and `false` when
    /// `timeout` passes with neither. `None` waits indefinitely.
    pub fn wait_for_data(
        &mut self,
        timeout: Option<Duration>,
        user_fds: &mut [UserFd],
    ) -> Result<bool, Error> {
        if !self.inbox.is_empty() {
            return Ok(true);
        }

        let deadline = Deadline::new(timeout);
        loop {
            let woke = self.inbox.scan(
                &mut self.neighbors,
                &self.listener,
                user_fds,
                deadline.remaining(),
            )?;

            if woke || !self.inbox.is_empty() {
                return Ok(true);
            }
            if deadline.expired() {
                return Ok(false);
            }
        }
    }

    /// Evict idle, disconnected neighbors. See [`Dictionary::prune_idle`].
    pub fn prune_idle(&mut self) -> usize {
        self.neighbors.prune_idle()
    }
}
