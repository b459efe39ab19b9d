//! Network module - Handles UDP sockets for sending and receiving OSC
//!
//! Provides:
//! - Listener for printing whatever arrives on a local port
//! - Talker for sending typed messages to a remote port
//! - Relay for snooping on traffic between two endpoints

mod listener;
mod relay;
mod talker;

pub use listener::*;
pub use relay::*;
pub use talker::*;

use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::protocol::EncodeError;

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Unrecognized address: \"{0}\" (expected <port>, <host>:<port> or [<ipv6>]:<port>)")]
    InvalidAddress(String),

    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Another program is already listening to the UDP socket {0}")]
    AddressInUse(SocketAddr),

    #[error("The address {0} is not available on this machine")]
    AddressNotAvailable(SocketAddr),

    #[error("Could not connect to the remote port {0}")]
    ConnectionRefused(SocketAddr),

    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Socket task already running")]
    AlreadyRunning,
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl NetworkError {
    /// Classify a failure to bind a local socket
    pub fn from_bind(addr: SocketAddr, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => NetworkError::AddressInUse(addr),
            io::ErrorKind::AddrNotAvailable => NetworkError::AddressNotAvailable(addr),
            _ => NetworkError::BindFailed { addr, source: err },
        }
    }

    /// Classify a send/receive failure on a socket talking to `remote`
    pub fn from_socket(remote: Option<SocketAddr>, err: io::Error) -> Self {
        match (err.kind(), remote) {
            (io::ErrorKind::ConnectionRefused, Some(addr)) => NetworkError::ConnectionRefused(addr),
            _ => NetworkError::Io(err),
        }
    }
}

/// Address family requested by an address argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A parsed `port`, `host:port` or `[ipv6]:port` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host part; `None` when only a port was given
    pub host: Option<String>,
    pub port: u16,
    pub family: Family,
}

impl FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidAddress(input.to_string());

        let (host, port, family) = if let Some(rest) = input.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            if !host.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.') {
                return Err(invalid());
            }
            (Some(host), port, Family::V6)
        } else if let Some((host, port)) = input.rsplit_once(':') {
            let host_ok = host
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
            if !host_ok {
                return Err(invalid());
            }
            (Some(host), port, Family::V4)
        } else {
            (None, input, Family::V4)
        };

        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Endpoint {
            host: host.filter(|h| !h.is_empty()).map(str::to_string),
            port,
            family,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.family) {
            (Some(host), Family::V6) => write!(f, "[{}]:{}", host, self.port),
            (Some(host), Family::V4) => write!(f, "{}:{}", host, self.port),
            (None, _) => write!(f, "{}", self.port),
        }
    }
}

impl Endpoint {
    /// Resolve to a socket address, using `default_host` when only a port
    /// was given
    pub async fn resolve(&self, default_host: &str) -> NetworkResult<SocketAddr> {
        match (&self.host, self.family) {
            (Some(host), _) => resolve_host(host, self.port, self.family).await,
            (None, Family::V6) => {
                // Empty brackets: pick the IPv6 twin of the default host
                let ip = match default_host.parse::<IpAddr>() {
                    Ok(ip) if ip.is_loopback() => Ipv6Addr::LOCALHOST,
                    _ => Ipv6Addr::UNSPECIFIED,
                };
                Ok(SocketAddr::new(IpAddr::V6(ip), self.port))
            }
            (None, Family::V4) => resolve_host(default_host, self.port, Family::V4).await,
        }
    }
}

/// Resolve a hostname to a socket address, preferring the requested family
pub async fn resolve_host(host: &str, port: u16, family: Family) -> NetworkResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| NetworkError::Resolve(host.to_string()))?
        .collect();

    let wanted = |addr: &&SocketAddr| match family {
        Family::V4 => addr.is_ipv4(),
        Family::V6 => addr.is_ipv6(),
    };

    addrs
        .iter()
        .find(wanted)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| NetworkError::Resolve(host.to_string()))
}

/// The unspecified address of the same family as `addr`, on an ephemeral port
pub fn ephemeral_for(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// One received datagram, undecoded
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Who sent it
    pub from: SocketAddr,
    /// Where a relay forwarded it, if anywhere
    pub to: Option<SocketAddr>,
    pub payload: Bytes,
    pub received_at: SystemTime,
}

impl Datagram {
    pub fn new(from: SocketAddr, payload: Bytes) -> Self {
        Self {
            from,
            to: None,
            payload,
            received_at: SystemTime::now(),
        }
    }

    pub fn forwarded_to(mut self, to: SocketAddr) -> Self {
        self.to = Some(to);
        self
    }
}

/// Events emitted by socket tasks
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A datagram arrived
    Datagram(Datagram),
    /// A socket operation failed; the task keeps running
    Error { message: String },
}

/// Receive task shared by the listener and the talker
///
/// Owns the event channel and the shutdown signal for one socket's
/// receive loop.
pub(crate) struct ReceiveTask {
    event_tx: mpsc::Sender<SocketEvent>,
    event_rx: Option<mpsc::Receiver<SocketEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ReceiveTask {
    pub(crate) fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
        }
    }

    pub(crate) fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<SocketEvent>> {
        self.event_rx.take()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Spawn the receive loop for `socket`. `remote` names the connected
    /// peer, if any, so refused connections can be reported against it.
    pub(crate) fn start(
        &mut self,
        socket: Arc<UdpSocket>,
        buffer_size: usize,
        remote: Option<SocketAddr>,
    ) -> NetworkResult<()> {
        if self.is_running() {
            return Err(NetworkError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                let event = tokio::select! {
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, peer)) => {
                            tracing::debug!("Received {} bytes from {}", len, peer);
                            SocketEvent::Datagram(Datagram::new(
                                peer,
                                Bytes::copy_from_slice(&buf[..len]),
                            ))
                        }
                        Err(e) => SocketEvent::Error {
                            message: NetworkError::from_socket(remote, e).to_string(),
                        },
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Receive loop shutdown requested");
                        break;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    pub(crate) async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}
