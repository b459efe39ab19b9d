//! oscope Relay
//!
//! Sits between clients and a server: every datagram a client sends to the
//! front socket is forwarded verbatim to the server through a socket
//! dedicated to that client, and every reply the server sends on that
//! socket goes back to the client. Both directions are reported as events
//! so the caller can decode and display them. A route that carries nothing
//! for `route_idle_timeout_ms` is closed and reopened on the client's next
//! datagram.

use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex, Notify};

use super::{ephemeral_for, Datagram, NetworkError, NetworkResult, SocketEvent};
use crate::config::NetworkConfig;

/// Socket connected to the server on one client's behalf
#[derive(Clone)]
struct Route {
    socket: Arc<UdpSocket>,
    /// Poked on every forwarded datagram to hold off idle eviction
    activity: Arc<Notify>,
}

/// Client address -> route. Every task that touches the map goes through
/// this one mutex.
type Routes = Arc<Mutex<HashMap<SocketAddr, Route>>>;

/// Bidirectional UDP relay
pub struct Relay {
    front: Arc<UdpSocket>,
    back_addr: SocketAddr,
    config: NetworkConfig,
    routes: Routes,
    event_tx: mpsc::Sender<SocketEvent>,
    event_rx: Option<mpsc::Receiver<SocketEvent>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Relay {
    /// Bind the front socket; `back_addr` is where traffic is forwarded
    pub async fn bind(
        front_addr: SocketAddr,
        back_addr: SocketAddr,
        config: &NetworkConfig,
    ) -> NetworkResult<Self> {
        let front = UdpSocket::bind(front_addr)
            .await
            .map_err(|e| NetworkError::from_bind(front_addr, e))?;

        tracing::info!("Relaying {} -> {}", front.local_addr()?, back_addr);

        let (event_tx, event_rx) = mpsc::channel(256);

        Ok(Self {
            front: Arc::new(front),
            back_addr,
            config: config.clone(),
            routes: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
        })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.front.local_addr()?)
    }

    pub fn back_addr(&self) -> SocketAddr {
        self.back_addr
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<SocketEvent>> {
        self.event_rx.take()
    }

    /// Number of clients with a forwarding socket
    pub async fn route_count(&self) -> usize {
        self.routes.lock().await.len()
    }

    /// Start relaying
    pub fn start(&mut self) -> NetworkResult<()> {
        if self.shutdown_tx.is_some() {
            return Err(NetworkError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let front = self.front.clone();
        let back_addr = self.back_addr;
        let routes = self.routes.clone();
        let event_tx = self.event_tx.clone();
        let buffer_size = self.config.recv_buffer_size;
        let idle_timeout = match self.config.route_idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                tokio::select! {
                    result = front.recv_from(&mut buf) => {
                        let event = match result {
                            Ok((len, client)) => {
                                let payload = Bytes::copy_from_slice(&buf[..len]);
                                let forward = Forward {
                                    front: &front,
                                    back_addr,
                                    routes: &routes,
                                    event_tx: &event_tx,
                                    shutdown_rx: &shutdown_rx,
                                    buffer_size,
                                    idle_timeout,
                                };
                                if let Err(e) = forward.send(client, &payload).await {
                                    let _ = event_tx
                                        .send(SocketEvent::Error { message: e.to_string() })
                                        .await;
                                }
                                SocketEvent::Datagram(
                                    Datagram::new(client, payload).forwarded_to(back_addr),
                                )
                            }
                            Err(e) => SocketEvent::Error {
                                message: NetworkError::Io(e).to_string(),
                            },
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Relay shutdown requested");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop relaying; forwarding sockets are closed as their tasks exit
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        self.routes.lock().await.clear();
    }
}

/// Borrowed state needed to forward one datagram from the front loop
struct Forward<'a> {
    front: &'a Arc<UdpSocket>,
    back_addr: SocketAddr,
    routes: &'a Routes,
    event_tx: &'a mpsc::Sender<SocketEvent>,
    shutdown_rx: &'a watch::Receiver<bool>,
    buffer_size: usize,
    idle_timeout: Option<Duration>,
}

impl Forward<'_> {
    /// Send `payload` to the server on behalf of `client`, opening a
    /// forwarding socket the first time the client is seen
    async fn send(&self, client: SocketAddr, payload: &[u8]) -> NetworkResult<()> {
        let route = {
            let mut routes = self.routes.lock().await;
            match routes.get(&client) {
                Some(route) => route.clone(),
                None => {
                    let route = Route {
                        socket: Arc::new(self.open_route(client).await?),
                        activity: Arc::new(Notify::new()),
                    };
                    routes.insert(client, route.clone());
                    ReturnPath {
                        route: route.clone(),
                        front: self.front.clone(),
                        client,
                        back_addr: self.back_addr,
                        routes: self.routes.clone(),
                        event_tx: self.event_tx.clone(),
                        shutdown_rx: self.shutdown_rx.clone(),
                        buffer_size: self.buffer_size,
                        idle_timeout: self.idle_timeout,
                    }
                    .spawn();
                    route
                }
            }
        };

        route.activity.notify_one();
        route
            .socket
            .send(payload)
            .await
            .map_err(|e| NetworkError::from_socket(Some(self.back_addr), e))?;
        Ok(())
    }

    async fn open_route(&self, client: SocketAddr) -> NetworkResult<UdpSocket> {
        let local = ephemeral_for(&self.back_addr);
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| NetworkError::from_bind(local, e))?;
        socket
            .connect(self.back_addr)
            .await
            .map_err(|e| NetworkError::from_socket(Some(self.back_addr), e))?;

        tracing::debug!("New route for {} via {}", client, socket.local_addr()?);

        Ok(socket)
    }
}

/// Everything the loop carrying server replies back to one client needs
struct ReturnPath {
    route: Route,
    front: Arc<UdpSocket>,
    client: SocketAddr,
    back_addr: SocketAddr,
    routes: Routes,
    event_tx: mpsc::Sender<SocketEvent>,
    shutdown_rx: watch::Receiver<bool>,
    buffer_size: usize,
    idle_timeout: Option<Duration>,
}

impl ReturnPath {
    fn spawn(mut self) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; self.buffer_size];
            let idle_timeout = self.idle_timeout;
            loop {
                let idle = async move {
                    match idle_timeout {
                        Some(timeout) => tokio::time::sleep(timeout).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                let event = tokio::select! {
                    result = self.route.socket.recv(&mut buf) => match result {
                        Ok(len) => self.reply(Bytes::copy_from_slice(&buf[..len])).await,
                        Err(e) => SocketEvent::Error {
                            message: NetworkError::from_socket(Some(self.back_addr), e)
                                .to_string(),
                        },
                    },
                    _ = self.route.activity.notified() => continue,
                    _ = idle => {
                        self.evict().await;
                        break;
                    }
                    _ = self.shutdown_rx.changed() => break,
                };

                if self.event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn reply(&self, payload: Bytes) -> SocketEvent {
        match self.front.send_to(&payload, self.client).await {
            Ok(_) => SocketEvent::Datagram(
                Datagram::new(self.back_addr, payload).forwarded_to(self.client),
            ),
            Err(e) => SocketEvent::Error {
                message: NetworkError::Io(e).to_string(),
            },
        }
    }

    /// Drop this route from the map unless it was already replaced
    async fn evict(&self) {
        let mut routes = self.routes.lock().await;
        if routes
            .get(&self.client)
            .is_some_and(|route| Arc::ptr_eq(&route.socket, &self.route.socket))
        {
            routes.remove(&self.client);
            tracing::debug!("Closed idle route for {}", self.client);
        }
    }
}
