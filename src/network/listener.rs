//! oscope Listener
//!
//! Binds a local UDP port and reports every datagram that arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{NetworkError, NetworkResult, ReceiveTask, SocketEvent};
use crate::config::NetworkConfig;

/// Receives datagrams on a bound local port
pub struct Listener {
    socket: Arc<UdpSocket>,
    config: NetworkConfig,
    task: ReceiveTask,
}

impl Listener {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr, config: &NetworkConfig) -> NetworkResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| NetworkError::from_bind(addr, e))?;

        tracing::info!("Listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            config: config.clone(),
            task: ReceiveTask::new(),
        })
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<SocketEvent>> {
        self.task.take_event_receiver()
    }

    /// Start receiving
    pub fn start(&mut self) -> NetworkResult<()> {
        self.task
            .start(self.socket.clone(), self.config.recv_buffer_size, None)
    }

    /// Stop receiving
    pub async fn stop(&mut self) {
        self.task.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
