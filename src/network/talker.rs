//! oscope Talker
//!
//! Connects a UDP socket to a remote port, sends encoded messages to it and
//! reports anything the remote sends back.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{ephemeral_for, NetworkError, NetworkResult, ReceiveTask, SocketEvent};
use crate::config::NetworkConfig;
use crate::protocol::{encode_message, encode_packet, Message, Packet};

/// A socket connected to one remote endpoint
pub struct Talker {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    config: NetworkConfig,
    task: ReceiveTask,
}

impl Talker {
    /// Open an ephemeral local socket and connect it to `remote`
    pub async fn connect(remote: SocketAddr, config: &NetworkConfig) -> NetworkResult<Self> {
        let local = ephemeral_for(&remote);
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| NetworkError::from_bind(local, e))?;

        socket
            .connect(remote)
            .await
            .map_err(|e| NetworkError::from_socket(Some(remote), e))?;

        tracing::info!("Sending from {} to {}", socket.local_addr()?, remote);

        Ok(Self {
            socket: Arc::new(socket),
            remote,
            config: config.clone(),
            task: ReceiveTask::new(),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<SocketEvent>> {
        self.task.take_event_receiver()
    }

    /// Start reporting replies from the remote
    pub fn start(&mut self) -> NetworkResult<()> {
        self.task.start(
            self.socket.clone(),
            self.config.recv_buffer_size,
            Some(self.remote),
        )
    }

    pub async fn stop(&mut self) {
        self.task.stop().await;
    }

    /// Encode and send one message, returning the datagram size
    pub async fn send(&self, message: &Message) -> NetworkResult<usize> {
        let bytes = encode_message(message)?;
        self.send_raw(&bytes).await
    }

    /// Encode and send a message or bundle
    pub async fn send_packet(&self, packet: &Packet) -> NetworkResult<usize> {
        let bytes = encode_packet(packet)?;
        self.send_raw(&bytes).await
    }

    async fn send_raw(&self, bytes: &[u8]) -> NetworkResult<usize> {
        let sent = self
            .socket
            .send(bytes)
            .await
            .map_err(|e| NetworkError::from_socket(Some(self.remote), e))?;
        tracing::debug!("Sent {} bytes to {}", sent, self.remote);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Argument, Bundle, EncodeError, TimeTag};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_send_and_receive_reply() {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let mut talker = Talker::connect(remote_addr, &NetworkConfig::default())
            .await
            .unwrap();
        let mut events = talker.take_event_receiver().unwrap();
        talker.start().unwrap();

        let message = Message::new("/synth/freq", vec![Argument::Float32(440.5), "lead".into()]);
        let sent = talker.send(&message).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, from) = timeout(Duration::from_secs(5), remote.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, sent);
        assert_eq!(from.port(), talker.local_addr().unwrap().port());
        assert_eq!(decode(&buf[..len]).unwrap(), Packet::Message(message));

        remote.send_to(b"/ack\0\0\0\0,\0\0\0", from).await.unwrap();
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let SocketEvent::Datagram(datagram) = event else {
            panic!("Expected a datagram");
        };
        assert_eq!(datagram.from, remote_addr);
        assert_eq!(&datagram.payload[..], b"/ack\0\0\0\0,\0\0\0");
    }

    #[tokio::test]
    async fn test_send_bundle() {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let talker = Talker::connect(remote.local_addr().unwrap(), &NetworkConfig::default())
            .await
            .unwrap();

        let bundle = Packet::Bundle(Bundle::new(
            TimeTag::IMMEDIATE,
            vec![Message::new("/a", vec![Argument::Int32(1)]).into()],
        ));
        talker.send_packet(&bundle).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = timeout(Duration::from_secs(5), remote.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode(&buf[..len]).unwrap(), bundle);
    }

    #[tokio::test]
    async fn test_encode_error_aborts_send() {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let talker = Talker::connect(remote.local_addr().unwrap(), &NetworkConfig::default())
            .await
            .unwrap();

        let err = talker
            .send(&Message::new("no-slash", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Encode(EncodeError::InvalidAddress(_))
        ));
    }
}
