use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

use siptx_sip_core::{parse_message, Message};

use crate::error::{Error, Result};
use crate::transport::{ConnectionId, Transport, TransportEvent, TransportProtocol};

// Largest payload an IPv4 UDP datagram can carry
const MAX_UDP_PACKET_SIZE: usize = 65_507;
const UDP_BUFFER_SIZE: usize = 65_535;
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Binds a UDP socket and starts the receive loop.
    ///
    /// Parsed messages are delivered on the returned receiver.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        transport.spawn_receive_loop(local_addr);

        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self, local_addr: SocketAddr) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; UDP_BUFFER_SIZE];

            while !inner.closed.load(Ordering::Acquire) {
                let received = tokio::select! {
                    r = inner.socket.recv_from(&mut buffer) => r,
                    _ = inner.shutdown.notified() => break,
                };

                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        if inner.closed.load(Ordering::Acquire) {
                            break;
                        }
                        error!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error { error: format!("Error receiving packet: {}", e) })
                            .await;
                        continue;
                    }
                };

                let packet = Bytes::copy_from_slice(&buffer[..len]);
                trace!("Received {} bytes from {}", len, src);

                match parse_message(&packet) {
                    Ok(message) => {
                        debug!("Received SIP message from {}", src);
                        let event = TransportEvent::MessageReceived {
                            message,
                            source: src,
                            destination: local_addr,
                            connection: None,
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error parsing SIP message from {}: {}", src, e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error { error: format!("Error parsing SIP message: {}", e) })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.socket.local_addr().map_err(Error::from)
    }

    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Udp
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<Option<ConnectionId>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        if bytes.len() > MAX_UDP_PACKET_SIZE {
            return Err(Error::PacketTooLarge(bytes.len()));
        }

        self.inner
            .socket
            .send_to(&bytes, destination)
            .await
            .map_err(|e| Error::SendFailed(destination, e))?;
        debug!(
            "Sent {} to {}",
            match &message {
                Message::Request(req) => req.method.to_string(),
                Message::Response(resp) => resp.status.to_string(),
            },
            destination
        );

        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.shutdown.notify_one();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.socket.local_addr() {
            Ok(addr) => write!(f, "UdpTransport({})", addr),
            Err(_) => write!(f, "UdpTransport(<error>)"),
        }
    }
}
