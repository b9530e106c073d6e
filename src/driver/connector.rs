//! Network transports used by a voice connection.

use crate::ws::{Result as WsResult, Signalling, WsStream};
use async_trait::async_trait;
use std::{
    io::Result as IoResult,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tokio::net::UdpSocket;
use url::Url;

/// A connected datagram socket carrying voice traffic.
#[async_trait]
pub trait UdpTransport: Send + Sync {
    /// Sends one datagram to the voice server.
    async fn send(&self, buf: &[u8]) -> IoResult<usize>;

    /// Receives one datagram from the voice server, returning its length.
    async fn recv(&self, buf: &mut [u8]) -> IoResult<usize>;
}

#[async_trait]
impl UdpTransport for UdpSocket {
    async fn send(&self, buf: &[u8]) -> IoResult<usize> {
        UdpSocket::send(self, buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> IoResult<usize> {
        UdpSocket::recv(self, buf).await
    }
}

/// Opens the signalling and voice channels for each connection attempt.
///
/// Reconnects call [`connect_ws`] again while keeping the UDP transport;
/// full reconnects call both.
///
/// [`connect_ws`]: Connector::connect_ws
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a signalling channel to the voice gateway at `url`.
    async fn connect_ws(&self, url: Url) -> WsResult<Box<dyn Signalling>>;

    /// Binds a UDP transport connected to `remote`.
    async fn bind_udp(&self, remote: SocketAddr) -> IoResult<Arc<dyn UdpTransport>>;
}

/// [`Connector`] using TLS websockets and tokio's UDP sockets.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect_ws(&self, url: Url) -> WsResult<Box<dyn Signalling>> {
        Ok(Box::new(WsStream::connect(url).await?))
    }

    async fn bind_udp(&self, remote: SocketAddr) -> IoResult<Arc<dyn UdpTransport>> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let udp = UdpSocket::bind(local).await?;
        udp.connect(remote).await?;

        Ok(Arc::new(udp))
    }
}
