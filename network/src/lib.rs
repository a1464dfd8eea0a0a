//! Client-facing TCP layer: framing, crypto sessions, inbound validation and
//! the per-connection worker tasks that shuttle packets between sockets and
//! the world tick.
use std::fmt::Display;

use log::info;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

pub mod compress;
pub mod crypto;
pub mod frame;
pub mod handshake;
pub mod packets;
pub mod session;
pub mod service;

pub use service::{Service, ServiceConfig, SessionCommand, SessionEvent, SessionHandle};
pub use session::SessionId;

const LOG_TARGET: &str = "network-session";

/// Reports address of the peer that we are connected to.
pub trait ConnectionInfo {
    fn peer_address_info(&self) -> String;
}

/// A stream that can be split into a sending and receiving part.
pub trait Splittable: AsyncWrite + AsyncRead + ConnectionInfo + Unpin + Send + 'static {
    type Sender: AsyncWrite + ConnectionInfo + Unpin + Send + 'static;
    type Receiver: AsyncRead + ConnectionInfo + Unpin + Send + 'static;

    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// Accepts new client connections.
#[async_trait::async_trait]
pub trait Listener: Send + 'static {
    type Connection: Splittable;
    type Error: Display + Send;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

impl ConnectionInfo for TcpStream {
    fn peer_address_info(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => format!("unknown address: {}", e),
        }
    }
}

impl ConnectionInfo for OwnedWriteHalf {
    fn peer_address_info(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => e.to_string(),
        }
    }
}

impl ConnectionInfo for OwnedReadHalf {
    fn peer_address_info(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => e.to_string(),
        }
    }
}

impl Splittable for TcpStream {
    type Sender = OwnedWriteHalf;
    type Receiver = OwnedReadHalf;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        let (receiver, sender) = self.into_split();
        (sender, receiver)
    }
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    type Connection = TcpStream;
    type Error = std::io::Error;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let stream = TcpListener::accept(self).await.map(|(stream, _)| stream)?;
        if stream.set_nodelay(true).is_err() {
            info!(target: LOG_TARGET, "stream.set_nodelay(true) failed.");
        }
        Ok(stream)
    }
}

#[cfg(test)]
pub mod mock;
