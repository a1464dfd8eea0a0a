//! Mocks for exercising the session service without sockets.
//!
//! An in-memory connection is just a [DuplexStream]; tokio already knows
//! how to buffer both directions and split one into halves, so the mock
//! layer only supplies the wiring and the trait glue.
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

use tmsrv_primitives::AccountId;

use crate::{
    handshake::{AccountAuthority, AuthRefusal},
    packets::TICKET_LEN,
    ConnectionInfo, Listener, Splittable,
};

/// Links a client end and a server end back to back. Either side works as
/// a [Splittable] connection; tests usually drive the client end directly
/// with the frame codec and hand the server end to a [MockListener].
pub fn connected_pair(max_buf_size: usize) -> (DuplexStream, DuplexStream) {
    duplex(max_buf_size)
}

impl ConnectionInfo for DuplexStream {
    fn peer_address_info(&self) -> String {
        String::from("mock-peer")
    }
}

impl ConnectionInfo for ReadHalf<DuplexStream> {
    fn peer_address_info(&self) -> String {
        String::from("mock-peer (read half)")
    }
}

impl ConnectionInfo for WriteHalf<DuplexStream> {
    fn peer_address_info(&self) -> String {
        String::from("mock-peer (write half)")
    }
}

impl Splittable for DuplexStream {
    type Sender = WriteHalf<DuplexStream>;
    type Receiver = ReadHalf<DuplexStream>;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        let (receiver, sender) = tokio::io::split(self);
        (sender, receiver)
    }
}

/// Hands out connections pushed in through a channel.
pub struct MockListener {
    connections: UnboundedReceiver<DuplexStream>,
}

impl MockListener {
    pub fn new() -> (Self, UnboundedSender<DuplexStream>) {
        let (sender, connections) = mpsc::unbounded();
        (Self { connections }, sender)
    }
}

#[async_trait::async_trait]
impl Listener for MockListener {
    type Connection = DuplexStream;
    type Error = std::io::Error;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.connections.next().await.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock listener closed")
        })
    }
}

/// Accepts exactly one ticket for one account.
pub struct MockAuthority;

impl MockAuthority {
    pub const VALID_TICKET: [u8; TICKET_LEN] = [7; TICKET_LEN];
    pub const ACCOUNT: AccountId = AccountId(77);
}

#[async_trait::async_trait]
impl AccountAuthority for MockAuthority {
    async fn verify_ticket(
        &self,
        _account: &str,
        ticket: [u8; TICKET_LEN],
        _address: &str,
    ) -> Result<AccountId, AuthRefusal> {
        if ticket == Self::VALID_TICKET {
            Ok(Self::ACCOUNT)
        } else {
            Err(AuthRefusal::BadTicket)
        }
    }
}
