//! The session service: accepts connections, walks each one through the
//! handshake, then runs a reader half (validation pipeline) and a writer
//! task (encode, compress, encrypt, frame) per connection. The world tick
//! never touches a socket.
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use log::{debug, info, trace, warn};
use tokio::time;

use tmsrv_primitives::AccountId;

use crate::{
    compress::{maybe_compress, DEFAULT_COMPRESSION_THRESHOLD},
    crypto::{CipherKind, CryptoSession, KeyPair},
    frame::{receive_frame, send_frame, FrameError, COMPRESSED_FLAG},
    handshake::{AccountAuthority, AuthRefusal},
    packets::{
        ClientPacket, ErrorNotify, HandshakeAck, KickNotify, LoginResult, Rekey, ServerPacket,
    },
    session::{
        shared_crypto, Inbound, InboundPipeline, LifecycleState, SessionError, SessionId,
        SharedCrypto, SharedState,
    },
    ConnectionInfo, Listener, Splittable, LOG_TARGET,
};

const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(20);
/// Outbound sequence distance at which a staged rekey takes effect; leaves
/// room for the REKEY packet itself under the old key.
const REKEY_SEQUENCE_GAP: u32 = 2;

/// Results of the login handshake sent to the client.
mod login_result {
    pub const OK: u16 = 0;
    pub const BAD_TICKET: u16 = 1;
    pub const BANNED: u16 = 2;
    pub const UNAVAILABLE: u16 = 3;
    pub const BAD_VERSION: u16 = 4;
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub protocol_version: u16,
    pub min_protocol_version: u16,
    pub cipher: CipherKind,
    pub key_rotation_interval: Duration,
    pub compression_threshold: usize,
    pub max_packets_per_second: NonZeroU32,
    pub inbox_capacity: usize,
    /// A connection with no inbound traffic for this long is dropped.
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            protocol_version: 603,
            min_protocol_version: 602,
            cipher: CipherKind::AesCbc,
            key_rotation_interval: Duration::from_secs(300),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_packets_per_second: NonZeroU32::new(100).expect("100 > 0 qed"),
            inbox_capacity: 256,
            idle_timeout: Duration::from_secs(180),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Violations the session layer can detect on its own; the world's security
/// rules decide the escalation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionViolation {
    /// Rate budget exceeded or the bounded inbox overflowed.
    PacketFlood,
    /// Malformed frame, bad checksum or undecodable payload.
    InvalidPacket,
    /// Replayed or reordered sequence numbers.
    StaleSequence,
    /// A packet type that is illegal in the current lifecycle state.
    InvalidState,
}

/// Messages accepted by the per-connection writer task.
#[derive(Debug)]
pub enum SessionCommand {
    Send(ServerPacket),
    /// Send the packet, then close the connection.
    Kick(ServerPacket),
    /// Session-internal: switch to the negotiated cipher. Ordered behind the
    /// plaintext HandshakeAck on the same channel.
    InstallCipher(KeyPair),
    Close,
}

/// The world's handle to one authenticated session.
pub struct SessionHandle {
    pub session: SessionId,
    pub account: AccountId,
    pub address: String,
    /// Validated packets, drained by the world tick. Bounded; overflow is a
    /// flood violation.
    pub inbox: tokio::sync::mpsc::Receiver<ClientPacket>,
    /// Commands for the writer task.
    pub sender: mpsc::UnboundedSender<SessionCommand>,
    /// Lifecycle cell shared with the reader's state gate.
    pub state: SharedState,
}

/// Events surfaced to the world tick.
pub enum SessionEvent {
    Opened(SessionHandle),
    Closed {
        session: SessionId,
    },
    Violation {
        session: SessionId,
        account: Option<AccountId>,
        violation: SessionViolation,
    },
}

/// Accept loop plus per-connection workers.
pub struct Service<A: AccountAuthority, NL: Listener> {
    listener: NL,
    authority: Arc<A>,
    config: ServiceConfig,
    events_for_world: mpsc::UnboundedSender<SessionEvent>,
    next_session: u32,
    live_sessions: Arc<std::sync::atomic::AtomicUsize>,
}

impl<A: AccountAuthority, NL: Listener> Service<A, NL> {
    pub fn new(
        listener: NL,
        authority: Arc<A>,
        config: ServiceConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_for_world, events_from_service) = mpsc::unbounded();
        (
            Self {
                listener,
                authority,
                config,
                events_for_world,
                next_session: 0,
                live_sessions: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            },
            events_from_service,
        )
    }

    /// Run the service until a signal from exit.
    pub async fn run(mut self, mut exit: oneshot::Receiver<()>) {
        let mut status_ticker = time::interval(STATUS_REPORT_INTERVAL);
        loop {
            tokio::select! {
                maybe_stream = self.listener.accept() => match maybe_stream {
                    Ok(stream) => self.spawn_connection(stream),
                    Err(e) => warn!(target: LOG_TARGET, "Listener failed to accept connection: {}", e),
                },
                _ = status_ticker.tick() => {
                    info!(
                        target: LOG_TARGET,
                        "Session service status: {} live sessions.",
                        self.live_sessions.load(std::sync::atomic::Ordering::Relaxed)
                    );
                },
                _ = &mut exit => break,
            }
        }
    }

    fn spawn_connection(&mut self, stream: NL::Connection) {
        self.next_session += 1;
        let session = SessionId(self.next_session);
        let authority = self.authority.clone();
        let config = self.config.clone();
        let events = self.events_for_world.clone();
        let live = self.live_sessions.clone();
        live.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tokio::spawn(async move {
            let address = stream.peer_address_info();
            debug!(target: LOG_TARGET, "Accepted {} from {}.", session, address);
            manage_connection(stream, session, address, authority, config, events.clone()).await;
            live.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            let _ = events.unbounded_send(SessionEvent::Closed { session });
        });
    }
}

struct WriterTask<S> {
    sink: S,
    session: SessionId,
    crypto: SharedCrypto,
    cipher: CipherKind,
    compression_threshold: usize,
    sequence: u32,
}

impl<S: tokio::io::AsyncWrite + Unpin> WriterTask<S> {
    /// Encode, compress when worthwhile, encrypt, frame, write.
    async fn send(&mut self, packet: &ServerPacket) -> Result<(), FrameError> {
        let payload = packet.encode_payload();
        let (body, compressed) = maybe_compress(&payload, self.compression_threshold);
        self.sequence += 1;
        let encrypted = match self.crypto.lock().outbound.encrypt(self.sequence, &body) {
            Ok(encrypted) => encrypted,
            Err(e) => {
                warn!(target: LOG_TARGET, "{}: cannot encrypt outbound packet: {}", self.session, e);
                return Ok(());
            }
        };
        let mut wire = self.sequence.to_le_bytes().to_vec();
        wire.extend_from_slice(&encrypted);
        let mut packet_type = packet.opcode() as u16;
        if compressed {
            packet_type |= COMPRESSED_FLAG;
        }
        send_frame(&mut self.sink, packet_type, self.session.client_id(), &wire).await
    }

    /// Install the negotiated cipher after the plaintext HandshakeAck went
    /// out.
    fn install_cipher(&mut self, pair: KeyPair) {
        let session = CryptoSession::new(self.cipher, pair);
        let mut crypto = self.crypto.lock();
        crypto.inbound = session.clone();
        crypto.outbound = session;
    }

    /// Stage a fresh key pair on the outbound direction and craft the REKEY
    /// announcement.
    fn start_rekey(&mut self) -> Option<ServerPacket> {
        if self.cipher == CipherKind::None {
            return None;
        }
        let pair = KeyPair::random();
        let from_sequence = self.sequence + REKEY_SEQUENCE_GAP;
        let mut crypto = self.crypto.lock();
        if crypto.pending_rekey.is_some() {
            // previous rotation still unacked
            return None;
        }
        crypto.outbound.stage_rotation(pair, from_sequence);
        crypto.pending_rekey = Some(pair);
        Some(ServerPacket::Rekey(Rekey {
            key: pair.key,
            iv: pair.iv,
            from_sequence,
        }))
    }
}

async fn run_writer<S: tokio::io::AsyncWrite + Unpin>(
    mut writer: WriterTask<S>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    rotation_interval: Duration,
) {
    let mut rekey_ticker = time::interval(rotation_interval);
    rekey_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    rekey_ticker.tick().await; // the immediate first tick
    loop {
        tokio::select! {
            maybe_command = commands.next() => match maybe_command {
                Some(SessionCommand::Send(packet)) => {
                    if let Err(e) = writer.send(&packet).await {
                        debug!(target: LOG_TARGET, "{}: write failed: {}", writer.session, e);
                        return;
                    }
                }
                Some(SessionCommand::Kick(packet)) => {
                    let _ = writer.send(&packet).await;
                    return;
                }
                Some(SessionCommand::InstallCipher(pair)) => writer.install_cipher(pair),
                Some(SessionCommand::Close) | None => return,
            },
            _ = rekey_ticker.tick() => {
                if let Some(rekey) = writer.start_rekey() {
                    trace!(target: LOG_TARGET, "{}: rotating session key.", writer.session);
                    if let Err(e) = writer.send(&rekey).await {
                        debug!(target: LOG_TARGET, "{}: write failed: {}", writer.session, e);
                        return;
                    }
                }
            },
        }
    }
}

fn violation_of(error: &SessionError) -> SessionViolation {
    match error {
        SessionError::Flood => SessionViolation::PacketFlood,
        SessionError::StaleSequence { .. } => SessionViolation::StaleSequence,
        SessionError::IllegalState { .. } => SessionViolation::InvalidState,
        _ => SessionViolation::InvalidPacket,
    }
}

async fn manage_connection<S: Splittable, A: AccountAuthority>(
    stream: S,
    session: SessionId,
    address: String,
    authority: Arc<A>,
    config: ServiceConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let (sender_half, mut receiver_half) = stream.split();
    let state = SharedState::new(LifecycleState::Handshake);
    let crypto = shared_crypto(CryptoSession::plaintext());
    let mut pipeline = InboundPipeline::new(
        state.clone(),
        crypto.clone(),
        config.max_packets_per_second,
    );

    let (commands_for_writer, commands) = mpsc::unbounded();
    let writer = WriterTask {
        sink: sender_half,
        session,
        crypto: crypto.clone(),
        cipher: config.cipher,
        compression_threshold: config.compression_threshold,
        sequence: 0,
    };
    let writer_handle = tokio::spawn(run_writer(
        writer,
        commands,
        config.key_rotation_interval,
    ));

    let send = |packet: ServerPacket| {
        let _ = commands_for_writer.unbounded_send(SessionCommand::Send(packet));
    };

    // Handshake phase: version exchange, then ticket verification.
    let account = match handshake_phase(
        &mut receiver_half,
        &mut pipeline,
        session,
        &address,
        authority.as_ref(),
        &config,
        &commands_for_writer,
        &events,
    )
    .await
    {
        Some(account) => account,
        None => {
            state.set(LifecycleState::Closing);
            let _ = commands_for_writer.unbounded_send(SessionCommand::Close);
            let _ = writer_handle.await;
            return;
        }
    };

    state.set(LifecycleState::Authenticated);
    let (inbox_sender, inbox) = tokio::sync::mpsc::channel(config.inbox_capacity);
    let handle = SessionHandle {
        session,
        account,
        address: address.clone(),
        inbox,
        sender: commands_for_writer.clone(),
        state: state.clone(),
    };
    if events.unbounded_send(SessionEvent::Opened(handle)).is_err() {
        warn!(target: LOG_TARGET, "World is dead, dropping {}.", session);
        let _ = commands_for_writer.unbounded_send(SessionCommand::Close);
        let _ = writer_handle.await;
        return;
    }
    info!(
        target: LOG_TARGET,
        "{} authenticated as {} from {}.", session, account, address
    );

    // Main phase: feed the world until the connection dies or is closed.
    loop {
        let frame = match time::timeout(config.idle_timeout, receive_frame(&mut receiver_half)).await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                debug!(target: LOG_TARGET, "{}: read failed: {}", session, e);
                if matches!(e, FrameError::BadSize(_) | FrameError::BadChecksum { .. }) {
                    let _ = events.unbounded_send(SessionEvent::Violation {
                        session,
                        account: Some(account),
                        violation: SessionViolation::InvalidPacket,
                    });
                }
                break;
            }
            Err(_) => {
                info!(target: LOG_TARGET, "{}: idle for {:?}, dropping.", session, config.idle_timeout);
                send(ServerPacket::KickNotify(KickNotify {
                    reason: 1,
                    reserved: 0,
                }));
                break;
            }
        };
        let (header, payload) = frame;
        match pipeline.handle_frame(header, &payload) {
            Ok(Inbound::Packet { packet, .. }) => match packet {
                ClientPacket::RekeyAck(ack) => {
                    if !pipeline.apply_rekey_ack(ack.from_sequence) {
                        trace!(target: LOG_TARGET, "{}: spurious rekey ack.", session);
                    }
                }
                packet => {
                    if inbox_sender.try_send(packet).is_err() {
                        let _ = events.unbounded_send(SessionEvent::Violation {
                            session,
                            account: Some(account),
                            violation: SessionViolation::PacketFlood,
                        });
                    }
                }
            },
            Ok(Inbound::DuplicateDropped) => (),
            Err(e) => {
                debug!(target: LOG_TARGET, "{}: rejected packet: {}", session, e);
                let _ = events.unbounded_send(SessionEvent::Violation {
                    session,
                    account: Some(account),
                    violation: violation_of(&e),
                });
                send(ServerPacket::ErrorNotify(ErrorNotify {
                    code: error_code_of(&e),
                    reserved: 0,
                }));
            }
        }
        if pipeline.state() == LifecycleState::Closing {
            break;
        }
    }

    state.set(LifecycleState::Closing);
    let _ = commands_for_writer.unbounded_send(SessionCommand::Close);
    let _ = writer_handle.await;
}

fn error_code_of(error: &SessionError) -> u16 {
    match error {
        SessionError::Flood => 0x0101,
        SessionError::StaleSequence { .. } => 0x0102,
        SessionError::IllegalState { .. } => 0x0103,
        _ => 0x0100,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handshake_phase<R, A>(
    receiver: &mut R,
    pipeline: &mut InboundPipeline,
    session: SessionId,
    address: &str,
    authority: &A,
    config: &ServiceConfig,
    commands_for_writer: &mpsc::UnboundedSender<SessionCommand>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Option<AccountId>
where
    R: tokio::io::AsyncRead + Unpin,
    A: AccountAuthority,
{
    let send = |packet: ServerPacket| {
        let _ = commands_for_writer.unbounded_send(SessionCommand::Send(packet));
    };
    let deadline = time::Instant::now() + config.handshake_timeout;
    let mut version_ok = false;
    loop {
        let frame = match time::timeout_at(deadline, receive_frame(receiver)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                debug!(target: LOG_TARGET, "{}: handshake read failed: {}", session, e);
                return None;
            }
            Err(_) => {
                debug!(target: LOG_TARGET, "{}: handshake timed out.", session);
                return None;
            }
        };
        let (header, payload) = frame;
        let packet = match pipeline.handle_frame(header, &payload) {
            Ok(Inbound::Packet { packet, .. }) => packet,
            Ok(Inbound::DuplicateDropped) => continue,
            Err(e) => {
                debug!(target: LOG_TARGET, "{}: bad handshake packet: {}", session, e);
                let _ = events.unbounded_send(SessionEvent::Violation {
                    session,
                    account: None,
                    violation: violation_of(&e),
                });
                return None;
            }
        };
        match packet {
            ClientPacket::Handshake(handshake) => {
                if handshake.protocol_version < config.min_protocol_version {
                    send(ServerPacket::LoginResult(LoginResult {
                        result: login_result::BAD_VERSION,
                        reserved: 0,
                    }));
                    return None;
                }
                let pair = KeyPair::random();
                send(ServerPacket::HandshakeAck(HandshakeAck {
                    server_version: config.protocol_version,
                    cipher: config.cipher as u8,
                    reserved: 0,
                    key: pair.key,
                    iv: pair.iv,
                }));
                // ordered behind the plaintext ack on the writer channel
                let _ = commands_for_writer.unbounded_send(SessionCommand::InstallCipher(pair));
                version_ok = true;
            }
            ClientPacket::AccountLogin(login) => {
                if !version_ok {
                    debug!(target: LOG_TARGET, "{}: login before version exchange.", session);
                    return None;
                }
                let account_name = WireNameExt::to_string(&login.account);
                match authority
                    .verify_ticket(&account_name, login.ticket, address)
                    .await
                {
                    Ok(account) => {
                        send(ServerPacket::LoginResult(LoginResult {
                            result: login_result::OK,
                            reserved: 0,
                        }));
                        return Some(account);
                    }
                    Err(refusal) => {
                        info!(
                            target: LOG_TARGET,
                            "{}: login refused for {}: {}", session, account_name, refusal
                        );
                        send(ServerPacket::LoginResult(LoginResult {
                            result: match refusal {
                                AuthRefusal::BadTicket => login_result::BAD_TICKET,
                                AuthRefusal::Banned => login_result::BANNED,
                                AuthRefusal::Unavailable => login_result::UNAVAILABLE,
                            },
                            reserved: 0,
                        }));
                        return None;
                    }
                }
            }
            ClientPacket::KeepAlive(_) => continue,
            unexpected => {
                debug!(
                    target: LOG_TARGET,
                    "{}: unexpected {:?} during handshake.", session, unexpected.opcode()
                );
                return None;
            }
        }
    }
}

/// Local helper so the service module does not depend on how names are
/// rendered elsewhere.
trait WireNameExt {
    fn to_string(&self) -> String;
}

impl WireNameExt for tmsrv_primitives::WireName {
    fn to_string(&self) -> String {
        self.as_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use codec::Encode;
    use futures::channel::oneshot;

    use super::*;
    use crate::{
        frame::{checksum, FrameHeader, HEADER_SIZE},
        mock::{connected_pair, MockAuthority, MockListener},
        packets::{AccountLogin, Handshake, KeepAlive, Move, ServerOpcode},
        session::SessionId,
    };
    use tmsrv_primitives::WireName;

    struct ClientEnd {
        stream: tokio::io::DuplexStream,
        crypto: CryptoSession,
        sequence: u32,
    }

    impl ClientEnd {
        fn new(stream: tokio::io::DuplexStream) -> Self {
            Self {
                stream,
                crypto: CryptoSession::plaintext(),
                sequence: 0,
            }
        }

        async fn send(&mut self, packet_type: u16, body: &[u8]) {
            self.sequence += 1;
            let encrypted = self
                .crypto
                .encrypt(self.sequence, body)
                .expect("client should encrypt");
            let mut payload = self.sequence.to_le_bytes().to_vec();
            payload.extend_from_slice(&encrypted);
            send_frame(&mut self.stream, packet_type, 0, &payload)
                .await
                .expect("client frame should send");
        }

        async fn receive(&mut self) -> (FrameHeader, Vec<u8>) {
            let (header, payload) = receive_frame(&mut self.stream)
                .await
                .expect("client should receive");
            assert!(payload.len() >= 4);
            let sequence = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let body = self
                .crypto
                .decrypt(sequence, &payload[4..])
                .expect("client should decrypt");
            (header, body)
        }
    }

    async fn authenticate(client: &mut ClientEnd) {
        client
            .send(
                crate::packets::ClientOpcode::Handshake as u16,
                &Handshake {
                    protocol_version: 603,
                    client_build: 1,
                }
                .encode(),
            )
            .await;
        let (header, body) = client.receive().await;
        assert_eq!(header.bare_type(), ServerOpcode::HandshakeAck as u16);
        let ack = <HandshakeAck as codec::Decode>::decode(&mut &body[..]).expect("ack decodes");
        assert_eq!(ack.cipher, CipherKind::AesCbc as u8);
        client.crypto = CryptoSession::new(
            CipherKind::AesCbc,
            KeyPair {
                key: ack.key,
                iv: ack.iv,
            },
        );
        client
            .send(
                crate::packets::ClientOpcode::AccountLogin as u16,
                &AccountLogin {
                    account: WireName::from_str("tester"),
                    ticket: MockAuthority::VALID_TICKET,
                    cipher: 0,
                    reserved: [0; 3],
                }
                .encode(),
            )
            .await;
        let (header, body) = client.receive().await;
        assert_eq!(header.bare_type(), ServerOpcode::LoginResult as u16);
        let result =
            <LoginResult as codec::Decode>::decode(&mut &body[..]).expect("result decodes");
        assert_eq!(result.result, login_result::OK);
    }

    #[tokio::test]
    async fn handshake_then_packets_reach_the_inbox() {
        let (listener, connections) = MockListener::new();
        let (service, mut events) =
            Service::new(listener, Arc::new(MockAuthority), ServiceConfig::default());
        let (_exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(service.run(exit_rx));

        let (client_side, server_side) = connected_pair(4096);
        connections
            .unbounded_send(server_side)
            .expect("listener should accept");
        let mut client = ClientEnd::new(client_side);
        authenticate(&mut client).await;

        let mut handle = match events.next().await.expect("service should emit") {
            SessionEvent::Opened(handle) => handle,
            _ => panic!("expected an Opened event"),
        };
        assert_eq!(handle.account, MockAuthority::ACCOUNT);
        handle.state.set(LifecycleState::InWorld);

        client
            .send(
                crate::packets::ClientOpcode::Move as u16,
                &Move {
                    x: 10,
                    y: 20,
                    running: 1,
                    reserved: [0; 3],
                }
                .encode(),
            )
            .await;
        let packet = handle.inbox.recv().await.expect("inbox should yield");
        assert_eq!(
            packet,
            ClientPacket::Move(Move {
                x: 10,
                y: 20,
                running: 1,
                reserved: [0; 3],
            })
        );
    }

    #[tokio::test]
    async fn bad_ticket_is_refused() {
        let (listener, connections) = MockListener::new();
        let (service, mut events) =
            Service::new(listener, Arc::new(MockAuthority), ServiceConfig::default());
        let (_exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(service.run(exit_rx));

        let (client_side, server_side) = connected_pair(4096);
        connections
            .unbounded_send(server_side)
            .expect("listener should accept");
        let mut client = ClientEnd::new(client_side);
        client
            .send(
                crate::packets::ClientOpcode::Handshake as u16,
                &Handshake {
                    protocol_version: 603,
                    client_build: 1,
                }
                .encode(),
            )
            .await;
        let (_, body) = client.receive().await;
        let ack = <HandshakeAck as codec::Decode>::decode(&mut &body[..]).expect("ack decodes");
        client.crypto = CryptoSession::new(
            CipherKind::AesCbc,
            KeyPair {
                key: ack.key,
                iv: ack.iv,
            },
        );
        client
            .send(
                crate::packets::ClientOpcode::AccountLogin as u16,
                &AccountLogin {
                    account: WireName::from_str("tester"),
                    ticket: [0xAA; 16],
                    cipher: 0,
                    reserved: [0; 3],
                }
                .encode(),
            )
            .await;
        let (header, body) = client.receive().await;
        assert_eq!(header.bare_type(), ServerOpcode::LoginResult as u16);
        let result =
            <LoginResult as codec::Decode>::decode(&mut &body[..]).expect("result decodes");
        assert_eq!(result.result, login_result::BAD_TICKET);
        match events.next().await {
            Some(SessionEvent::Closed { .. }) => (),
            other => panic!("expected Closed, got {:?}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn pre_auth_world_packet_is_a_violation() {
        let (listener, connections) = MockListener::new();
        let (service, mut events) =
            Service::new(listener, Arc::new(MockAuthority), ServiceConfig::default());
        let (_exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(service.run(exit_rx));

        let (client_side, server_side) = connected_pair(4096);
        connections
            .unbounded_send(server_side)
            .expect("listener should accept");
        let mut client = ClientEnd::new(client_side);
        client
            .send(
                crate::packets::ClientOpcode::Move as u16,
                &Move::default().encode(),
            )
            .await;
        match events.next().await.expect("service should emit") {
            SessionEvent::Violation {
                violation: SessionViolation::InvalidState,
                account: None,
                ..
            } => (),
            _ => panic!("expected an InvalidState violation"),
        }
    }

    #[test]
    fn session_id_maps_to_client_id() {
        assert_eq!(SessionId(0x0001_0002).client_id(), 2);
    }

    #[test]
    fn keepalive_is_minimum_sized() {
        let body = KeepAlive { client_tick: 0 }.encode();
        let payload_len = 4 + body.len();
        assert_eq!(HEADER_SIZE + payload_len, crate::frame::MIN_PACKET_SIZE + 4);
        let _ = checksum(&body);
    }
}
