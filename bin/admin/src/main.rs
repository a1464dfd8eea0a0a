//! Admin CLI: opens one authenticated session, runs a single admin
//! command and exits with the command's result code.
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use codec::{Decode, Encode};
use log::debug;
use tokio::net::TcpStream;

use network_session::{
    crypto::{CipherKind, CryptoSession, KeyPair},
    frame::{receive_frame, send_frame, FrameHeader},
    packets::{
        AccountLogin, AdminCommand, AdminResult, ClientOpcode, Handshake, HandshakeAck,
        LoginResult, ServerOpcode, CHAT_TEXT_LEN, TICKET_LEN,
    },
};
use tmsrv_primitives::WireName;

#[derive(Parser, Debug)]
#[command(name = "tmadmin", about = "Run one admin command against a tmsrv")]
struct Config {
    /// Server address, host:port.
    #[arg(long, default_value = "127.0.0.1:8281")]
    server: String,
    /// Admin account name.
    #[arg(long)]
    account: String,
    /// Login ticket, 16 bytes of hex. Any non-zero value against a dev
    /// server.
    #[arg(long, default_value = "01010101010101010101010101010101")]
    ticket: String,
    /// Seconds to wait for each response.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    /// The command and its arguments, e.g. `broadcast maintenance in 5`.
    command: Vec<String>,
}

struct Connection {
    stream: TcpStream,
    crypto: CryptoSession,
    sequence: u32,
    timeout: Duration,
}

impl Connection {
    async fn send(&mut self, opcode: ClientOpcode, body: &[u8]) -> anyhow::Result<()> {
        self.sequence += 1;
        let encrypted = self
            .crypto
            .encrypt(self.sequence, body)
            .context("encrypting request")?;
        let mut payload = self.sequence.to_le_bytes().to_vec();
        payload.extend_from_slice(&encrypted);
        send_frame(&mut self.stream, opcode as u16, 0, &payload)
            .await
            .context("sending request")?;
        Ok(())
    }

    async fn receive(&mut self) -> anyhow::Result<(FrameHeader, Vec<u8>)> {
        let (header, payload) = tokio::time::timeout(self.timeout, receive_frame(&mut self.stream))
            .await
            .context("timed out waiting for the server")?
            .context("receiving response")?;
        if payload.len() < 4 {
            bail!("short frame from server");
        }
        let sequence = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let body = self
            .crypto
            .decrypt(sequence, &payload[4..])
            .context("decrypting response")?;
        Ok((header, body))
    }

    /// Reads frames until one of the wanted opcode arrives; unrelated
    /// notifications are logged and skipped.
    async fn receive_expecting(&mut self, wanted: ServerOpcode) -> anyhow::Result<Vec<u8>> {
        for _ in 0..32 {
            let (header, body) = self.receive().await?;
            if header.bare_type() == wanted as u16 {
                return Ok(body);
            }
            debug!("skipping packet type {:#06x}", header.bare_type());
        }
        bail!("server never sent {:?}", wanted)
    }
}

fn parse_ticket(raw: &str) -> anyhow::Result<[u8; TICKET_LEN]> {
    let bytes = hex::decode(raw).context("ticket must be hex")?;
    if bytes.len() != TICKET_LEN {
        bail!("ticket must be {} bytes of hex", TICKET_LEN);
    }
    let mut ticket = [0u8; TICKET_LEN];
    ticket.copy_from_slice(&bytes);
    Ok(ticket)
}

async fn run(config: Config) -> anyhow::Result<u16> {
    let command_line = config.command.join(" ");
    if command_line.is_empty() {
        bail!("no command given");
    }
    if command_line.len() > CHAT_TEXT_LEN {
        bail!("command longer than {} bytes", CHAT_TEXT_LEN);
    }
    let ticket = parse_ticket(&config.ticket)?;

    let stream = TcpStream::connect(&config.server)
        .await
        .with_context(|| format!("connecting to {}", config.server))?;
    let mut connection = Connection {
        stream,
        crypto: CryptoSession::plaintext(),
        sequence: 0,
        timeout: Duration::from_secs(config.timeout_secs),
    };

    // version exchange, then switch to the announced cipher
    connection
        .send(
            ClientOpcode::Handshake,
            &Handshake {
                protocol_version: 603,
                client_build: 0,
            }
            .encode(),
        )
        .await?;
    let body = connection.receive_expecting(ServerOpcode::HandshakeAck).await?;
    let ack = HandshakeAck::decode(&mut &body[..]).context("decoding handshake ack")?;
    if ack.cipher == CipherKind::AesCbc as u8 {
        connection.crypto = CryptoSession::new(
            CipherKind::AesCbc,
            KeyPair {
                key: ack.key,
                iv: ack.iv,
            },
        );
    }

    connection
        .send(
            ClientOpcode::AccountLogin,
            &AccountLogin {
                account: WireName::from_str(&config.account),
                ticket,
                cipher: 0,
                reserved: [0; 3],
            }
            .encode(),
        )
        .await?;
    let body = connection.receive_expecting(ServerOpcode::LoginResult).await?;
    let login = LoginResult::decode(&mut &body[..]).context("decoding login result")?;
    if login.result != 0 {
        bail!("login refused with code {}", login.result);
    }

    let mut request = AdminCommand::default();
    let bytes = command_line.as_bytes();
    request.text[..bytes.len()].copy_from_slice(bytes);
    connection
        .send(ClientOpcode::AdminCommand, &request.encode())
        .await?;
    let body = connection.receive_expecting(ServerOpcode::AdminResult).await?;
    let result = AdminResult::decode(&mut &body[..]).context("decoding admin result")?;
    let end = result
        .text
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(result.text.len());
    println!("{}", String::from_utf8_lossy(&result.text[..end]));
    Ok(result.code)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();
    let code = run(config).await?;
    if code != 0 {
        std::process::exit(i32::from(code.min(125)));
    }
    Ok(())
}
