//! RCON client over TCP.
//!
//! Wraps a framed TCP stream in the authenticate-then-execute contract:
//! [`RconClient::authenticate`] drives the auth handshake and latches the
//! per-address flag, [`RconClient::execute`] submits a command and resolves
//! with the (possibly multi-packet, reassembled) response body. Commands
//! fail immediately, without a network round trip, while the address is
//! unauthenticated.
//!
//! A background reader task owns the inbound half of the stream and routes
//! every decoded packet through the frame assembler into the correlator;
//! callers only ever see their own completion handle.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, instrument, warn};

use crate::config::RconConfig;
use crate::core::codec::{
    RconCodec, RconPacket, RconPacketType, REQUEST_ID_MAX, REQUEST_ID_MIN,
};
use crate::error::{constants, AuthFailure, ProtocolError, Result};
use crate::protocol::assembler::RconFrameAssembler;
use crate::protocol::auth::AuthRegistry;
use crate::protocol::correlator::Correlator;
use crate::utils::timeout::with_timeout;

type RconWriter = SplitSink<Framed<TcpStream, RconCodec>, RconPacket>;
type RconReader = SplitStream<Framed<TcpStream, RconCodec>>;

/// Generate a request id from the protocol's 9-digit range.
///
/// The range starts well above [`TERMINATOR_REQUEST_ID`], so a generated id
/// can never collide with the terminator sentinel.
///
/// [`TERMINATOR_REQUEST_ID`]: crate::core::codec::TERMINATOR_REQUEST_ID
pub fn generate_request_id() -> i32 {
    rand::rng().random_range(REQUEST_ID_MIN..=REQUEST_ID_MAX)
}

/// Asynchronous Source RCON client for one server connection.
pub struct RconClient {
    addr: SocketAddr,
    writer: Arc<Mutex<RconWriter>>,
    correlator: Correlator<i32, RconPacket>,
    auth: AuthRegistry,
    config: RconConfig,
    reader: JoinHandle<()>,
}

impl RconClient {
    /// Connect to an RCON server with its own authentication registry.
    pub async fn connect(addr: SocketAddr, config: RconConfig) -> Result<Self> {
        Self::connect_with_registry(addr, config, AuthRegistry::new()).await
    }

    /// Connect using a shared, process-wide authentication registry.
    #[instrument(skip(config, auth))]
    pub async fn connect_with_registry(
        addr: SocketAddr,
        config: RconConfig,
        auth: AuthRegistry,
    ) -> Result<Self> {
        let stream = with_timeout(config.connect_timeout, async {
            Ok(TcpStream::connect(addr).await?)
        })
        .await?;

        let (writer, reader) = Framed::new(stream, RconCodec).split();
        let correlator: Correlator<i32, RconPacket> = Correlator::new();

        let reader = tokio::spawn(read_loop(
            reader,
            correlator.clone(),
            auth.clone(),
            addr,
            config.use_terminator_packets,
        ));

        debug!(%addr, "rcon connection established");
        Ok(Self {
            addr,
            writer: Arc::new(Mutex::new(writer)),
            correlator,
            auth,
            config,
            reader,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated(self.addr)
    }

    /// Run the auth handshake. Resolves `Ok(true)` on success, `Ok(false)`
    /// when the server rejects the password, and an error for transport or
    /// timeout failures.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, password: &str) -> Result<bool> {
        let id = generate_request_id();
        self.auth.begin(self.addr, id)?;
        let handle = self.correlator.register(id)?;

        self.send(RconPacket::auth(id, password)).await?;
        self.correlator
            .arm_timeout(id, self.config.response_timeout);

        match handle.wait().await {
            Ok(_) => Ok(true),
            Err(ProtocolError::NotAuthenticated(AuthFailure::BadPassword)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Execute a command on the server, returning the full response body.
    #[instrument(skip(self))]
    pub async fn execute(&self, command: &str) -> Result<String> {
        self.auth.ensure_authenticated(self.addr)?;

        let id = generate_request_id();
        let handle = self.correlator.register(id)?;

        self.send(RconPacket::exec(id, command)).await?;
        if self.config.use_terminator_packets {
            // the server echoes this probe as a terminator once every
            // response fragment has been flushed
            self.send(RconPacket::terminator_probe()).await?;
        }
        self.correlator
            .arm_timeout(id, self.config.response_timeout);

        handle.wait().await.map(|packet| packet.body)
    }

    async fn send(&self, packet: RconPacket) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(packet).await
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.auth.reset(self.addr);
        self.correlator
            .fail_all(|| ProtocolError::ConnectionClosed);
    }
}

async fn read_loop(
    mut reader: RconReader,
    correlator: Correlator<i32, RconPacket>,
    auth: AuthRegistry,
    addr: SocketAddr,
    use_terminator_packets: bool,
) {
    let mut assembler = RconFrameAssembler::new();

    while let Some(decoded) = reader.next().await {
        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                error!(%addr, error = %e, "rcon stream decode failure");
                break;
            }
        };

        let forwarded = if use_terminator_packets {
            assembler.push(packet)
        } else if packet.packet_type == RconPacketType::ResponseValue && packet.body.is_empty() {
            // no terminator protocol: probe echoes are still noise
            None
        } else {
            Some(packet)
        };

        let Some(packet) = forwarded else { continue };

        if packet.packet_type == RconPacketType::AuthResponse {
            route_auth_reply(&correlator, &auth, addr, packet);
            continue;
        }

        if packet.body.contains(constants::BAD_PASSWORD_MARKER) {
            warn!(%addr, id = packet.id, "server reports invalid credentials mid-session");
            let _ = auth.invalidate(addr);
            correlator.fail(
                &packet.id,
                ProtocolError::NotAuthenticated(AuthFailure::Reauthenticate),
            );
            continue;
        }

        let id = packet.id;
        correlator.complete(&id, packet);
    }

    debug!(%addr, "rcon read loop finished");
    auth.reset(addr);
    correlator.fail_all(|| ProtocolError::ConnectionClosed);
}

fn route_auth_reply(
    correlator: &Correlator<i32, RconPacket>,
    auth: &AuthRegistry,
    addr: SocketAddr,
    packet: RconPacket,
) {
    // capture the handshake id first: a rejection reply carries id -1,
    // which is useless as a correlation key
    let Some(pending_id) = auth.pending_request_id(addr) else {
        warn!(%addr, reply_id = packet.id, "auth reply with no pending handshake");
        return;
    };

    match auth.handle_reply(addr, packet.id) {
        Ok(_) => {
            correlator.complete(&pending_id, packet);
        }
        Err(e) => {
            correlator.fail(&pending_id, e);
        }
    }
}
