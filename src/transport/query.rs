//! Source Query client over UDP.
//!
//! One [`QueryClient`] multiplexes exchanges with any number of servers over
//! a single shared socket. A background reader task drives the full decode
//! pipeline for every inbound datagram (header classification, split-packet
//! reassembly, the challenge handshake, typed payload decode) and resolves
//! the originating exchange through the correlator. Callers see exactly one
//! completion per request; challenge round trips happen underneath.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::config::{QueryConfig, MAX_DATAGRAM_SIZE};
use crate::core::packet::{
    decode_single, Datagram, Decoded, PlayerEntry, QueryRequest, QueryResponse, ServerInfo,
    ServerRule,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::challenge::{ChallengeExchange, ChallengeOutcome};
use crate::protocol::correlator::{CompletionHandle, Correlator};
use crate::protocol::split::SplitPacketAssembler;

type ExchangeMap = Arc<RwLock<HashMap<SocketAddr, ChallengeExchange>>>;

/// Asynchronous Source Query client.
pub struct QueryClient {
    socket: Arc<UdpSocket>,
    correlator: Correlator<SocketAddr, QueryResponse>,
    assembler: SplitPacketAssembler,
    exchanges: ExchangeMap,
    config: QueryConfig,
    reader: JoinHandle<()>,
}

impl QueryClient {
    /// Bind an ephemeral local socket and start the reader task.
    pub async fn bind(config: QueryConfig) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let correlator: Correlator<SocketAddr, QueryResponse> = Correlator::new();
        let assembler =
            SplitPacketAssembler::with_settings(config.split_ttl, config.report_incomplete_splits);
        let exchanges: ExchangeMap = Arc::new(RwLock::new(HashMap::new()));

        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            correlator.clone(),
            assembler.clone(),
            Arc::clone(&exchanges),
            config.clone(),
        ));

        Ok(Self {
            socket,
            correlator,
            assembler,
            exchanges,
            config,
            reader,
        })
    }

    /// Query general server information (A2S_INFO).
    #[instrument(skip(self))]
    pub async fn info(&self, addr: SocketAddr) -> Result<ServerInfo> {
        match self.exchange(addr, QueryRequest::info()).await? {
            QueryResponse::Info(info) => Ok(info),
            other => Err(unexpected(&other, "info")),
        }
    }

    /// Query the current player list (A2S_PLAYER).
    #[instrument(skip(self))]
    pub async fn players(&self, addr: SocketAddr) -> Result<Vec<PlayerEntry>> {
        match self.exchange(addr, QueryRequest::players()).await? {
            QueryResponse::Players(players) => Ok(players),
            other => Err(unexpected(&other, "players")),
        }
    }

    /// Query server rules (A2S_RULES).
    #[instrument(skip(self))]
    pub async fn rules(&self, addr: SocketAddr) -> Result<Vec<ServerRule>> {
        match self.exchange(addr, QueryRequest::rules()).await? {
            QueryResponse::Rules(rules) => Ok(rules),
            other => Err(unexpected(&other, "rules")),
        }
    }

    /// Submit a typed request; the handle resolves once, with the final
    /// response or the failure that ended the exchange.
    pub async fn submit(
        &self,
        addr: SocketAddr,
        request: QueryRequest,
    ) -> Result<CompletionHandle<QueryResponse>> {
        // attach the exchange before the write so an immediate response
        // always finds its request
        {
            let mut exchanges = self
                .exchanges
                .write()
                .map_err(|_| ProtocolError::Custom("exchange map lock poisoned".to_string()))?;
            exchanges.insert(
                addr,
                ChallengeExchange::new(
                    request.clone(),
                    self.config.auto_resubmit_challenge,
                    self.config.max_challenge_resubmits,
                ),
            );
        }
        let handle = self.correlator.register(addr)?;

        self.socket.send_to(&request.encode(), addr).await?;
        self.correlator.arm_timeout(addr, self.config.read_timeout);

        Ok(handle)
    }

    async fn exchange(&self, addr: SocketAddr, request: QueryRequest) -> Result<QueryResponse> {
        let handle = self.submit(addr, request).await?;
        match handle.wait().await {
            Ok(response) => Ok(response),
            Err(e) => {
                // the exchange is dead; its reassembly state must not linger
                self.remove_exchange(addr);
                match self.assembler.purge(addr) {
                    Err(report @ ProtocolError::IncompleteSplitPacket { .. }) => Err(report),
                    _ => Err(e),
                }
            }
        }
    }

    fn remove_exchange(&self, addr: SocketAddr) {
        if let Ok(mut exchanges) = self.exchanges.write() {
            exchanges.remove(&addr);
        }
    }

    /// Number of exchanges still awaiting completion.
    pub fn pending_exchanges(&self) -> usize {
        self.correlator.pending_len()
    }

    /// Number of split containers still awaiting fragments.
    pub fn pending_splits(&self) -> usize {
        self.assembler.pending_len()
    }
}

impl Drop for QueryClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.correlator
            .fail_all(|| ProtocolError::ConnectionClosed);
    }
}

fn unexpected(actual: &QueryResponse, expected: &'static str) -> ProtocolError {
    ProtocolError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    correlator: Correlator<SocketAddr, QueryResponse>,
    assembler: SplitPacketAssembler,
    exchanges: ExchangeMap,
    config: QueryConfig,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "query socket receive failure");
                correlator.fail_all(|| ProtocolError::ConnectionClosed);
                return;
            }
        };

        let datagram = Bytes::copy_from_slice(&buf[..len]);
        if let Err(e) = process_datagram(
            &socket,
            &correlator,
            &assembler,
            &exchanges,
            &config,
            sender,
            datagram,
        )
        .await
        {
            // decode/reassembly failures belong to the sender's exchange;
            // with none pending there is nobody left to tell
            if !correlator.fail(&sender, e) {
                debug!(%sender, "dropped failure for unmatched datagram");
            }
            if let Ok(mut map) = exchanges.write() {
                map.remove(&sender);
            }
        }

        assembler.purge_expired();
    }
}

async fn process_datagram(
    socket: &UdpSocket,
    correlator: &Correlator<SocketAddr, QueryResponse>,
    assembler: &SplitPacketAssembler,
    exchanges: &ExchangeMap,
    config: &QueryConfig,
    sender: SocketAddr,
    datagram: Bytes,
) -> Result<()> {
    let logical = match Datagram::parse(datagram)? {
        Datagram::Single(buf) => buf,
        Datagram::Split(fragment) => match assembler.insert(fragment, sender)? {
            Some(reassembled) => reassembled,
            // still waiting for the remaining fragments
            None => return Ok(()),
        },
    };

    let response = match decode_single(logical)? {
        Decoded::Accepted(response) => response,
        Decoded::Rejected(raw) => {
            // unknown discriminator: the codec passed the buffer through,
            // and at this stage that means the exchange cannot succeed
            let discriminator = raw.get(4).copied().unwrap_or(0);
            warn!(%sender, discriminator, "response with unrecognized packet type");
            return Err(ProtocolError::InvalidPacketType(discriminator));
        }
    };

    // drive the challenge handshake without holding the map lock across IO
    let outcome = {
        let mut map = exchanges
            .write()
            .map_err(|_| ProtocolError::Custom("exchange map lock poisoned".to_string()))?;
        let Some(exchange) = map.get_mut(&sender) else {
            debug!(%sender, kind = response.kind(), "response with no pending exchange dropped");
            return Ok(());
        };
        let outcome = exchange.on_response(response);
        if !matches!(outcome, Ok(ChallengeOutcome::Resend(_))) {
            map.remove(&sender);
        }
        outcome?
    };

    match outcome {
        ChallengeOutcome::Resend(request) => {
            socket.send_to(&request.encode(), sender).await?;
            // fresh round trip, fresh read timeout
            correlator.arm_timeout(sender, config.read_timeout);
        }
        ChallengeOutcome::Complete(response) => {
            correlator.complete(&sender, response);
            let _ = assembler.purge(sender);
        }
    }

    Ok(())
}
