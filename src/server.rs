//! Modbus TCP server
//!
//! One tokio task per accepted connection. Inside a connection, frames are
//! handled strictly one at a time in arrival order:
//!
//! ```text
//! AwaitingFrame -> ProcessingRequest -> SendingResponse -> AwaitingFrame
//!        \________________ any error / shutdown ______________> Closed
//! ```
//!
//! The register stores are the only shared mutable state; their locks are
//! never held across socket I/O. `stop()` stops accepting, lets connections
//! finish the request they are working on within the configured grace
//! period and then aborts whatever is left.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::constants::MAX_FRAME_SIZE;
use crate::dispatcher::{Dispatcher, UnitRouter};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{self, FrameError};
use crate::logging::CallbackLogger;
use crate::protocol::{Response, SlaveId};
use crate::store::RegisterStore;

/// Per-connection protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingFrame,
    ProcessingRequest,
    SendingResponse,
    Closed,
}

/// Server statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_accepted: u64,
    pub connections_active: usize,
    /// Connections closed on arrival because `max_connections` was reached
    pub connections_rejected: u64,
    pub requests_processed: u64,
    pub exceptions_sent: u64,
    pub malformed_frames: u64,
    pub idle_timeouts: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_active: AtomicUsize,
    connections_rejected: AtomicU64,
    requests_processed: AtomicU64,
    exceptions_sent: AtomicU64,
    malformed_frames: AtomicU64,
    idle_timeouts: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decrements the active connection count when the connection task ends,
/// including when it is aborted
struct ActiveConnection(Arc<Counters>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// State shared by the accept loop and every connection task
struct ServerContext {
    config: ServerConfig,
    dispatcher: Dispatcher,
    logger: CallbackLogger,
    counters: Arc<Counters>,
}

/// Modbus TCP server
pub struct ModbusTcpServer {
    context: Arc<ServerContext>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    started_at: Option<DateTime<Utc>>,
}

impl ModbusTcpServer {
    /// Server with default configuration on `bind_address`
    pub fn new(bind_address: &str) -> ModbusResult<Self> {
        let addr = bind_address.parse::<SocketAddr>().map_err(|e| {
            ModbusError::configuration(format!("Invalid bind address {bind_address}: {e}"))
        })?;
        Self::with_config(ServerConfig::new(addr))
    }

    /// Server whose stores are built from `config.routing`
    pub fn with_config(config: ServerConfig) -> ModbusResult<Self> {
        Self::with_logger(config, CallbackLogger::default())
    }

    pub fn with_logger(config: ServerConfig, logger: CallbackLogger) -> ModbusResult<Self> {
        let router = UnitRouter::from_config(&config.routing)?;
        Self::with_router(config, router, logger)
    }

    /// Server over stores the caller already owns. `config.routing` is ignored.
    pub fn with_router(
        config: ServerConfig,
        router: UnitRouter,
        logger: CallbackLogger,
    ) -> ModbusResult<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(router, config.missing_unit);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            context: Arc::new(ServerContext {
                config,
                dispatcher,
                logger,
                counters: Arc::new(Counters::default()),
            }),
            shutdown_tx,
            accept_task: None,
            is_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            started_at: None,
        })
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns once the socket is listening. A bind failure is reported as
    /// a connection error.
    pub async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::protocol("Server already running"));
        }

        let bind_address = self.context.config.bind_address;
        let listener = TcpListener::bind(bind_address).await.map_err(|e| {
            ModbusError::connection(format!("Failed to bind {bind_address}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let context = Arc::clone(&self.context);
        let is_running = Arc::clone(&self.is_running);

        is_running.store(true, Ordering::SeqCst);
        self.accept_task = Some(tokio::spawn(async move {
            accept_loop(listener, context, shutdown_rx).await;
            is_running.store(false, Ordering::SeqCst);
        }));
        self.local_addr = Some(local_addr);
        self.started_at = Some(Utc::now());

        info!("🚀 Modbus TCP server listening on {}", local_addr);
        Ok(())
    }

    /// Graceful shutdown.
    ///
    /// New connections are refused immediately. Open connections finish the
    /// request in progress; after `shutdown_grace` the rest are aborted.
    pub async fn stop(&mut self) -> ModbusResult<()> {
        let Some(task) = self.accept_task.take() else {
            return Ok(());
        };
        info!("🛑 Stopping Modbus TCP server");
        self.shutdown_tx.send_replace(true);
        task.await
            .map_err(|e| ModbusError::internal(format!("Accept loop failed: {e}")))?;
        self.is_running.store(false, Ordering::SeqCst);
        info!("Modbus TCP server stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Store serving `unit_id`, for application-side reads and writes
    pub fn register_store(&self, unit_id: SlaveId) -> Option<Arc<RegisterStore>> {
        self.context.dispatcher.router().store(unit_id)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    pub fn get_stats(&self) -> ServerStats {
        let c = &self.context.counters;
        ServerStats {
            connections_accepted: c.connections_accepted.load(Ordering::Relaxed),
            connections_active: c.connections_active.load(Ordering::Relaxed),
            connections_rejected: c.connections_rejected.load(Ordering::Relaxed),
            requests_processed: c.requests_processed.load(Ordering::Relaxed),
            exceptions_sent: c.exceptions_sent.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
            idle_timeouts: c.idle_timeouts.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_seconds: self
                .started_at
                .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
                .unwrap_or(0),
        }
    }
}

impl Drop for ModbusTcpServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let max_connections = context.config.max_connections;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let counters = &context.counters;
                    if counters.connections_active.load(Ordering::Relaxed) >= max_connections {
                        Counters::bump(&counters.connections_rejected);
                        warn!(
                            "Connection limit ({}) reached, closing {}",
                            max_connections, peer
                        );
                        drop(stream);
                        continue;
                    }
                    Counters::bump(&counters.connections_accepted);
                    counters.connections_active.fetch_add(1, Ordering::Relaxed);
                    let guard = ActiveConnection(Arc::clone(counters));
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&context),
                        shutdown_rx.clone(),
                        guard,
                    ));
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    drop(listener);
    let grace = context.config.shutdown_grace;
    debug!(
        "Waiting up to {:?} for {} connections",
        grace,
        connections.len()
    );
    let drained = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "Shutdown grace elapsed, aborting {} connections",
            connections.len()
        );
        connections.shutdown().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
    _active: ActiveConnection,
) {
    let connected_at = Utc::now();
    info!("📡 Client connected: {}", peer);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);
    let mut state = ConnectionState::AwaitingFrame;
    let counters = &context.counters;
    let idle_timeout = context.config.idle_timeout;

    loop {
        if *shutdown_rx.borrow() {
            debug!("Shutdown signal received for {}", peer);
            break;
        }
        transition(peer, &mut state, ConnectionState::AwaitingFrame);

        let frame = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received for {}", peer);
                break;
            }
            read = timeout(idle_timeout, frame::read_frame(&mut reader, &mut buf)) => {
                match read {
                    Err(_) => {
                        Counters::bump(&counters.idle_timeouts);
                        info!("Client {} idle for {:?}, closing", peer, idle_timeout);
                        break;
                    }
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => {
                        debug!("Client {} closed the connection", peer);
                        break;
                    }
                    Ok(Err(e @ ModbusError::Frame { .. })) => {
                        Counters::bump(&counters.malformed_frames);
                        warn!("Unreadable frame from {}: {}", peer, e);
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!("Read from {} failed: {}", peer, e);
                        break;
                    }
                }
            }
        };

        counters
            .bytes_received
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        transition(peer, &mut state, ConnectionState::ProcessingRequest);

        let reply = match process_frame(&context, &frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Dropping {} after malformed frame: {}", peer, e);
                break;
            }
        };

        if let Some(reply) = reply {
            transition(peer, &mut state, ConnectionState::SendingResponse);
            if let Err(e) = writer.write_all(&reply).await {
                error!("Failed to send response to {}: {}", peer, e);
                break;
            }
            counters
                .bytes_sent
                .fetch_add(reply.len() as u64, Ordering::Relaxed);
        }
    }

    transition(peer, &mut state, ConnectionState::Closed);
    let _ = writer.shutdown().await;
    info!(
        "🔌 Client {} disconnected after {}s",
        peer,
        (Utc::now() - connected_at).num_seconds()
    );
}

fn transition(peer: SocketAddr, state: &mut ConnectionState, next: ConnectionState) {
    if *state != next {
        trace!("{}: {:?} -> {:?}", peer, state, next);
        *state = next;
    }
}

/// Decode, dispatch and encode one frame.
///
/// `Ok(None)` sends nothing, `Err` closes the connection.
fn process_frame(context: &ServerContext, frame: &[u8]) -> ModbusResult<Option<Bytes>> {
    let counters = &context.counters;
    let logger = &context.logger;
    if context.config.packet_logging {
        logger.log_packet("RX", frame);
    }

    let (header, response) = match frame::decode_request(frame) {
        Ok((header, request)) => {
            Counters::bump(&counters.requests_processed);
            logger.log_request(header.unit_id, &request);
            match context.dispatcher.dispatch(header.unit_id, &request) {
                Some(response) => (header, response),
                None => return Ok(None),
            }
        }
        Err(FrameError {
            reason,
            recovered: Some(recovered),
        }) => {
            Counters::bump(&counters.malformed_frames);
            warn!(
                "Rejecting request (tid={}, FC={:02X}): {}",
                recovered.header.transaction_id, recovered.function_code, reason
            );
            let response = Response::exception(recovered.function_code, recovered.exception);
            (recovered.header, response)
        }
        Err(FrameError {
            reason,
            recovered: None,
        }) => {
            Counters::bump(&counters.malformed_frames);
            return Err(reason);
        }
    };

    if response.is_exception() {
        Counters::bump(&counters.exceptions_sent);
    }
    logger.log_response(header.unit_id, &response);
    let reply = frame::encode_response(&header, &response)?;
    if context.config.packet_logging {
        logger.log_packet("TX", &reply);
    }
    Ok(Some(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, TableConfig};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn demo_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_store(
            StoreConfig::new().with_holding_registers(TableConfig::from_values((0..100).collect())),
        )
    }

    async fn started(config: ServerConfig) -> ModbusTcpServer {
        let mut server = ModbusTcpServer::with_config(config).unwrap();
        server.start().await.unwrap();
        server
    }

    async fn exchange(stream: &mut TcpStream, request: &[u8], reply_len: usize) -> Vec<u8> {
        stream.write_all(request).await.unwrap();
        let mut reply = vec![0u8; reply_len];
        stream.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[test]
    fn test_tcp_server_creation() {
        let server = ModbusTcpServer::new("127.0.0.1:5020").unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert!(ModbusTcpServer::new("not an address").is_err());
    }

    #[tokio::test]
    async fn test_start_serves_and_stop_closes() {
        let mut server = started(demo_config()).await;
        assert!(server.is_running());
        let addr = server.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let reply = exchange(
            &mut stream,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02],
            13,
        )
        .await;
        assert_eq!(
            reply,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x00, 0x00, 0x01]
        );

        server.stop().await.unwrap();
        assert!(!server.is_running());

        let mut rest = Vec::new();
        let n = stream.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut server = started(demo_config()).await;
        assert!(matches!(
            server.start().await,
            Err(ModbusError::Protocol { .. })
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_connection_error() {
        let mut first = started(demo_config()).await;
        let taken = first.local_addr().unwrap();

        let mut second = ModbusTcpServer::with_config(ServerConfig::new(taken)).unwrap();
        let err = second.start().await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_function_gets_exception_and_connection_survives() {
        let mut server = started(demo_config()).await;
        let mut stream = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();

        let reply = exchange(
            &mut stream,
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B],
            9,
        )
        .await;
        assert_eq!(reply, vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01]);

        let reply = exchange(
            &mut stream,
            &[0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x05, 0x00, 0x01],
            11,
        )
        .await;
        assert_eq!(&reply[9..], &[0x00, 0x05]);

        let stats = server.get_stats();
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.exceptions_sent, 1);
        assert_eq!(stats.requests_processed, 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_protocol_id_closes_connection() {
        let mut server = started(demo_config()).await;
        let mut stream = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        stream
            .write_all(&[0x00, 0x01, 0x12, 0x34, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let mut rest = Vec::new();
        let n = stream.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_reclaims_connection() {
        let config = demo_config().with_idle_timeout(Duration::from_millis(100));
        let mut server = started(config).await;
        let mut stream = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();

        let mut rest = Vec::new();
        let n = timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        assert_eq!(server.get_stats().idle_timeouts, 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let config = demo_config().with_max_connections(1);
        let mut server = started(config).await;
        let addr = server.local_addr().unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        // Make sure the first connection is being served before opening the second
        exchange(
            &mut first,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01],
            11,
        )
        .await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        let n = timeout(Duration::from_secs(5), second.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        let stats = server.get_stats();
        assert_eq!(stats.connections_rejected, 1);
        assert_eq!(stats.connections_active, 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_store_is_shared_with_connections() {
        let mut server = started(demo_config()).await;
        let store = server.register_store(1).unwrap();
        store.write_06(3, 0xBEEF).unwrap();

        let mut stream = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        let reply = exchange(
            &mut stream,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x03, 0x00, 0x01],
            11,
        )
        .await;
        assert_eq!(&reply[9..], &[0xBE, 0xEF]);
        assert!(server.get_stats().started_at.is_some());
        server.stop().await.unwrap();
    }
}
