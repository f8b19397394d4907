//! # Modbus Transport Layer
//!
//! Client-side request/response plumbing over TCP.
//!
//! [`TcpTransport`] owns one socket and a 16-bit transaction id counter.
//! Each request gets a fresh id (wrapping at 0xFFFF), is written as one
//! MBAP frame, and the caller waits until a frame with the same id arrives,
//! the per-request deadline passes, or the connection is closed. Frames
//! carrying another id (late answers to requests that already timed out)
//! are discarded. Nothing is ever re-sent implicitly.
//!
//! ```rust,no_run
//! use modbus_regmap::transport::{ModbusTransport, TcpTransport};
//! use modbus_regmap::Request;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::connect(
//!         "127.0.0.1:502".parse()?,
//!         Duration::from_secs(5),
//!     ).await?;
//!
//!     let request = Request::ReadHoldingRegisters { address: 0, quantity: 10 };
//!     let response = transport.request(1, &request).await?;
//!     println!("Response: {:?}", response);
//!
//!     let stats = transport.get_stats();
//!     println!("Requests sent: {}", stats.requests_sent);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::MAX_FRAME_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{self, split_frame};
use crate::logging::CallbackLogger;
use crate::pdu;
use crate::protocol::{ModbusFunction, Request, Response, SlaveId};

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    /// Exception responses among `responses_received`
    pub exceptions: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Frames dropped because their transaction id matched no pending request
    pub stale_responses: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Transport used by the client application layer
pub trait ModbusTransport: Send + Sync {
    /// Send `request` to `unit_id` and wait for the matching response.
    ///
    /// Exception responses are returned as [`Response::Exception`], not as
    /// errors. Errors are `Timeout`, `Connection` (socket lost or closed
    /// through a [`CloseHandle`]), `Frame`/`Protocol` (malformed or
    /// mismatched reply) and `InvalidData` (request rejected before sending).
    fn request(
        &mut self,
        unit_id: SlaveId,
        request: &Request,
    ) -> impl std::future::Future<Output = ModbusResult<Response>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Request currently awaiting its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransaction {
    pub transaction_id: u16,
    pub unit_id: SlaveId,
    pub function: ModbusFunction,
    pub sent_at: DateTime<Utc>,
    pub deadline: Instant,
}

/// Closes a [`TcpTransport`] from another task.
///
/// A request waiting on the transport fails at once with a connection
/// error, and the transport refuses further requests until
/// [`TcpTransport::reconnect`] is called.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Modbus TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    address: SocketAddr,
    stream: Option<TcpStream>,
    timeout: Duration,
    next_transaction_id: u16,
    pending: Option<PendingTransaction>,
    stats: TransportStats,
    packet_logging: bool,
    logger: CallbackLogger,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
    read_buf: BytesMut,
}

async fn open_stream(address: SocketAddr, deadline: Duration) -> ModbusResult<TcpStream> {
    match timeout(deadline, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            // Requests are single small frames
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(ModbusError::connection(format!(
            "Failed to connect to {address}: {e}"
        ))),
        Err(_) => Err(ModbusError::timeout(
            format!("connect to {address}"),
            deadline.as_millis() as u64,
        )),
    }
}

impl TcpTransport {
    /// Connect with a per-request (and connect) timeout
    pub async fn connect(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        Self::connect_with_logger(address, timeout, CallbackLogger::default()).await
    }

    pub async fn connect_with_logger(
        address: SocketAddr,
        timeout: Duration,
        logger: CallbackLogger,
    ) -> ModbusResult<Self> {
        let stream = open_stream(address, timeout).await?;
        info!("Connected to Modbus TCP server {}", address);
        let (close_tx, close_rx) = watch::channel(false);
        Ok(Self {
            address,
            stream: Some(stream),
            timeout,
            next_transaction_id: 1,
            pending: None,
            stats: TransportStats::default(),
            packet_logging: false,
            logger,
            close_tx: Arc::new(close_tx),
            close_rx,
            read_buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
        })
    }

    /// Resolve `config.host` and connect
    pub async fn from_config(config: &ClientConfig, logger: CallbackLogger) -> ModbusResult<Self> {
        config.validate()?;
        let target = config.address();
        let address = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| ModbusError::connection(format!("No address found for {target}")))?;
        let mut transport = Self::connect_with_logger(address, config.timeout, logger).await?;
        transport.packet_logging = config.packet_logging;
        Ok(transport)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Handle that closes this transport from another task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: Arc::clone(&self.close_tx),
        }
    }

    /// Request currently in flight, if any
    pub fn pending(&self) -> Option<&PendingTransaction> {
        self.pending.as_ref()
    }

    /// Transaction id the next request will carry
    pub fn next_transaction_id(&self) -> u16 {
        self.next_transaction_id
    }

    pub fn set_next_transaction_id(&mut self, transaction_id: u16) {
        self.next_transaction_id = transaction_id;
    }

    fn allocate_transaction_id(&mut self) -> u16 {
        let tid = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        tid
    }

    /// Drop the current socket (if any) and open a new one.
    ///
    /// Clears the closed state set by a [`CloseHandle`]; existing handles
    /// keep working for the new connection.
    pub async fn reconnect(&mut self) -> ModbusResult<()> {
        self.stream = None;
        self.pending = None;
        self.read_buf.clear();
        let stream = open_stream(self.address, self.timeout).await?;
        self.stream = Some(stream);
        self.close_tx.send_replace(false);
        info!("Reconnected to {}", self.address);
        Ok(())
    }

    fn record_failure(&mut self, error: &ModbusError) {
        match error {
            ModbusError::Timeout { .. } => self.stats.timeouts += 1,
            _ => self.stats.errors += 1,
        }
        // A frame error leaves the reader at an unknown offset in the stream
        if error.needs_reconnect() || matches!(error, ModbusError::Frame { .. }) {
            warn!(
                "Connection to {} unusable until reconnect: {}",
                self.address, error
            );
            self.stream = None;
        }
    }

    async fn send_and_wait(&mut self, unit_id: SlaveId, request: &Request) -> ModbusResult<Response> {
        if *self.close_rx.borrow() {
            self.stream = None;
        }
        if self.stream.is_none() {
            return Err(ModbusError::connection(format!(
                "Not connected to {}, call reconnect()",
                self.address
            )));
        }

        let transaction_id = self.allocate_transaction_id();
        let frame = frame::encode_request(transaction_id, unit_id, request)?;
        if self.packet_logging {
            self.logger.log_packet("TX", &frame);
        }

        let deadline = Instant::now() + self.timeout;
        self.pending = Some(PendingTransaction {
            transaction_id,
            unit_id,
            function: request.function(),
            sent_at: Utc::now(),
            deadline,
        });

        let timeout_ms = self.timeout.as_millis() as u64;
        let Self {
            stream,
            close_rx,
            read_buf,
            stats,
            logger,
            packet_logging,
            ..
        } = self;
        let Some(stream) = stream.as_mut() else {
            return Err(ModbusError::connection("Not connected"));
        };

        let exchange = Exchange {
            stream,
            read_buf,
            stats,
            logger,
            packet_logging: *packet_logging,
            transaction_id,
            unit_id,
            request,
        };

        tokio::select! {
            _ = close_rx.wait_for(|closed| *closed) => {
                Err(ModbusError::connection("Connection closed while waiting for response"))
            }
            result = timeout_at(deadline, exchange.run(&frame)) => match result {
                Ok(result) => result,
                Err(_) => Err(ModbusError::timeout(
                    format!("{} (tid={})", request.function().name(), transaction_id),
                    timeout_ms,
                )),
            },
        }
    }
}

/// One request/response round trip over a borrowed socket
struct Exchange<'a> {
    stream: &'a mut TcpStream,
    read_buf: &'a mut BytesMut,
    stats: &'a mut TransportStats,
    logger: &'a CallbackLogger,
    packet_logging: bool,
    transaction_id: u16,
    unit_id: SlaveId,
    request: &'a Request,
}

impl Exchange<'_> {
    async fn run(self, frame: &[u8]) -> ModbusResult<Response> {
        self.stream.write_all(frame).await?;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        loop {
            let Some(reply) = frame::read_frame(&mut *self.stream, &mut *self.read_buf).await? else {
                return Err(ModbusError::connection("Connection closed by server"));
            };
            self.stats.bytes_received += reply.len() as u64;
            if self.packet_logging {
                self.logger.log_packet("RX", &reply);
            }

            let (header, pdu_bytes) = split_frame(&reply)?;
            if header.transaction_id != self.transaction_id {
                self.stats.stale_responses += 1;
                debug!(
                    "Discarding stale response tid={} (waiting for {})",
                    header.transaction_id, self.transaction_id
                );
                continue;
            }
            if header.unit_id != self.unit_id {
                return Err(ModbusError::protocol(format!(
                    "Response from unit {} to request for unit {}",
                    header.unit_id, self.unit_id
                )));
            }

            let response = pdu::decode_response(self.request, pdu_bytes)?;
            self.stats.responses_received += 1;
            if response.is_exception() {
                self.stats.exceptions += 1;
            }
            return Ok(response);
        }
    }
}

impl ModbusTransport for TcpTransport {
    async fn request(&mut self, unit_id: SlaveId, request: &Request) -> ModbusResult<Response> {
        let result = self.send_and_wait(unit_id, request).await;
        self.pending = None;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some() && !*self.close_rx.borrow()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            info!("Closed connection to {}", self.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MbapHeader;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Reads one request frame from the peer and returns (tid, unit, pdu)
    async fn read_request(stream: &mut TcpStream) -> (u16, u8, Vec<u8>) {
        let mut buf = BytesMut::new();
        let frame = frame::read_frame(stream, &mut buf).await.unwrap().unwrap();
        let header = MbapHeader::parse(&frame).unwrap();
        (header.transaction_id, header.unit_id, frame[7..].to_vec())
    }

    fn reply(tid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tid.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        out.push(unit);
        out.extend_from_slice(pdu);
        out
    }

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn read_two() -> Request {
        Request::ReadHoldingRegisters {
            address: 0,
            quantity: 2,
        }
    }

    #[tokio::test]
    async fn test_request_response_and_transaction_ids() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut tids = Vec::new();
            for _ in 0..2 {
                let (tid, unit, pdu) = read_request(&mut s).await;
                assert_eq!(pdu, vec![0x03, 0x00, 0x00, 0x00, 0x02]);
                tids.push(tid);
                s.write_all(&reply(tid, unit, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]))
                    .await
                    .unwrap();
            }
            tids
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        for _ in 0..2 {
            let resp = transport.request(1, &read_two()).await.unwrap();
            assert_eq!(resp, Response::ReadHoldingRegisters(vec![10, 11]));
        }
        assert_eq!(server.await.unwrap(), vec![1, 2]);

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 2);
        assert_eq!(stats.responses_received, 2);
        assert!(transport.pending().is_none());
    }

    #[tokio::test]
    async fn test_transaction_id_wraps() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut tids = Vec::new();
            for _ in 0..2 {
                let (tid, unit, _) = read_request(&mut s).await;
                tids.push(tid);
                s.write_all(&reply(tid, unit, &[0x06, 0x00, 0x01, 0x00, 0x02]))
                    .await
                    .unwrap();
            }
            tids
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        transport.set_next_transaction_id(0xFFFF);
        let write = Request::WriteSingleRegister {
            address: 1,
            value: 2,
        };
        transport.request(1, &write).await.unwrap();
        transport.request(1, &write).await.unwrap();
        assert_eq!(server.await.unwrap(), vec![0xFFFF, 0x0000]);
        assert_eq!(transport.next_transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_stale_response_discarded() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let (tid, unit, _) = read_request(&mut s).await;
            // Late answer to an earlier request first, then the real one
            s.write_all(&reply(tid.wrapping_sub(1), unit, &[0x03, 0x04, 0, 0, 0, 0]))
                .await
                .unwrap();
            s.write_all(&reply(tid, unit, &[0x03, 0x04, 0, 7, 0, 8]))
                .await
                .unwrap();
            let _ = s.read(&mut [0u8; 1]).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        let resp = transport.request(1, &read_two()).await.unwrap();
        assert_eq!(resp, Response::ReadHoldingRegisters(vec![7, 8]));
        assert_eq!(transport.get_stats().stale_responses, 1);
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_ignored() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let (first_tid, unit, _) = read_request(&mut s).await;
            let (second_tid, _, _) = read_request(&mut s).await;
            s.write_all(&reply(first_tid, unit, &[0x03, 0x04, 0, 1, 0, 1]))
                .await
                .unwrap();
            s.write_all(&reply(second_tid, unit, &[0x03, 0x04, 0, 2, 0, 2]))
                .await
                .unwrap();
            let _ = s.read(&mut [0u8; 1]).await;
        });

        let mut transport =
            TcpTransport::connect(addr, Duration::from_millis(200)).await.unwrap();
        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(transport.is_connected());

        transport.set_timeout(Duration::from_secs(2));
        let resp = transport.request(1, &read_two()).await.unwrap();
        assert_eq!(resp, Response::ReadHoldingRegisters(vec![2, 2]));

        let stats = transport.get_stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.stale_responses, 1);
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_resumes_on_next_request() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let (first_tid, unit, _) = read_request(&mut s).await;
            let late = reply(first_tid, unit, &[0x03, 0x04, 0, 1, 0, 1]);
            s.write_all(&late[..9]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            s.write_all(&late[9..]).await.unwrap();

            let mut buf = BytesMut::new();
            loop {
                let Ok(Some(frame)) = frame::read_frame(&mut s, &mut buf).await else {
                    break;
                };
                let header = MbapHeader::parse(&frame).unwrap();
                s.write_all(&reply(
                    header.transaction_id,
                    header.unit_id,
                    &[0x03, 0x04, 0, 2, 0, 2],
                ))
                .await
                .unwrap();
            }
        });

        let mut transport =
            TcpTransport::connect(addr, Duration::from_millis(150)).await.unwrap();
        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(transport.is_connected());

        transport.set_timeout(Duration::from_secs(2));
        for _ in 0..3 {
            let resp = transport.request(1, &read_two()).await.unwrap();
            assert_eq!(resp, Response::ReadHoldingRegisters(vec![2, 2]));
        }
        let stats = transport.get_stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.stale_responses, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_garbled_stream_marks_session_unusable() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut s).await;
            // protocol id 2
            s.write_all(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x01, 0x83, 0x02])
                .await
                .unwrap();
            let _ = s.read(&mut [0u8; 1]).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert!(!transport.is_connected());

        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert_eq!(transport.get_stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_exception_response_passed_through() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let (tid, unit, _) = read_request(&mut s).await;
            s.write_all(&reply(tid, unit, &[0x83, 0x02])).await.unwrap();
            let _ = s.read(&mut [0u8; 1]).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        let resp = transport.request(1, &read_two()).await.unwrap();
        assert_eq!(
            resp,
            Response::Exception {
                function: 0x03,
                code: 0x02
            }
        );
        assert_eq!(transport.get_stats().exceptions, 1);
    }

    #[tokio::test]
    async fn test_server_drop_marks_session_unusable() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut s).await;
            drop(s);
            // keep accepting for the reconnect
            let (mut s, _) = listener.accept().await.unwrap();
            let (tid, unit, _) = read_request(&mut s).await;
            s.write_all(&reply(tid, unit, &[0x03, 0x04, 0, 5, 0, 6]))
                .await
                .unwrap();
            let _ = s.read(&mut [0u8; 1]).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).await.unwrap();
        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert!(!transport.is_connected());

        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));

        transport.reconnect().await.unwrap();
        let resp = transport.request(1, &read_two()).await.unwrap();
        assert_eq!(resp, Response::ReadHoldingRegisters(vec![5, 6]));
    }

    #[tokio::test]
    async fn test_close_handle_cancels_waiting_request() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut s).await;
            // never answer
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(5)).await.unwrap();
        let handle = transport.close_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.close();
        });

        let started = std::time::Instant::now();
        let err = transport.request(1, &read_two()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_request_not_sent() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });
        let mut transport = TcpTransport::connect(addr, Duration::from_secs(1)).await.unwrap();
        let err = transport
            .request(
                1,
                &Request::ReadHoldingRegisters {
                    address: 0,
                    quantity: 200,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(transport.get_stats().requests_sent, 0);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, addr) = listener().await;
        drop(listener);
        let err = TcpTransport::connect(addr, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }
}
