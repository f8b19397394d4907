//! High-level Modbus client implementations
//!
//! The application layer (request construction, validation, response
//! interpretation) is written once in [`GenericModbusClient`] and runs over
//! any [`ModbusTransport`]. [`ModbusTcpClient`] is the TCP flavour.
//!
//! # API Naming Convention
//!
//! This library provides a **dual-track API**:
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//!
//! On top of these, [`ModbusClient::read_table`] and
//! [`ModbusClient::write_table`] address a table by kind and pick the
//! function code.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modbus_regmap::{ClientConfig, ModbusClient, ModbusResult, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = ClientConfig::new("127.0.0.1", 502).with_timeout(Duration::from_secs(5));
//!     let mut client = ModbusTcpClient::connect(config).await?;
//!
//!     // Read 10 holding registers from unit 1, starting at address 0
//!     let registers = client.read_03(1, 0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     // Write a value to register 100
//!     client.write_06(1, 100, 0x1234).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! Every call sends exactly one request. A timed-out write is never
//! re-sent by the client; whether to retry is the caller's decision.

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{Request, Response, SlaveId, Table, TableValues};
use crate::transport::{CloseHandle, ModbusTransport, TcpTransport, TransportStats};

/// Trait defining the interface for Modbus client operations.
///
/// # Implemented By
///
/// - [`ModbusTcpClient`] - Modbus TCP client
/// - [`GenericModbusClient`] - Generic client for custom transports
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Coils (0x01) | 2000 coils |
/// | Read Discrete Inputs (0x02) | 2000 bits |
/// | Read Holding Registers (0x03) | 125 registers |
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Coils (0x0F) | 1968 coils |
/// | Write Multiple Registers (0x10) | 123 registers |
///
/// Requests outside these limits fail with `InvalidData` without touching
/// the network. Exception responses surface as [`ModbusError::Exception`].
pub trait ModbusClient: Send + Sync {
    /// Read coils (function code 0x01).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting coil address (0-65535)
    /// * `quantity` - Number of coils to read (1-2000)
    ///
    /// # Returns
    ///
    /// Exactly `quantity` coil states; padding bits of the last byte are dropped.
    fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read discrete inputs (function code 0x02).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting input address (0-65535)
    /// * `quantity` - Number of inputs to read (1-2000)
    fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read holding registers (function code 0x03).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read input registers (function code 0x04).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Coil address (0-65535)
    /// * `value` - `true` for ON (0xFF00), `false` for OFF (0x0000)
    fn write_05(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write single register (function code 0x06).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Register address (0-65535)
    /// * `value` - 16-bit value to write
    fn write_06(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (function code 0x0F).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting coil address (0-65535)
    /// * `values` - Coil states (1-1968)
    fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple registers (function code 0x10).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus unit ID
    /// * `address` - Starting register address (0-65535)
    /// * `values` - 16-bit values to write (1-123 registers)
    fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;

    // ===== Table-addressed operations =====

    /// Read `quantity` cells of `table` from `unit_id`.
    ///
    /// Bit tables yield [`TableValues::Bits`], register tables
    /// [`TableValues::Registers`].
    fn read_table(
        &mut self,
        table: Table,
        address: u16,
        quantity: u16,
        unit_id: SlaveId,
    ) -> impl std::future::Future<Output = ModbusResult<TableValues>> + Send
    where
        Self: Sized,
    {
        async move {
            match table {
                Table::Coils => self.read_01(unit_id, address, quantity).await.map(TableValues::Bits),
                Table::DiscreteInputs => self
                    .read_02(unit_id, address, quantity)
                    .await
                    .map(TableValues::Bits),
                Table::HoldingRegisters => self
                    .read_03(unit_id, address, quantity)
                    .await
                    .map(TableValues::Registers),
                Table::InputRegisters => self
                    .read_04(unit_id, address, quantity)
                    .await
                    .map(TableValues::Registers),
            }
        }
    }

    /// Write `values` into `table` on `unit_id`.
    ///
    /// A single value goes out as FC05/FC06, a run as FC15/FC16. Discrete
    /// inputs and input registers are rejected with `InvalidData`.
    fn write_table(
        &mut self,
        table: Table,
        address: u16,
        values: TableValues,
        unit_id: SlaveId,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send
    where
        Self: Sized,
    {
        async move {
            match Request::write(table, address, values)? {
                Request::WriteSingleCoil { address, value } => {
                    self.write_05(unit_id, address, value).await
                }
                Request::WriteSingleRegister { address, value } => {
                    self.write_06(unit_id, address, value).await
                }
                Request::WriteMultipleCoils { address, values } => {
                    self.write_0f(unit_id, address, &values).await
                }
                Request::WriteMultipleRegisters { address, values } => {
                    self.write_10(unit_id, address, &values).await
                }
                other => Err(ModbusError::internal(format!(
                    "{} is not a write",
                    other.function().name()
                ))),
            }
        }
    }

    // ===== Semantic aliases =====

    /// Alias for `read_01` - Read coils
    #[inline]
    fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(slave_id, address, quantity)
    }

    /// Alias for `read_02` - Read discrete inputs
    #[inline]
    fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(slave_id, address, quantity)
    }

    /// Alias for `read_03` - Read holding registers
    #[inline]
    fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(slave_id, address, quantity)
    }

    /// Alias for `read_04` - Read input registers
    #[inline]
    fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(slave_id, address, quantity)
    }

    /// Alias for `write_05` - Write single coil
    #[inline]
    fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_05(slave_id, address, value)
    }

    /// Alias for `write_06` - Write single register
    #[inline]
    fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_06(slave_id, address, value)
    }

    /// Alias for `write_0f` - Write multiple coils
    #[inline]
    fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_0f(slave_id, address, values)
    }

    /// Alias for `write_10` - Write multiple registers
    #[inline]
    fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_10(slave_id, address, values)
    }
}

fn unexpected(request: &Request, response: &Response) -> ModbusError {
    ModbusError::protocol(format!(
        "{} answered with function 0x{:02X}",
        request.function().name(),
        response.function_code()
    ))
}

/// Generic Modbus client that works with any transport
///
/// Builds and validates the request, hands it to the transport, and turns
/// the decoded response into plain values or an error.
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a new generic client with the specified transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
        }
    }

    /// Create a new generic client with logging
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            transport,
            logger: Some(logger),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute a raw request.
    ///
    /// Exception responses come back as `Err(ModbusError::Exception)`.
    pub async fn execute_request(
        &mut self,
        unit_id: SlaveId,
        request: &Request,
    ) -> ModbusResult<Response> {
        request.validate()?;

        if let Some(ref logger) = self.logger {
            logger.log_request(unit_id, request);
        }

        let response = self.transport.request(unit_id, request).await?;

        if let Some(ref logger) = self.logger {
            logger.log_response(unit_id, &response);
        }

        response.into_result()
    }

    async fn read_bits(&mut self, unit_id: SlaveId, request: Request) -> ModbusResult<Vec<bool>> {
        match self.execute_request(unit_id, &request).await? {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => Ok(bits),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn read_registers(
        &mut self,
        unit_id: SlaveId,
        request: Request,
    ) -> ModbusResult<Vec<u16>> {
        match self.execute_request(unit_id, &request).await? {
            Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => Ok(regs),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn write(&mut self, unit_id: SlaveId, request: Request) -> ModbusResult<()> {
        match self.execute_request(unit_id, &request).await? {
            Response::WriteSingleCoil { .. }
            | Response::WriteSingleRegister { .. }
            | Response::WriteMultipleCoils { .. }
            | Response::WriteMultipleRegisters { .. } => Ok(()),
            other => Err(unexpected(&request, &other)),
        }
    }
}

impl<T: ModbusTransport + Send + Sync> ModbusClient for GenericModbusClient<T> {
    async fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, Request::ReadCoils { address, quantity })
            .await
    }

    async fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, Request::ReadDiscreteInputs { address, quantity })
            .await
    }

    async fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, Request::ReadHoldingRegisters { address, quantity })
            .await
    }

    async fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, Request::ReadInputRegisters { address, quantity })
            .await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        self.write(slave_id, Request::WriteSingleCoil { address, value })
            .await
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        self.write(slave_id, Request::WriteSingleRegister { address, value })
            .await
    }

    async fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        let request = Request::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        };
        self.write(slave_id, request).await
    }

    async fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        let request = Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        self.write(slave_id, request).await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Modbus TCP client implementation using the generic client
pub struct ModbusTcpClient {
    inner: GenericModbusClient<TcpTransport>,
    unit_id: SlaveId,
}

impl ModbusTcpClient {
    /// Connect using `config` (host resolution, timeout, unit id, packet logging)
    pub async fn connect(config: ClientConfig) -> ModbusResult<Self> {
        Self::with_logger(config, CallbackLogger::default()).await
    }

    /// Connect with a request/response logger
    pub async fn with_logger(config: ClientConfig, logger: CallbackLogger) -> ModbusResult<Self> {
        let transport = TcpTransport::from_config(&config, logger.clone()).await?;
        Ok(Self {
            inner: GenericModbusClient::with_logger(transport, logger),
            unit_id: config.unit_id,
        })
    }

    /// Create a new TCP client
    pub async fn new(addr: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        let transport = TcpTransport::connect(addr, timeout).await?;
        Ok(Self::from_transport(transport))
    }

    /// Create a new TCP client from address string
    pub async fn from_address(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ModbusError::configuration(format!("Invalid address: {}", e)))?;
        Self::new(addr, timeout).await
    }

    /// Create a new TCP client from transport
    pub fn from_transport(transport: TcpTransport) -> Self {
        Self {
            inner: GenericModbusClient::new(transport),
            unit_id: ClientConfig::default().unit_id,
        }
    }

    pub fn server_address(&self) -> SocketAddr {
        self.inner.transport().address()
    }

    /// Unit id used by [`read`](Self::read) and [`write`](Self::write)
    pub fn unit_id(&self) -> SlaveId {
        self.unit_id
    }

    pub fn set_unit_id(&mut self, unit_id: SlaveId) {
        self.unit_id = unit_id;
    }

    /// Enable or disable packet logging on existing client
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.inner.transport_mut().set_packet_logging(enabled);
    }

    /// Handle that aborts a pending call from another task
    pub fn close_handle(&self) -> CloseHandle {
        self.inner.transport().close_handle()
    }

    /// Re-open the connection after a connection error or close
    pub async fn reconnect(&mut self) -> ModbusResult<()> {
        self.inner.transport_mut().reconnect().await
    }

    /// Execute a raw request
    pub async fn execute_request(
        &mut self,
        unit_id: SlaveId,
        request: &Request,
    ) -> ModbusResult<Response> {
        self.inner.execute_request(unit_id, request).await
    }

    /// [`read_table`](ModbusClient::read_table) against the configured unit
    pub async fn read(&mut self, table: Table, address: u16, quantity: u16) -> ModbusResult<TableValues> {
        let unit_id = self.unit_id;
        self.read_table(table, address, quantity, unit_id).await
    }

    /// [`write_table`](ModbusClient::write_table) against the configured unit
    pub async fn write(&mut self, table: Table, address: u16, values: TableValues) -> ModbusResult<()> {
        let unit_id = self.unit_id;
        self.write_table(table, address, values, unit_id).await
    }
}

impl ModbusClient for ModbusTcpClient {
    async fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.inner.read_01(slave_id, address, quantity).await
    }

    async fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.inner.read_02(slave_id, address, quantity).await
    }

    async fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.inner.read_03(slave_id, address, quantity).await
    }

    async fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.inner.read_04(slave_id, address, quantity).await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        self.inner.write_05(slave_id, address, value).await
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        self.inner.write_06(slave_id, address, value).await
    }

    async fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        self.inner.write_0f(slave_id, address, values).await
    }

    async fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.inner.write_10(slave_id, address, values).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.inner.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusException;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock transport recording requests and replaying canned responses
    struct MockTransport {
        requests: Mutex<Vec<(SlaveId, Request)>>,
        responses: Mutex<VecDeque<ModbusResult<Response>>>,
        connected: Mutex<bool>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                connected: Mutex::new(true),
            }
        }

        fn add_response(&self, response: ModbusResult<Response>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn get_requests(&self) -> Vec<(SlaveId, Request)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ModbusTransport for MockTransport {
        fn request(
            &mut self,
            unit_id: SlaveId,
            request: &Request,
        ) -> impl std::future::Future<Output = ModbusResult<Response>> + Send {
            self.requests
                .lock()
                .unwrap()
                .push((unit_id, request.clone()));

            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModbusError::connection("No response prepared in mock")));

            async move { response }
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }

        fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
            *self.connected.lock().unwrap() = false;
            async { Ok(()) }
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[tokio::test]
    async fn test_read_03_builds_request() {
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::ReadHoldingRegisters(vec![1, 2, 3])));
        let mut client = GenericModbusClient::new(transport);

        let regs = client.read_03(7, 100, 3).await.unwrap();
        assert_eq!(regs, vec![1, 2, 3]);
        assert_eq!(
            client.transport().get_requests(),
            vec![(
                7,
                Request::ReadHoldingRegisters {
                    address: 100,
                    quantity: 3
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_exception_response_becomes_error() {
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::exception(
            0x03,
            ModbusException::IllegalDataAddress,
        )));
        let mut client = GenericModbusClient::new(transport);

        let err = client.read_03(1, 95, 10).await.unwrap_err();
        assert_eq!(err.exception_code(), Some(0x02));
        assert_eq!(err.to_exception(), ModbusException::IllegalDataAddress);
    }

    #[tokio::test]
    async fn test_invalid_quantity_not_sent() {
        let mut client = GenericModbusClient::new(MockTransport::new());

        let err = client.read_03(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        let err = client.read_01(1, 0, 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        let err = client.write_10(1, 0, &[0u16; 124]).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));

        assert!(client.transport().get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_write_table_picks_function() {
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::WriteSingleRegister {
            address: 10,
            value: 999,
        }));
        transport.add_response(Ok(Response::WriteMultipleCoils {
            address: 0,
            quantity: 3,
        }));
        let mut client = GenericModbusClient::new(transport);

        client
            .write_table(Table::HoldingRegisters, 10, TableValues::Registers(vec![999]), 1)
            .await
            .unwrap();
        client
            .write_table(Table::Coils, 0, TableValues::Bits(vec![true, false, true]), 1)
            .await
            .unwrap();

        let requests = client.transport().get_requests();
        assert_eq!(
            requests[0].1,
            Request::WriteSingleRegister {
                address: 10,
                value: 999
            }
        );
        assert_eq!(
            requests[1].1,
            Request::WriteMultipleCoils {
                address: 0,
                values: vec![true, false, true]
            }
        );
    }

    #[tokio::test]
    async fn test_write_to_read_only_table_rejected() {
        let mut client = GenericModbusClient::new(MockTransport::new());

        let err = client
            .write_table(Table::InputRegisters, 0, TableValues::Registers(vec![1]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        let err = client
            .write_table(Table::Coils, 0, TableValues::Registers(vec![1]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert!(client.transport().get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_read_table_wraps_values() {
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::ReadDiscreteInputs(vec![true, false])));
        transport.add_response(Ok(Response::ReadInputRegisters(vec![42])));
        let mut client = GenericModbusClient::new(transport);

        let bits = client
            .read_table(Table::DiscreteInputs, 0, 2, 1)
            .await
            .unwrap();
        assert_eq!(bits, TableValues::Bits(vec![true, false]));
        let regs = client
            .read_table(Table::InputRegisters, 5, 1, 1)
            .await
            .unwrap();
        assert_eq!(regs, TableValues::Registers(vec![42]));
    }

    #[tokio::test]
    async fn test_mismatched_response_is_protocol_error() {
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::ReadInputRegisters(vec![1])));
        let mut client = GenericModbusClient::new(transport);

        let err = client.read_01(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let transport = MockTransport::new();
        transport.add_response(Err(ModbusError::timeout("read", 100)));
        let mut client = GenericModbusClient::new(transport);

        let err = client.read_03(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(err.is_recoverable());
        // no implicit retry
        assert_eq!(client.transport().get_requests().len(), 1);

        client.close().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_logger_sees_traffic() {
        use crate::logging::LogLevel;
        use std::sync::Arc;

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = CallbackLogger::with_callback(
            move |_, msg| sink.lock().unwrap().push(msg.to_string()),
            LogLevel::Debug,
        );
        let transport = MockTransport::new();
        transport.add_response(Ok(Response::WriteSingleCoil {
            address: 3,
            value: true,
        }));
        let mut client = GenericModbusClient::with_logger(transport, logger);

        client.write_single_coil(1, 3, true).await.unwrap();
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_from_address_rejects_bad_address() {
        let result = ModbusTcpClient::from_address("not an address", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ModbusError::Configuration { .. })));
    }
}
