//! # modbus_regmap - Modbus TCP Register Map Server and Client
//!
//! A from-scratch Modbus TCP stack built around a shared register map:
//!
//! - **Frame codec**: MBAP header + PDU encoding/decoding for function codes
//!   0x01-0x06, 0x0F and 0x10, with strict validation.
//! - **Register store**: four independently sized tables behind per-table
//!   locks, shared by every connection.
//! - **Function dispatcher**: turns a decoded request into a store operation
//!   and always produces a wire-legal response or exception.
//! - **Server**: one task per connection, strict in-order processing,
//!   idle timeout, connection limit and graceful shutdown.
//! - **Client**: transaction-id matched request/response with per-request
//!   timeout, stale-response discarding and explicit reconnect.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Server | Client |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_regmap::{
//!     ClientConfig, ModbusClient, ModbusResult, ModbusTcpClient, ModbusTcpServer, ServerConfig,
//!     StoreConfig, TableConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let store = StoreConfig::new()
//!         .with_holding_registers(TableConfig::from_values((0..100).collect()));
//!     let config = ServerConfig::new("127.0.0.1:5020".parse().unwrap()).with_store(store);
//!
//!     let mut server = ModbusTcpServer::with_config(config)?;
//!     server.start().await?;
//!
//!     let mut client = ModbusTcpClient::connect(ClientConfig::new("127.0.0.1", 5020)).await?;
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_06(1, 10, 999).await?;
//!
//!     client.close().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Function codes, exceptions, tables and typed request/response PDUs
pub mod protocol;

/// PDU encoding and decoding
pub mod pdu;

/// MBAP framing
pub mod frame;

/// Server, store and client configuration
pub mod config;

/// Logging system for the library
pub mod logging;

// ============================================================================
// Server side
// ============================================================================

/// Thread-safe register tables
pub mod store;

/// Request execution against the register store
pub mod dispatcher;

/// Modbus TCP server
pub mod server;

// ============================================================================
// Client side
// ============================================================================

/// Network transport for the client
pub mod transport;

/// Modbus client implementations
pub mod client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_regmap::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};
pub use transport::{
    CloseHandle, ModbusTransport, PendingTransaction, TcpTransport, TransportStats,
};

// === Server API ===
pub use dispatcher::{Dispatcher, UnitRouter};
pub use server::{ConnectionState, ModbusTcpServer, ServerStats};
pub use store::{RegisterStore, RegisterStoreStats};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{
    ModbusException, ModbusFunction, Request, Response, SlaveId, Table, TableValues,
};

// === Configuration ===
pub use config::{
    ClientConfig, MissingUnitPolicy, RoutingConfig, ServerConfig, StoreConfig, TableConfig,
};

// === Framing (advanced usage) ===
pub use frame::{FrameError, MbapHeader};
pub use pdu::{ModbusPdu, PduBuilder};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("modbus_regmap v{} - Modbus TCP register map server and client", VERSION)
}
