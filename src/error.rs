//! Error types for Modbus operations
//!
//! A single error enum covers the codec, the register store, the server and
//! the client session. Server-side errors never cross the wire as-is: they
//! are translated to a [`ModbusException`] through [`ModbusError::to_exception`]
//! before a response is built.

use std::io;

use thiserror::Error;

use crate::protocol::{ModbusException, Table};

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Unrecoverable framing problem (bad MBAP header, truncated PDU, ...)
    #[error("Malformed frame: {message}")]
    Frame { message: String },

    /// Well-formed request rejected by the peer with an exception response
    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Register store boundary violation
    #[error("Address out of range: {table} {address}+{quantity} exceeds table size {size}")]
    OutOfRange {
        table: Table,
        address: u16,
        quantity: usize,
        size: usize,
    },

    /// Request deadline elapsed before a matching response arrived
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Connection lost, refused or closed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Other I/O failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Request or response data violates protocol rules
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Unsupported function code
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Protocol state violation (mismatched response, server already running, ...)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal failure (poisoned lock, task panic)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Build an exception error from a raw exception response
    pub fn exception(function: u8, code: u8) -> Self {
        let message = ModbusException::from_u8(code)
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| "unknown exception".to_string());
        Self::Exception {
            function: function & 0x7F,
            code,
            message,
        }
    }

    pub fn out_of_range(table: Table, address: u16, quantity: usize, size: usize) -> Self {
        Self::OutOfRange {
            table,
            address,
            quantity,
            size,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wire-legal exception code for this error.
    ///
    /// Store violations become ILLEGAL_DATA_ADDRESS, bad values ILLEGAL_DATA_VALUE,
    /// unknown functions ILLEGAL_FUNCTION. Anything else is a device failure.
    pub fn to_exception(&self) -> ModbusException {
        match self {
            Self::OutOfRange { .. } => ModbusException::IllegalDataAddress,
            Self::InvalidData { .. } | Self::Frame { .. } => ModbusException::IllegalDataValue,
            Self::InvalidFunction { .. } => ModbusException::IllegalFunction,
            Self::Exception { code, .. } => ModbusException::from_u8(*code)
                .unwrap_or(ModbusException::ServerDeviceFailure),
            _ => ModbusException::ServerDeviceFailure,
        }
    }

    /// Exception code carried by an `Exception` error
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            Self::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the connection must be re-established before the next request
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Io { .. })
    }

    /// Whether the same session can keep issuing requests after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Exception { .. }
                | Self::OutOfRange { .. }
                | Self::InvalidData { .. }
                | Self::InvalidFunction { .. }
        )
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ModbusError::connection(err.to_string()),
            io::ErrorKind::TimedOut => ModbusError::timeout(err.to_string(), 0),
            _ => ModbusError::io(err.to_string()),
        }
    }
}
