//! Logging system for the library
//!
//! Everything in the crate logs through `tracing`. Request/response and
//! packet logging additionally goes through a [`CallbackLogger`], which the
//! server and client receive at construction, so an application can route
//! those lines to its own sink or turn them off without touching the global
//! subscriber.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{ModbusFunction, Request, Response, SlaveId};

/// Log severity, ordered from most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(s)
    }
}

/// User log sink
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Where [`CallbackLogger`] output goes
#[derive(Clone, Default)]
pub enum LoggingMode {
    Disabled,
    /// Forward to the `tracing` macros
    #[default]
    Tracing,
    Callback(LogCallback),
}

impl fmt::Debug for LoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingMode::Disabled => f.write_str("Disabled"),
            LoggingMode::Tracing => f.write_str("Tracing"),
            LoggingMode::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Level-filtered logger for protocol traffic
#[derive(Debug, Clone)]
pub struct CallbackLogger {
    mode: LoggingMode,
    max_level: LogLevel,
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self {
            mode: LoggingMode::Tracing,
            max_level: LogLevel::Debug,
        }
    }
}

impl CallbackLogger {
    pub fn new(mode: LoggingMode, max_level: LogLevel) -> Self {
        Self { mode, max_level }
    }

    pub fn disabled() -> Self {
        Self::new(LoggingMode::Disabled, LogLevel::Error)
    }

    pub fn with_callback<F>(callback: F, max_level: LogLevel) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self::new(LoggingMode::Callback(Arc::new(callback)), max_level)
    }

    pub fn mode(&self) -> &LoggingMode {
        &self.mode
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        !matches!(self.mode, LoggingMode::Disabled) && level <= self.max_level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }
        match &self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => match level {
                LogLevel::Error => tracing::error!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Trace => tracing::trace!("{}", message),
            },
            LoggingMode::Callback(callback) => callback(level, message),
        }
    }

    pub fn log_request(&self, unit_id: SlaveId, request: &Request) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        self.log(
            LogLevel::Debug,
            &format!(
                "-> unit={} {} addr={} qty={}",
                unit_id,
                request.function().name(),
                request.address(),
                request.quantity()
            ),
        );
    }

    pub fn log_response(&self, unit_id: SlaveId, response: &Response) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        let detail = match response {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                format!("{} bits", bits.len())
            }
            Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
                format!("{regs:?}")
            }
            Response::WriteSingleCoil { address, value } => format!("addr={address} value={value}"),
            Response::WriteSingleRegister { address, value } => {
                format!("addr={address} value={value}")
            }
            Response::WriteMultipleCoils { address, quantity }
            | Response::WriteMultipleRegisters { address, quantity } => {
                format!("addr={address} qty={quantity}")
            }
            Response::Exception { code, .. } => format!("exception 0x{code:02X}"),
        };
        self.log(
            LogLevel::Debug,
            &format!(
                "<- unit={} {} {}",
                unit_id,
                ModbusFunction::describe(response.function_code()),
                detail
            ),
        );
    }

    /// Hex dump of one frame, `direction` is e.g. "TX" or "RX"
    pub fn log_packet(&self, direction: &str, frame: &[u8]) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        self.log(
            LogLevel::Debug,
            &format!("[{}] {} bytes: {}", direction, frame.len(), format_hex(frame)),
        );
    }
}

/// Space-separated uppercase hex
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
