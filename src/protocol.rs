//! Modbus protocol definitions
//!
//! Function codes, exception codes, the four data tables, and the typed
//! request/response PDUs exchanged between client and server.
//!
//! Requests and responses are separate types because the wire layout of a
//! function differs by direction (a read request carries address + quantity,
//! the response carries byte count + values).

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::{
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Modbus function codes supported by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = FC_READ_COILS,
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    /// Table addressed by this function
    pub fn table(self) -> Table {
        match self {
            Self::ReadCoils | Self::WriteSingleCoil | Self::WriteMultipleCoils => Table::Coils,
            Self::ReadDiscreteInputs => Table::DiscreteInputs,
            Self::ReadHoldingRegisters
            | Self::WriteSingleRegister
            | Self::WriteMultipleRegisters => Table::HoldingRegisters,
            Self::ReadInputRegisters => Table::InputRegisters,
        }
    }

    /// Human-readable name, also accepts raw codes with the exception bit set
    pub fn describe(fc: u8) -> &'static str {
        match Self::from_u8(fc & 0x7F) {
            Ok(f) => f.name(),
            Err(_) => "Unknown Function",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::ServerDeviceFailure => "Server Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server Device Busy",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetDeviceFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

/// The four Modbus data tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Table {
    /// Read/write bits (FC01, FC05, FC15)
    Coils,
    /// Bits readable over Modbus (FC02)
    DiscreteInputs,
    /// Read/write 16-bit registers (FC03, FC06, FC16)
    HoldingRegisters,
    /// 16-bit registers readable over Modbus (FC04)
    InputRegisters,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Coils,
        Table::DiscreteInputs,
        Table::HoldingRegisters,
        Table::InputRegisters,
    ];

    /// Whether cells are single bits
    pub fn is_bit_table(self) -> bool {
        matches!(self, Table::Coils | Table::DiscreteInputs)
    }

    /// Whether Modbus clients may write this table
    pub fn is_writable(self) -> bool {
        matches!(self, Table::Coils | Table::HoldingRegisters)
    }

    /// Largest quantity a single read may request
    pub fn max_read_quantity(self) -> usize {
        if self.is_bit_table() {
            MAX_READ_COILS
        } else {
            MAX_READ_REGISTERS
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Coils => "coils",
            Table::DiscreteInputs => "discrete inputs",
            Table::HoldingRegisters => "holding registers",
            Table::InputRegisters => "input registers",
        };
        f.write_str(name)
    }
}

/// Values of one table range, bit or register flavoured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableValues {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
}

impl TableValues {
    pub fn len(&self) -> usize {
        match self {
            TableValues::Bits(v) => v.len(),
            TableValues::Registers(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bits(self) -> ModbusResult<Vec<bool>> {
        match self {
            TableValues::Bits(v) => Ok(v),
            TableValues::Registers(_) => Err(ModbusError::invalid_data(
                "expected bit values, got registers",
            )),
        }
    }

    pub fn into_registers(self) -> ModbusResult<Vec<u16>> {
        match self {
            TableValues::Registers(v) => Ok(v),
            TableValues::Bits(_) => Err(ModbusError::invalid_data(
                "expected register values, got bits",
            )),
        }
    }
}

/// Decoded request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    /// Read request for `quantity` cells of `table`
    pub fn read(table: Table, address: u16, quantity: u16) -> Self {
        match table {
            Table::Coils => Request::ReadCoils { address, quantity },
            Table::DiscreteInputs => Request::ReadDiscreteInputs { address, quantity },
            Table::HoldingRegisters => Request::ReadHoldingRegisters { address, quantity },
            Table::InputRegisters => Request::ReadInputRegisters { address, quantity },
        }
    }

    /// Write request for `values` into `table`.
    ///
    /// Single values use FC05/FC06, longer runs FC15/FC16. Tables that are
    /// read-only over Modbus are rejected.
    pub fn write(table: Table, address: u16, values: TableValues) -> ModbusResult<Self> {
        if !table.is_writable() {
            return Err(ModbusError::invalid_data(format!(
                "{table} cannot be written over Modbus"
            )));
        }
        let request = match (table, values) {
            (Table::Coils, TableValues::Bits(mut v)) if v.len() == 1 => {
                Request::WriteSingleCoil {
                    address,
                    value: v.remove(0),
                }
            }
            (Table::Coils, TableValues::Bits(v)) => Request::WriteMultipleCoils { address, values: v },
            (Table::HoldingRegisters, TableValues::Registers(v)) if v.len() == 1 => {
                Request::WriteSingleRegister {
                    address,
                    value: v[0],
                }
            }
            (Table::HoldingRegisters, TableValues::Registers(v)) => {
                Request::WriteMultipleRegisters { address, values: v }
            }
            (table, _) => {
                return Err(ModbusError::invalid_data(format!(
                    "value kind does not match {table}"
                )))
            }
        };
        Ok(request)
    }

    pub fn function(&self) -> ModbusFunction {
        match self {
            Request::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Request::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            Request::ReadCoils { address, .. }
            | Request::ReadDiscreteInputs { address, .. }
            | Request::ReadHoldingRegisters { address, .. }
            | Request::ReadInputRegisters { address, .. }
            | Request::WriteSingleCoil { address, .. }
            | Request::WriteSingleRegister { address, .. }
            | Request::WriteMultipleCoils { address, .. }
            | Request::WriteMultipleRegisters { address, .. } => *address,
        }
    }

    /// Number of cells touched by the request
    pub fn quantity(&self) -> usize {
        match self {
            Request::ReadCoils { quantity, .. }
            | Request::ReadDiscreteInputs { quantity, .. }
            | Request::ReadHoldingRegisters { quantity, .. }
            | Request::ReadInputRegisters { quantity, .. } => *quantity as usize,
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. } => 1,
            Request::WriteMultipleCoils { values, .. } => values.len(),
            Request::WriteMultipleRegisters { values, .. } => values.len(),
        }
    }

    /// Check quantity limits mandated by the protocol
    pub fn validate(&self) -> ModbusResult<()> {
        let quantity = self.quantity();
        let max = match self {
            Request::ReadCoils { .. }
            | Request::ReadDiscreteInputs { .. }
            | Request::ReadHoldingRegisters { .. }
            | Request::ReadInputRegisters { .. } => self.function().table().max_read_quantity(),
            Request::WriteMultipleCoils { .. } => MAX_WRITE_COILS,
            Request::WriteMultipleRegisters { .. } => MAX_WRITE_REGISTERS,
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. } => return Ok(()),
        };
        if quantity == 0 || quantity > max {
            return Err(ModbusError::invalid_data(format!(
                "{}: quantity {} outside 1..={}",
                self.function().name(),
                quantity,
                max
            )));
        }
        Ok(())
    }
}

/// Decoded response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    /// Exception response: original function code (without the 0x80 flag) and code
    Exception { function: u8, code: u8 },
}

impl Response {
    pub fn exception(function: u8, exception: ModbusException) -> Self {
        Response::Exception {
            function: function & 0x7F,
            code: exception.to_u8(),
        }
    }

    /// Function code as it appears on the wire, exception flag included
    pub fn function_code(&self) -> u8 {
        match self {
            Response::ReadCoils(_) => FC_READ_COILS,
            Response::ReadDiscreteInputs(_) => FC_READ_DISCRETE_INPUTS,
            Response::ReadHoldingRegisters(_) => FC_READ_HOLDING_REGISTERS,
            Response::ReadInputRegisters(_) => FC_READ_INPUT_REGISTERS,
            Response::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            Response::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Response::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            Response::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
            Response::Exception { function, .. } => function | 0x80,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Response::Exception { .. })
    }

    /// Turn an exception response into an error, pass other responses through
    pub fn into_result(self) -> ModbusResult<Self> {
        match self {
            Response::Exception { function, code } => Err(ModbusError::exception(function, code)),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_roundtrip() {
        for fc in [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            assert_eq!(ModbusFunction::from_u8(fc).unwrap().to_u8(), fc);
        }
        assert!(matches!(
            ModbusFunction::from_u8(0x2B),
            Err(ModbusError::InvalidFunction { code: 0x2B })
        ));
        assert_eq!(ModbusFunction::describe(0x83), "Read Holding Registers");
    }

    #[test]
    fn test_request_write_selects_function() {
        let single = Request::write(Table::HoldingRegisters, 10, TableValues::Registers(vec![999]))
            .unwrap();
        assert_eq!(
            single,
            Request::WriteSingleRegister {
                address: 10,
                value: 999
            }
        );

        let multi =
            Request::write(Table::Coils, 3, TableValues::Bits(vec![true, false])).unwrap();
        assert_eq!(multi.function(), ModbusFunction::WriteMultipleCoils);
        assert_eq!(multi.quantity(), 2);
    }

    #[test]
    fn test_request_write_rejects_read_only_tables() {
        let err = Request::write(Table::InputRegisters, 0, TableValues::Registers(vec![1]))
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));

        let err = Request::write(Table::Coils, 0, TableValues::Registers(vec![1])).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
    }

    #[test]
    fn test_request_validate_limits() {
        assert!(Request::read(Table::HoldingRegisters, 0, 125).validate().is_ok());
        assert!(Request::read(Table::HoldingRegisters, 0, 126).validate().is_err());
        assert!(Request::read(Table::Coils, 0, 2000).validate().is_ok());
        assert!(Request::read(Table::Coils, 0, 0).validate().is_err());

        let too_many = Request::WriteMultipleRegisters {
            address: 0,
            values: vec![0; 124],
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_exception_response() {
        let resp = Response::exception(0x03, ModbusException::IllegalDataAddress);
        assert_eq!(resp.function_code(), 0x83);
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.exception_code(), Some(0x02));
    }
}
