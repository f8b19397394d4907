//! Modbus PDU buffer, builder and reader
//!
//! The PDU is the function code plus its data, without the MBAP header.
//! A fixed-size stack array holds it, since no legal PDU exceeds
//! [`MAX_PDU_SIZE`]. [`PduBuilder`] writes fields, [`PduReader`] consumes
//! them, and the `encode_*`/`decode_*` functions map typed
//! [`Request`]/[`Response`] values to and from the wire layout.

use tracing::debug;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, Request, Response};

/// PDU with a stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::frame("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.extend(&value.to_be_bytes())
    }

    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::frame(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for ModbusPdu {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn word(mut self, value: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Byte count followed by big-endian registers
    pub fn registers(mut self, values: &[u16]) -> ModbusResult<Self> {
        self.pdu.push(byte_count(values.len() * 2)?)?;
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    /// Byte count followed by LSB-first packed bits
    pub fn bits(mut self, values: &[bool]) -> ModbusResult<Self> {
        let packed = pack_bits(values);
        self.pdu.push(byte_count(packed.len())?)?;
        self.pdu.extend(&packed)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }
}

fn byte_count(len: usize) -> ModbusResult<u8> {
    u8::try_from(len).map_err(|_| ModbusError::frame(format!("byte count {len} exceeds 255")))
}

/// Sequential reader over a received PDU
pub struct PduReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PduReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn u8(&mut self) -> ModbusResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> ModbusResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn bytes(&mut self, n: usize) -> ModbusResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ModbusError::frame(format!(
                "PDU truncated: need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Fail if unread bytes remain
    pub fn finish(self) -> ModbusResult<()> {
        if self.remaining() != 0 {
            return Err(ModbusError::frame(format!(
                "{} trailing bytes after PDU",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Pack bools LSB-first, unused high bits of the last byte are zero
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len().div_ceil(8)];
    for (i, &value) in values.iter().enumerate() {
        if value {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` LSB-first bits
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).map(|b| b & (1 << (i % 8)) != 0).unwrap_or(false))
        .collect()
}

fn check_quantity(quantity: u16, max: usize, function: u8) -> ModbusResult<()> {
    if quantity == 0 || quantity as usize > max {
        return Err(ModbusError::invalid_data(format!(
            "{}: quantity {} outside 1..={}",
            ModbusFunction::describe(function),
            quantity,
            max
        )));
    }
    Ok(())
}

fn coil_from_wire(value: u16) -> ModbusResult<bool> {
    match value {
        COIL_ON => Ok(true),
        COIL_OFF => Ok(false),
        other => Err(ModbusError::invalid_data(format!(
            "coil value 0x{other:04X} is neither 0xFF00 nor 0x0000"
        ))),
    }
}

fn coil_to_wire(value: bool) -> u16 {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

fn quantity_u16(len: usize) -> ModbusResult<u16> {
    u16::try_from(len).map_err(|_| ModbusError::invalid_data(format!("quantity {len} too large")))
}

/// Encode a request PDU. Quantity limits are checked first.
pub fn encode_request(request: &Request) -> ModbusResult<ModbusPdu> {
    request.validate()?;
    let fc = request.function().to_u8();
    let builder = PduBuilder::new().function_code(fc)?;
    let pdu = match request {
        Request::ReadCoils { address, quantity }
        | Request::ReadDiscreteInputs { address, quantity }
        | Request::ReadHoldingRegisters { address, quantity }
        | Request::ReadInputRegisters { address, quantity } => {
            builder.address(*address)?.quantity(*quantity)?.build()
        }
        Request::WriteSingleCoil { address, value } => {
            builder.address(*address)?.word(coil_to_wire(*value))?.build()
        }
        Request::WriteSingleRegister { address, value } => {
            builder.address(*address)?.word(*value)?.build()
        }
        Request::WriteMultipleCoils { address, values } => builder
            .address(*address)?
            .quantity(quantity_u16(values.len())?)?
            .bits(values)?
            .build(),
        Request::WriteMultipleRegisters { address, values } => builder
            .address(*address)?
            .quantity(quantity_u16(values.len())?)?
            .registers(values)?
            .build(),
    };
    debug!(
        "Request PDU built: FC={:02X} ({}), len={}",
        fc,
        ModbusFunction::describe(fc),
        pdu.len()
    );
    Ok(pdu)
}

/// Decode a request PDU received by a server.
///
/// Error kinds select the exception sent back: an unknown function code is
/// `InvalidFunction`, a bad quantity, byte count or coil value is
/// `InvalidData`, a short or over-long payload is `Frame`.
pub fn decode_request(pdu: &[u8]) -> ModbusResult<Request> {
    let mut reader = PduReader::new(pdu);
    let fc = reader.u8()?;
    let function = ModbusFunction::from_u8(fc)?;

    let request = match function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            let address = reader.u16()?;
            let quantity = reader.u16()?;
            let max = if function.table().is_bit_table() {
                MAX_READ_COILS
            } else {
                MAX_READ_REGISTERS
            };
            check_quantity(quantity, max, fc)?;
            Request::read(function.table(), address, quantity)
        }
        ModbusFunction::WriteSingleCoil => {
            let address = reader.u16()?;
            let value = coil_from_wire(reader.u16()?)?;
            Request::WriteSingleCoil { address, value }
        }
        ModbusFunction::WriteSingleRegister => {
            let address = reader.u16()?;
            let value = reader.u16()?;
            Request::WriteSingleRegister { address, value }
        }
        ModbusFunction::WriteMultipleCoils => {
            let address = reader.u16()?;
            let quantity = reader.u16()?;
            check_quantity(quantity, MAX_WRITE_COILS, fc)?;
            let count = reader.u8()? as usize;
            let expected = (quantity as usize).div_ceil(8);
            if count != expected {
                return Err(ModbusError::invalid_data(format!(
                    "byte count {count} does not match {quantity} coils (expected {expected})"
                )));
            }
            let packed = reader.bytes(count)?;
            Request::WriteMultipleCoils {
                address,
                values: unpack_bits(packed, quantity as usize),
            }
        }
        ModbusFunction::WriteMultipleRegisters => {
            let address = reader.u16()?;
            let quantity = reader.u16()?;
            check_quantity(quantity, MAX_WRITE_REGISTERS, fc)?;
            let count = reader.u8()? as usize;
            if count != quantity as usize * 2 {
                return Err(ModbusError::invalid_data(format!(
                    "byte count {count} does not match {quantity} registers"
                )));
            }
            let values = reader
                .bytes(count)?
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            Request::WriteMultipleRegisters { address, values }
        }
    };
    reader.finish()?;
    Ok(request)
}

/// Encode a response PDU on the server side
pub fn encode_response(response: &Response) -> ModbusResult<ModbusPdu> {
    let builder = PduBuilder::new().function_code(response.function_code())?;
    let pdu = match response {
        Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
            builder.bits(bits)?.build()
        }
        Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
            builder.registers(regs)?.build()
        }
        Response::WriteSingleCoil { address, value } => {
            builder.address(*address)?.word(coil_to_wire(*value))?.build()
        }
        Response::WriteSingleRegister { address, value } => {
            builder.address(*address)?.word(*value)?.build()
        }
        Response::WriteMultipleCoils { address, quantity }
        | Response::WriteMultipleRegisters { address, quantity } => {
            builder.address(*address)?.quantity(*quantity)?.build()
        }
        Response::Exception { code, .. } => builder.byte(*code)?.build(),
    };
    Ok(pdu)
}

/// Decode a response PDU against the request that produced it.
///
/// The function code, byte count and write echo must all match the request;
/// anything else is a protocol violation by the server.
pub fn decode_response(request: &Request, pdu: &[u8]) -> ModbusResult<Response> {
    let mut reader = PduReader::new(pdu);
    let fc = reader.u8()?;
    let expected_fc = request.function().to_u8();

    if fc & EXCEPTION_FLAG != 0 {
        if fc & !EXCEPTION_FLAG != expected_fc {
            return Err(ModbusError::protocol(format!(
                "exception for FC={:02X} in reply to FC={:02X}",
                fc & !EXCEPTION_FLAG,
                expected_fc
            )));
        }
        let code = reader.u8()?;
        reader.finish()?;
        return Ok(Response::Exception {
            function: expected_fc,
            code,
        });
    }

    if fc != expected_fc {
        return Err(ModbusError::protocol(format!(
            "response FC={fc:02X} does not match request FC={expected_fc:02X}"
        )));
    }

    let response = match request {
        Request::ReadCoils { quantity, .. } | Request::ReadDiscreteInputs { quantity, .. } => {
            let count = reader.u8()? as usize;
            let expected = (*quantity as usize).div_ceil(8);
            if count != expected {
                return Err(ModbusError::protocol(format!(
                    "byte count {count} for {quantity} bits (expected {expected})"
                )));
            }
            let bits = unpack_bits(reader.bytes(count)?, *quantity as usize);
            match request {
                Request::ReadCoils { .. } => Response::ReadCoils(bits),
                _ => Response::ReadDiscreteInputs(bits),
            }
        }
        Request::ReadHoldingRegisters { quantity, .. }
        | Request::ReadInputRegisters { quantity, .. } => {
            let count = reader.u8()? as usize;
            if count != *quantity as usize * 2 {
                return Err(ModbusError::protocol(format!(
                    "byte count {count} for {quantity} registers"
                )));
            }
            let regs = reader
                .bytes(count)?
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            match request {
                Request::ReadHoldingRegisters { .. } => Response::ReadHoldingRegisters(regs),
                _ => Response::ReadInputRegisters(regs),
            }
        }
        Request::WriteSingleCoil { address, value } => {
            let echo_addr = reader.u16()?;
            let echo_value = coil_from_wire(reader.u16()?)
                .map_err(|e| ModbusError::protocol(e.to_string()))?;
            expect_echo(*address, echo_addr, "address")?;
            if echo_value != *value {
                return Err(ModbusError::protocol("write single coil echo value mismatch"));
            }
            Response::WriteSingleCoil {
                address: echo_addr,
                value: echo_value,
            }
        }
        Request::WriteSingleRegister { address, value } => {
            let echo_addr = reader.u16()?;
            let echo_value = reader.u16()?;
            expect_echo(*address, echo_addr, "address")?;
            expect_echo(*value, echo_value, "value")?;
            Response::WriteSingleRegister {
                address: echo_addr,
                value: echo_value,
            }
        }
        Request::WriteMultipleCoils { address, values } => {
            let (echo_addr, echo_qty) = read_multi_echo(&mut reader, *address, values.len())?;
            Response::WriteMultipleCoils {
                address: echo_addr,
                quantity: echo_qty,
            }
        }
        Request::WriteMultipleRegisters { address, values } => {
            let (echo_addr, echo_qty) = read_multi_echo(&mut reader, *address, values.len())?;
            Response::WriteMultipleRegisters {
                address: echo_addr,
                quantity: echo_qty,
            }
        }
    };
    reader.finish()?;
    Ok(response)
}

fn read_multi_echo(reader: &mut PduReader<'_>, address: u16, len: usize) -> ModbusResult<(u16, u16)> {
    let echo_addr = reader.u16()?;
    let echo_qty = reader.u16()?;
    expect_echo(address, echo_addr, "address")?;
    expect_echo(quantity_u16(len)?, echo_qty, "quantity")?;
    Ok((echo_addr, echo_qty))
}

fn expect_echo(sent: u16, echoed: u16, field: &str) -> ModbusResult<()> {
    if sent != echoed {
        return Err(ModbusError::protocol(format!(
            "write echo {field} mismatch: sent {sent}, got {echoed}"
        )));
    }
    Ok(())
}
