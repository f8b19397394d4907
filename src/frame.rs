//! Modbus TCP frame codec
//!
//! A frame is the 7-byte MBAP header (transaction id, protocol id, length,
//! unit id) followed by the PDU. This module turns frames into typed
//! requests/responses and back, and reads whole frames off an async stream.
//!
//! Request decoding distinguishes two failure classes. When the header is
//! sound and a function code is present the server can still answer with an
//! exception, so the error carries a [`Recovered`] part. Otherwise the stream
//! can no longer be trusted and the connection must be closed.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{
    FRAME_HEADER_LEN, MAX_FRAME_SIZE, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MIN_MBAP_LENGTH,
    MODBUS_PROTOCOL_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{self, ModbusPdu};
use crate::protocol::{ModbusException, Request, Response};

/// MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (fixed to 0)
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: 0,
            unit_id,
        }
    }

    /// Parse the first 7 bytes of `buf`, no validation
    pub fn parse(buf: &[u8]) -> ModbusResult<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "MBAP header needs {} bytes, got {}",
                FRAME_HEADER_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
    }

    /// Protocol id and length field checks
    pub fn validate(&self) -> ModbusResult<()> {
        if self.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::frame(format!(
                "protocol id {} is not Modbus",
                self.protocol_id
            )));
        }
        let length = self.length as usize;
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::frame(format!(
                "MBAP length {} outside {}..={}",
                length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
            )));
        }
        Ok(())
    }

    /// Total frame size announced by the length field
    pub fn frame_len(&self) -> usize {
        MBAP_HEADER_LEN + self.length as usize
    }
}

/// Parts of a rejected request frame that still allow an exception reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovered {
    pub header: MbapHeader,
    pub function_code: u8,
    pub exception: ModbusException,
}

/// Request frame decoding failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct FrameError {
    pub reason: ModbusError,
    /// `Some` when an exception response can be sent, `None` when the
    /// connection must be closed
    pub recovered: Option<Recovered>,
}

impl FrameError {
    fn fatal(reason: ModbusError) -> Self {
        Self {
            reason,
            recovered: None,
        }
    }
}

impl From<FrameError> for ModbusError {
    fn from(err: FrameError) -> Self {
        err.reason
    }
}

fn assemble(mut header: MbapHeader, pdu: &ModbusPdu) -> Bytes {
    header.length = (pdu.len() + 1) as u16;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + pdu.len());
    header.write(&mut buf);
    buf.put_slice(pdu.as_slice());
    buf.freeze()
}

/// Split a complete frame into its validated header and PDU
pub fn split_frame(frame: &[u8]) -> ModbusResult<(MbapHeader, &[u8])> {
    let header = MbapHeader::parse(frame)?;
    header.validate()?;
    if frame.len() != header.frame_len() {
        return Err(ModbusError::frame(format!(
            "MBAP length {} announces {} bytes, frame has {}",
            header.length,
            header.frame_len(),
            frame.len()
        )));
    }
    Ok((header, &frame[FRAME_HEADER_LEN..]))
}

/// Encode a request frame
pub fn encode_request(transaction_id: u16, unit_id: u8, request: &Request) -> ModbusResult<Bytes> {
    let pdu = pdu::encode_request(request)?;
    Ok(assemble(MbapHeader::new(transaction_id, unit_id), &pdu))
}

/// Decode a request frame on the server side
pub fn decode_request(frame: &[u8]) -> Result<(MbapHeader, Request), FrameError> {
    let (header, pdu_bytes) = split_frame(frame).map_err(FrameError::fatal)?;
    let function_code = match pdu_bytes.first() {
        Some(fc) => *fc,
        None => return Err(FrameError::fatal(ModbusError::frame("empty PDU"))),
    };

    match pdu::decode_request(pdu_bytes) {
        Ok(request) => Ok((header, request)),
        Err(reason) => {
            let exception = reason.to_exception();
            Err(FrameError {
                reason,
                recovered: Some(Recovered {
                    header,
                    function_code,
                    exception,
                }),
            })
        }
    }
}

/// Encode a response frame echoing the request header.
///
/// The length field is recomputed from the PDU.
pub fn encode_response(header: &MbapHeader, response: &Response) -> ModbusResult<Bytes> {
    let pdu = pdu::encode_response(response)?;
    Ok(assemble(*header, &pdu))
}

/// Decode a response frame against the request that was sent
pub fn decode_response(request: &Request, frame: &[u8]) -> ModbusResult<(MbapHeader, Response)> {
    let (header, pdu_bytes) = split_frame(frame)?;
    let response = pdu::decode_response(request, pdu_bytes)?;
    Ok((header, response))
}

/// Read one frame from `reader`.
///
/// `buf` holds bytes received but not yet returned, so it must be reused
/// across calls on the same stream. Reading is cancel-safe: a future dropped
/// mid-frame leaves the partial frame in `buf` and the next call resumes it.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. A close in the middle of a frame is a connection error, an
/// out-of-range length field a frame error.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> ModbusResult<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let wanted = if buf.len() >= FRAME_HEADER_LEN {
            let mbap = MbapHeader::parse(&buf[..FRAME_HEADER_LEN])?;
            let length = mbap.length as usize;
            if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
                return Err(ModbusError::frame(format!(
                    "MBAP length {} outside {}..={}",
                    length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
                )));
            }
            let total = mbap.frame_len();
            debug_assert!(total <= MAX_FRAME_SIZE);
            if buf.len() >= total {
                return Ok(Some(buf.split_to(total).freeze()));
            }
            total
        } else {
            FRAME_HEADER_LEN
        };

        buf.reserve(wanted - buf.len());
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed after {} bytes of a frame", buf.len()),
            )
            .into());
        }
    }
}
