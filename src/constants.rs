//! Modbus TCP protocol constants
//!
//! Derived from the Modbus Application Protocol specification and the
//! Modbus Messaging on TCP/IP implementation guide:
//! - Maximum PDU size: 253 bytes (inherited from the RS485 ADU limit of 256 bytes)
//! - Register/coil limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Bytes of the MBAP header that precede the counted region.
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes.
/// The Unit ID is counted by the Length field, so it is not part of this prefix.
pub const MBAP_HEADER_LEN: usize = 6;

/// Full MBAP header including the Unit ID byte (7 bytes).
pub const FRAME_HEADER_LEN: usize = MBAP_HEADER_LEN + 1;

/// Protocol identifier carried by every Modbus TCP frame.
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Minimum MBAP length field value: Unit ID + Function Code
pub const MIN_MBAP_LENGTH: usize = 2;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Largest legal Modbus TCP ADU: 6 + 254 = 260 bytes
pub const MAX_FRAME_SIZE: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: Function Code (1) + Byte Count (1) + N × 2 ≤ 253
/// Therefore: N ≤ 125 registers
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: FC (1) + Address (2) + Quantity (2) + Byte Count (1) + N × 2 ≤ 253
/// Therefore: N ≤ 123 registers
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
///
/// Response PDU: FC (1) + Byte Count (1) + ceil(N / 8) ≤ 253
/// The Modbus protocol caps this at 2000 (0x7D0).
pub const MAX_READ_COILS: usize = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
///
/// Request PDU: FC (1) + Address (2) + Quantity (2) + Byte Count (1) + ceil(N / 8) ≤ 253
/// The Modbus protocol caps this at 1968 (0x7B0).
pub const MAX_WRITE_COILS: usize = 1968;

/// Size of every table's address space (addresses 0..=65535)
pub const ADDRESS_SPACE: usize = 65536;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Wire encoding of an ON coil in FC05
pub const COIL_ON: u16 = 0xFF00;

/// Wire encoding of an OFF coil in FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Defaults
// ============================================================================

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default per-request timeout on the client (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default server idle-connection timeout (60 seconds)
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Default upper bound on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default grace period for in-flight requests on server shutdown
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Broadcast unit identifier
pub const BROADCAST_UNIT_ID: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 6);
        assert_eq!(FRAME_HEADER_LEN, 7);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_FRAME_SIZE, 260);
    }

    #[test]
    fn test_register_limits() {
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);

        let write_pdu_size = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS * 2);
        assert!(write_pdu_size <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_coil_limits() {
        let read_coil_pdu = 1 + 1 + MAX_READ_COILS.div_ceil(8);
        assert!(read_coil_pdu <= MAX_PDU_SIZE);

        let write_coil_pdu = 1 + 2 + 2 + 1 + MAX_WRITE_COILS.div_ceil(8);
        assert!(write_coil_pdu <= MAX_PDU_SIZE);
    }
}
