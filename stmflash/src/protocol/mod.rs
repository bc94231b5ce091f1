//! STM32 factory bootloader protocol (AN3155).
//!
//! Every request is a command byte followed by its bitwise complement;
//! every parameter group is followed by an XOR checksum; every exchange is
//! closed by a single ACK (0x79) or NACK (0x1F) byte. The [`codec`] module
//! does the framing; [`Caps`] holds the per-target opcode table reported by
//! the `GET` command.

pub mod codec;

use crate::error::{Error, Result};

/// Auto-baud byte sent once so the bootloader can measure the host baud rate.
pub const AUTO_BAUD: u8 = 0x7F;

/// Positive bootloader reply.
pub const ACK: u8 = 0x79;

/// Negative bootloader reply.
pub const NACK: u8 = 0x1F;

/// Maximum payload of a single READ_MEMORY / WRITE_MEMORY transfer.
pub const MAX_CHUNK: usize = 256;

/// Bootloader command opcodes.
///
/// After the first `GET`, opcodes are taken from [`Caps`], never from this
/// table — a target is free to relocate commands. The enum exists for the
/// initial probe and for telling the two erase flavors apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Gets the version and the allowed commands supported by the bootloader.
    Get = 0x00,

    /// Gets the bootloader version and the Read Protection status.
    GetVersion = 0x01,

    /// Gets the chip ID.
    GetId = 0x02,

    /// Reads up to 256 bytes of memory starting from a given address.
    ReadMemory = 0x11,

    /// Jumps to user application code in Flash or SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to RAM or Flash starting from a given address.
    WriteMemory = 0x31,

    /// Erases from one to all Flash pages (one-byte page numbers).
    Erase = 0x43,

    /// Erases Flash pages using two-byte page numbers (bootloader v3.0+).
    ExtendedErase = 0x44,

    /// Enables write protection for some sectors.
    WriteProtect = 0x63,

    /// Disables write protection for all Flash sectors.
    WriteUnprotect = 0x73,

    /// Enables read protection.
    ReadoutProtect = 0x82,

    /// Disables read protection.
    ReadoutUnprotect = 0x92,
}

impl Command {
    /// The complement byte transmitted right after the command byte.
    pub fn complement(self) -> u8 {
        !(self as u8)
    }
}

/// Number of bytes in a full `GET` capability payload:
/// one version byte plus eleven command opcodes.
pub const CAPS_LEN: usize = 12;

/// Per-target capability record discovered by `GET`.
///
/// Created once per flashing session right after auto-baud entry and
/// read-only afterwards. The opcodes appear in the payload in the fixed
/// order GET, GET_VERSION, GET_ID, READ_MEM, GO, WRITE_MEM, ERASE,
/// WRITE_PROTECT, WRITE_UNPROTECT, READOUT_PROTECT, READOUT_UNPROTECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps {
    /// Bootloader version, packed BCD (0x31 = v3.1).
    pub version: u8,
    /// GET opcode.
    pub get: u8,
    /// GET_VERSION opcode.
    pub get_version: u8,
    /// GET_ID opcode.
    pub get_id: u8,
    /// READ_MEMORY opcode.
    pub read_memory: u8,
    /// GO opcode.
    pub go: u8,
    /// WRITE_MEMORY opcode.
    pub write_memory: u8,
    /// ERASE opcode: `0x43` classic or `0x44` extended.
    pub erase: u8,
    /// WRITE_PROTECT opcode.
    pub write_protect: u8,
    /// WRITE_UNPROTECT opcode.
    pub write_unprotect: u8,
    /// READOUT_PROTECT opcode.
    pub readout_protect: u8,
    /// READOUT_UNPROTECT opcode.
    pub readout_unprotect: u8,
}

impl Caps {
    /// Parse the `GET` reply payload (version byte + opcode list).
    pub fn from_get_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < CAPS_LEN {
            return Err(Error::Protocol(format!(
                "GET returned {} capability bytes, expected at least {CAPS_LEN}",
                payload.len()
            )));
        }

        Ok(Self {
            version: payload[0],
            get: payload[1],
            get_version: payload[2],
            get_id: payload[3],
            read_memory: payload[4],
            go: payload[5],
            write_memory: payload[6],
            erase: payload[7],
            write_protect: payload[8],
            write_unprotect: payload[9],
            readout_protect: payload[10],
            readout_unprotect: payload[11],
        })
    }

    /// Bootloader major version digit.
    pub fn version_major(&self) -> u8 {
        self.version >> 4
    }

    /// Bootloader minor version digit.
    pub fn version_minor(&self) -> u8 {
        self.version & 0x0F
    }

    /// Whether the target uses the two-byte-addressing erase command.
    pub fn extended_erase(&self) -> bool {
        self.erase == Command::ExtendedErase as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A v3.1 bootloader payload with extended erase, as a real F4 reports it.
    const GET_PAYLOAD_EXT: [u8; 12] = [
        0x31, 0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x44, 0x63, 0x73, 0x82, 0x92,
    ];

    #[test]
    fn test_command_complement() {
        assert_eq!(Command::Get.complement(), 0xFF);
        assert_eq!(Command::WriteMemory.complement(), 0xCE);
        assert_eq!(Command::Erase.complement(), 0xBC);
        assert_eq!(Command::ExtendedErase.complement(), 0xBB);
    }

    #[test]
    fn test_caps_parse() {
        let caps = Caps::from_get_payload(&GET_PAYLOAD_EXT).unwrap();
        assert_eq!(caps.version_major(), 3);
        assert_eq!(caps.version_minor(), 1);
        assert_eq!(caps.write_memory, 0x31);
        assert_eq!(caps.read_memory, 0x11);
        assert_eq!(caps.write_unprotect, 0x73);
        assert!(caps.extended_erase());
    }

    #[test]
    fn test_caps_classic_erase() {
        let mut payload = GET_PAYLOAD_EXT;
        payload[7] = 0x43;
        let caps = Caps::from_get_payload(&payload).unwrap();
        assert!(!caps.extended_erase());
        assert_eq!(caps.erase, Command::Erase as u8);
    }

    #[test]
    fn test_caps_short_payload_rejected() {
        let err = Caps::from_get_payload(&GET_PAYLOAD_EXT[..8]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
