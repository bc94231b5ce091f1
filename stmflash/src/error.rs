//! Error types for stmflash.

use std::io;
use thiserror::Error;

/// Result type for stmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What is wrong with a rejected Intel-HEX line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexErrorKind {
    /// Line does not look like an Intel-HEX record at all.
    LineFormat,
    /// Declared record length does not match the physical line length.
    Length,
    /// Record checksum does not add up.
    Checksum,
    /// Record type other than Data/EOF/ELA/SLA.
    UnsupportedRecord,
    /// File ended without a type-1 EOF record.
    EofMissing,
}

impl std::fmt::Display for HexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LineFormat => "malformed line",
            Self::Length => "length mismatch",
            Self::Checksum => "bad checksum",
            Self::UnsupportedRecord => "unsupported record type",
            Self::EofMissing => "missing EOF record",
        };
        f.write_str(s)
    }
}

/// Error type for stmflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No reply within the operation's deadline.
    #[error("Timeout during {op}")]
    Timeout {
        /// Operation that was waiting for the reply.
        op: &'static str,
    },

    /// The bootloader replied with something other than ACK.
    #[error("No ACK during {op} (got {byte:#04x})")]
    Nack {
        /// Operation that expected the ACK.
        op: &'static str,
        /// The byte actually received.
        byte: u8,
    },

    /// Auto-baud entry retries exhausted.
    #[error("Could not enter bootloader mode")]
    BootloaderEntryFailed,

    /// Intel-HEX file rejected during the check pass.
    #[error("HEX error in line {line}: {kind}")]
    BadHex {
        /// 1-based line number of the offending record.
        line: u32,
        /// What was wrong with it.
        kind: HexErrorKind,
    },

    /// Read-back after a write differs from what was written.
    #[error("Verify failed at {addr:#010x} (len {len})")]
    VerifyMismatch {
        /// Page base address of the mismatching write.
        addr: u32,
        /// Length of the compared slice.
        len: usize,
    },

    /// A data byte addressed a page that was already flushed.
    #[error("Out-of-order address {addr:#010x}: page already written")]
    OutOfOrderAddress {
        /// The offending absolute address.
        addr: u32,
    },

    /// Caller violated an input constraint. Programmer error.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Device reply was structurally wrong (not a timeout, not a NACK).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No usable serial port could be picked automatically.
    #[error("Serial port detection failed: {0}")]
    PortDetection(String),
}
