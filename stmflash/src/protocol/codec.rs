//! Frame encoding for the UART bootloader.
//!
//! Pure functions over a [`Port`]; no retained state. Each frame kind and
//! its checksum rule:
//!
//! ```text
//! command:  [ c, ~c ]
//! address:  [ a3, a2, a1, a0, a3^a2^a1^a0 ]        (MSB first)
//! block:    [ N-1, d0 .. dN-1, (N-1)^d0^..^dN-1 ]  (1 <= N <= 256)
//! reply:    ACK (0x79) | NACK (0x1F)
//! ```

use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{ACK, MAX_CHUNK};

/// XOR of `seed` and every byte of `data`.
pub fn xor_checksum(seed: u8, data: &[u8]) -> u8 {
    data.iter().fold(seed, |acc, b| acc ^ b)
}

/// Send a command byte followed by its complement.
///
/// Pending input is discarded first so a stale byte cannot be mistaken for
/// the reply.
pub fn send_command<P: Port>(port: &mut P, cmd: u8) -> Result<()> {
    trace!("-> command {cmd:#04x}");
    port.clear_buffers()?;
    port.write_all_bytes(&[cmd, !cmd])?;
    Ok(())
}

/// Send a 32-bit address, MSB first, with its XOR byte.
pub fn send_address<P: Port>(port: &mut P, addr: u32) -> Result<()> {
    let mut frame = Vec::with_capacity(5);
    frame.write_u32::<BigEndian>(addr)?;
    frame.push(xor_checksum(0, &frame));

    trace!("-> address {addr:#010x}");
    port.write_all_bytes(&frame)?;
    Ok(())
}

/// Send a length-prefixed data block with its XOR checksum.
pub fn send_block<P: Port>(port: &mut P, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > MAX_CHUNK {
        return Err(Error::InvalidArgument("block length must be 1..=256"));
    }

    let n = (data.len() - 1) as u8;
    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(n);
    frame.extend_from_slice(data);
    frame.push(xor_checksum(n, data));

    trace!("-> block of {} bytes", data.len());
    port.write_all_bytes(&frame)?;
    Ok(())
}

/// Wait for an ACK byte, at most `deadline` after the last transmitted byte.
///
/// Any byte other than ACK is a NACK for error-reporting purposes; silence
/// is a timeout. `op` names the operation in the resulting error.
pub fn expect_ack<P: Port>(port: &mut P, op: &'static str, deadline: Duration) -> Result<()> {
    match port.read_byte(deadline)? {
        Some(ACK) => {
            trace!("<- ACK ({op})");
            Ok(())
        }
        Some(byte) => Err(Error::Nack { op, byte }),
        None => Err(Error::Timeout { op }),
    }
}

/// Read exactly `buf.len()` bytes, each within `per_byte` of the previous.
pub fn read_exact<P: Port>(
    port: &mut P,
    buf: &mut [u8],
    op: &'static str,
    per_byte: Duration,
) -> Result<()> {
    for slot in buf.iter_mut() {
        *slot = port.read_byte(per_byte)?.ok_or(Error::Timeout { op })?;
    }
    Ok(())
}
