//! Bootloader session state machine.
//!
//! Wraps the frame codec with the command sequences of AN3155 and tracks
//! where the conversation stands:
//!
//! ```text
//! Closed --enter()--> Primed --get()--> Ready --commands...
//! ```
//!
//! `write_unprotect` resets the target and drops the session back to
//! `Closed`; so does any protocol error. Recovery from `Closed` requires a
//! fresh bootloader entry. Nothing is retried here except the auto-baud
//! entry; callers see the first error of any other exchange.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::codec;
use crate::protocol::{Caps, ACK, AUTO_BAUD, MAX_CHUNK, NACK};

/// Deadlines and retry counts for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a command/data ACK and for each payload byte.
    pub ack_deadline: Duration,
    /// Deadline for the ACK that completes a mass erase.
    pub erase_deadline: Duration,
    /// Total auto-baud entry attempts.
    pub entry_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(1),
            erase_deadline: Duration::from_secs(35),
            entry_attempts: 4,
        }
    }
}

/// Where the bootloader conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No contact, or a protocol error invalidated the session.
    Closed,
    /// Auto-baud handshake done; capabilities not yet known.
    Primed,
    /// Capabilities known; command primitives available.
    Ready,
}

/// Mass-erase selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MassErase {
    /// Erase all of Flash.
    Global,
    /// Erase bank 1 only (extended erase bootloaders).
    Bank1,
    /// Erase bank 2 only (extended erase bootloaders).
    Bank2,
}

impl MassErase {
    /// Two-byte special selector for the extended erase command.
    fn extended_selector(self) -> u16 {
        match self {
            Self::Global => 0xFFFF,
            Self::Bank1 => 0xFFFE,
            Self::Bank2 => 0xFFFD,
        }
    }
}

/// A live conversation with the factory bootloader on one port.
pub struct BootloaderSession<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
    caps: Option<Caps>,
}

impl<P: Port> BootloaderSession<P> {
    /// Create a session over an opened port. No traffic yet.
    pub fn new(port: P) -> Self {
        Self::with_config(port, SessionConfig::default())
    }

    /// Create a session with custom deadlines.
    pub fn with_config(port: P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Closed,
            caps: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities from the last `get`, if any.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// Mutable access to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send the auto-baud byte until the bootloader ACKs.
    ///
    /// Retries up to the configured attempt count, then fails with
    /// [`Error::BootloaderEntryFailed`].
    pub fn enter(&mut self) -> Result<()> {
        self.enter_inner(false)
    }

    /// Like [`enter`](Self::enter), but tolerates a NACK reply.
    ///
    /// A bootloader that is already synchronized NACKs a second auto-baud
    /// byte; after the reset that follows WRITE_UNPROTECT that reply still
    /// means the target is listening.
    pub fn reenter(&mut self) -> Result<()> {
        self.enter_inner(true)
    }

    fn enter_inner(&mut self, accept_nack: bool) -> Result<()> {
        self.state = SessionState::Closed;

        for attempt in 1..=self.config.entry_attempts {
            debug!(
                "Auto-baud attempt {attempt}/{}",
                self.config.entry_attempts
            );
            self.port.clear_buffers()?;
            self.port.write_all_bytes(&[AUTO_BAUD])?;

            match self.port.read_byte(self.config.ack_deadline)? {
                Some(ACK) => {
                    self.state = SessionState::Primed;
                    return Ok(());
                }
                Some(NACK) if accept_nack => {
                    debug!("Bootloader NACKed re-entry; already synchronized");
                    self.state = SessionState::Primed;
                    return Ok(());
                }
                Some(byte) => debug!("Unexpected auto-baud reply {byte:#04x}"),
                None => debug!("No auto-baud reply"),
            }
        }

        Err(Error::BootloaderEntryFailed)
    }

    /// Run `GET`: discover the bootloader version and its opcode table.
    pub fn get(&mut self) -> Result<Caps> {
        if self.state == SessionState::Closed {
            return Err(Error::InvalidArgument("session not entered"));
        }
        self.closing(Self::get_inner)
    }

    fn get_inner(&mut self) -> Result<Caps> {
        let deadline = self.config.ack_deadline;

        codec::send_command(&mut self.port, crate::protocol::Command::Get as u8)?;
        codec::expect_ack(&mut self.port, "get", deadline)?;

        let count = self
            .port
            .read_byte(deadline)?
            .ok_or(Error::Timeout { op: "get" })?;
        let mut payload = vec![0u8; usize::from(count) + 1];
        codec::read_exact(&mut self.port, &mut payload, "get", deadline)?;
        codec::expect_ack(&mut self.port, "get", deadline)?;

        let caps = Caps::from_get_payload(&payload)?;
        info!(
            "Bootloader v{}.{}, erase opcode {:#04x}",
            caps.version_major(),
            caps.version_minor(),
            caps.erase
        );

        self.caps = Some(caps);
        self.state = SessionState::Ready;
        Ok(caps)
    }

    /// Read `len` bytes (1..=256) starting at `addr`.
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        if len == 0 || len > MAX_CHUNK {
            return Err(Error::InvalidArgument("read length must be 1..=256"));
        }
        let caps = self.require_ready()?;
        self.closing(|s| s.read_memory_inner(caps, addr, len))
    }

    fn read_memory_inner(&mut self, caps: Caps, addr: u32, len: usize) -> Result<Vec<u8>> {
        let deadline = self.config.ack_deadline;

        codec::send_command(&mut self.port, caps.read_memory)?;
        codec::expect_ack(&mut self.port, "read_memory", deadline)?;

        codec::send_address(&mut self.port, addr)?;
        if let Err(e) = codec::expect_ack(&mut self.port, "read_memory", deadline) {
            warn!("READ_MEMORY: address {addr:#010x} refused");
            return Err(e);
        }

        let n = (len - 1) as u8;
        self.port.write_all_bytes(&[n, !n])?;
        codec::expect_ack(&mut self.port, "read_memory", deadline)?;

        let mut data = vec![0u8; len];
        codec::read_exact(&mut self.port, &mut data, "read_memory", deadline)?;
        Ok(data)
    }

    /// Write `data` (1..=256 bytes, multiple of 4, word-aligned address).
    ///
    /// The alignment constraints are the bootloader's; violations are
    /// rejected before anything is transmitted.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_CHUNK {
            return Err(Error::InvalidArgument("write length must be 1..=256"));
        }
        if data.len() % 4 != 0 {
            return Err(Error::InvalidArgument("write length must be a multiple of 4"));
        }
        if addr % 4 != 0 {
            return Err(Error::InvalidArgument("write address must be word-aligned"));
        }
        let caps = self.require_ready()?;
        self.closing(|s| s.write_memory_inner(caps, addr, data))
    }

    fn write_memory_inner(&mut self, caps: Caps, addr: u32, data: &[u8]) -> Result<()> {
        let deadline = self.config.ack_deadline;

        codec::send_command(&mut self.port, caps.write_memory)?;
        codec::expect_ack(&mut self.port, "write_memory", deadline)?;

        codec::send_address(&mut self.port, addr)?;
        if let Err(e) = codec::expect_ack(&mut self.port, "write_memory", deadline) {
            warn!("WRITE_MEMORY: address {addr:#010x} refused");
            return Err(e);
        }

        codec::send_block(&mut self.port, data)?;
        codec::expect_ack(&mut self.port, "write_memory", deadline)
    }

    /// Disable write protection for all Flash sectors.
    ///
    /// Acknowledged twice; the second ACK means the target is about to
    /// reset, so the session drops to `Closed` and the caller must
    /// [`reenter`](Self::reenter) after letting the target settle.
    pub fn write_unprotect(&mut self) -> Result<()> {
        let caps = self.require_ready()?;
        let r = self.closing(|s| {
            let deadline = s.config.ack_deadline;
            codec::send_command(&mut s.port, caps.write_unprotect)?;
            codec::expect_ack(&mut s.port, "write_unprotect", deadline)?;
            codec::expect_ack(&mut s.port, "write_unprotect", deadline)
        });
        // success also ends the session: the device resets itself
        self.state = SessionState::Closed;
        r
    }

    /// Erase all of Flash.
    pub fn erase_all(&mut self) -> Result<()> {
        self.erase_mass(MassErase::Global)
    }

    /// Mass erase: global, or one bank on extended-erase bootloaders.
    pub fn erase_mass(&mut self, which: MassErase) -> Result<()> {
        let caps = self.require_ready()?;
        if !caps.extended_erase() && which != MassErase::Global {
            return Err(Error::InvalidArgument(
                "bank erase requires the extended erase command",
            ));
        }
        self.closing(|s| s.erase_mass_inner(caps, which))
    }

    fn erase_mass_inner(&mut self, caps: Caps, which: MassErase) -> Result<()> {
        codec::send_command(&mut self.port, caps.erase)?;
        codec::expect_ack(&mut self.port, "erase", self.config.ack_deadline)?;

        if caps.extended_erase() {
            let sel = which.extended_selector();
            let hi = (sel >> 8) as u8;
            let lo = (sel & 0xFF) as u8;
            self.port.write_all_bytes(&[hi, lo, hi ^ lo])?;
        } else {
            // global erase selector: count byte 0xFF, complement as checksum
            self.port.write_all_bytes(&[0xFF, 0x00])?;
        }

        debug!("Erase selector sent, waiting up to {:?}", self.config.erase_deadline);
        codec::expect_ack(&mut self.port, "erase", self.config.erase_deadline)
    }

    /// Erase the given Flash pages.
    ///
    /// Classic bootloaders take one-byte page numbers, at most 255 per
    /// command; extended ones take two-byte numbers, at most 0xFFF0.
    pub fn erase_pages(&mut self, pages: &[u16]) -> Result<()> {
        let caps = self.require_ready()?;
        if pages.is_empty() {
            return Err(Error::InvalidArgument("page list must not be empty"));
        }
        if caps.extended_erase() {
            if pages.len() > 0xFFF0 {
                return Err(Error::InvalidArgument("at most 0xFFF0 pages per erase"));
            }
        } else {
            if pages.len() > 255 {
                return Err(Error::InvalidArgument("at most 255 pages per erase"));
            }
            if pages.iter().any(|p| *p > 0xFF) {
                return Err(Error::InvalidArgument(
                    "classic erase page numbers must fit one byte",
                ));
            }
        }
        self.closing(|s| s.erase_pages_inner(caps, pages))
    }

    fn erase_pages_inner(&mut self, caps: Caps, pages: &[u16]) -> Result<()> {
        codec::send_command(&mut self.port, caps.erase)?;
        codec::expect_ack(&mut self.port, "erase", self.config.ack_deadline)?;

        let mut frame = Vec::with_capacity(2 * pages.len() + 3);
        if caps.extended_erase() {
            let count = (pages.len() - 1) as u16;
            frame.extend_from_slice(&count.to_be_bytes());
            for p in pages {
                frame.extend_from_slice(&p.to_be_bytes());
            }
        } else {
            frame.push((pages.len() - 1) as u8);
            frame.extend(pages.iter().map(|p| *p as u8));
        }
        frame.push(codec::xor_checksum(0, &frame));
        self.port.write_all_bytes(&frame)?;

        codec::expect_ack(&mut self.port, "erase", self.config.erase_deadline)
    }

    fn require_ready(&self) -> Result<Caps> {
        match (self.state, self.caps) {
            (SessionState::Ready, Some(caps)) => Ok(caps),
            _ => Err(Error::InvalidArgument("session not ready")),
        }
    }

    /// Run a protocol exchange; any failure invalidates the session.
    fn closing<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let r = f(self);
        if r.is_err() {
            self.state = SessionState::Closed;
        }
        r
    }
}
