//! In-memory [`Port`] implementation for protocol tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Scripted serial port.
///
/// Bytes queued with [`MockPort::push_reply`] model what the device will send
/// in response to future commands; `stale` models bytes already sitting in
/// the host RX buffer, which `clear_buffers` discards. Reads with nothing
/// queued fail with `TimedOut`, like a real port whose deadline passed.
pub struct MockPort {
    /// Future device output, consumed in order.
    pub replies: VecDeque<u8>,
    /// Pending garbage discarded by `clear_buffers`.
    pub stale: VecDeque<u8>,
    /// Everything the client transmitted.
    pub tx: Vec<u8>,
    /// (pin, level) history of DTR/RTS changes.
    pub pin_ops: Vec<(&'static str, bool)>,
    /// Number of `clear_buffers` calls.
    pub drains: u32,
    timeout: Duration,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            stale: VecDeque::new(),
            tx: Vec::new(),
            pin_ops: Vec::new(),
            drains: 0,
            timeout: Duration::from_millis(10),
        }
    }

    /// Queue bytes the device will send.
    pub fn push_reply(&mut self, bytes: &[u8]) {
        self.replies.extend(bytes.iter().copied());
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.stale.pop_front().or_else(|| self.replies.pop_front()) {
            buf[0] = b;
            Ok(1)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no scripted reply",
            ))
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.stale.clear();
        self.drains += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.pin_ops.push(("dtr", level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.pin_ops.push(("rts", level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
