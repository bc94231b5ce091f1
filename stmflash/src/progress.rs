//! Progress reporting boundary.
//!
//! The flasher narrates a flash job as a monotonic stream of short text
//! fragments. Sinks are free to batch; `flush` marks the points where a
//! batching sink should push what it has. `yield_hint` is the explicit
//! suspension point for hosts that multiplex other duties on the flashing
//! thread — it is called at least once per page and once per 256 bytes of
//! log output.

use std::io::Write;

/// Receives human-readable progress and failure lines from a flash job.
pub trait ProgressSink {
    /// Append a raw text fragment (no newline is implied).
    fn text(&mut self, s: &str);

    /// Append a full line.
    fn line(&mut self, s: &str) {
        self.text(s);
        self.text("\n");
    }

    /// Hint that buffered output should be delivered now.
    fn flush(&mut self) {}

    /// Cooperative suspension point; called between pages and during long
    /// log dumps.
    fn yield_hint(&mut self) {}
}

/// Sink that writes progress to any [`Write`] target.
pub struct WriteSink<W: Write> {
    out: W,
}

impl<W: Write> WriteSink<W> {
    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ProgressSink for WriteSink<W> {
    fn text(&mut self, s: &str) {
        let _ = self.out.write_all(s.as_bytes());
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn text(&mut self, _s: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sink_accumulates() {
        let mut buf = Vec::new();
        {
            let mut sink = WriteSink::new(&mut buf);
            sink.line("checking image");
            sink.text(".");
            sink.text(".");
            sink.flush();
        }
        assert_eq!(buf, b"checking image\n..");
    }

    #[test]
    fn test_null_sink_ignores() {
        let mut sink = NullSink;
        sink.line("nothing");
        sink.flush();
        sink.yield_hint();
    }
}
