//! Flash job orchestration.
//!
//! A job runs in two passes over the same HEX file: a *check* pass that only
//! parses and assembles pages (catching file problems before the first
//! erase), and a *write* pass that sends each page and reads it back for a
//! byte-exact compare. Between the passes the target is brought up:
//! bootloader entry, capability probe, write-unprotect, mass erase.
//!
//! Every step aborts the job on first error; there is no partial-success
//! recovery. The target is left in bootloader mode — running user code is a
//! separate [`Flasher::reset_run`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::boot::BootControl;
use crate::error::{Error, Result};
use crate::image::hex::{HexParser, Record};
use crate::image::page::{PageAssembler, WriteJob};
use crate::port::Port;
use crate::progress::ProgressSink;
use crate::session::{BootloaderSession, SessionConfig};

/// Knobs for a flash job.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Session deadlines and retry counts.
    pub session: SessionConfig,
    /// How long the target gets to reset after WRITE_UNPROTECT.
    pub unprotect_settle: Duration,
    /// Progress dots per output row.
    pub dots_per_row: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            unprotect_settle: Duration::from_millis(500),
            dots_per_row: 80,
        }
    }
}

/// Outcome of a check pass.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// HEX lines consumed.
    pub lines_read: u32,
    /// Payload characters consumed (line terminators excluded).
    pub bytes_read: u64,
    /// Pages the image assembles into.
    pub pages: u32,
    /// Bytes a write pass would transmit (page lengths after rounding).
    pub image_bytes: u64,
    /// Lowest data address, inclusive. `u32::MAX` if the image is empty.
    pub address_min: u32,
    /// Highest data address, inclusive. `0` if the image is empty.
    pub address_max: u32,
    /// Entry point from a type-5 record, if present.
    pub entry_point: Option<u32>,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

/// Outcome of a full flash job.
#[derive(Debug, Clone)]
pub struct FlashReport {
    /// The preceding check pass.
    pub check: CheckReport,
    /// Pages written and verified.
    pub pages_written: u32,
    /// Bytes written (and read back).
    pub bytes_written: u64,
    /// Verify mismatches seen (the job aborts on the first).
    pub verify_failures: u32,
    /// Wall time of the write pass.
    pub write_elapsed: Duration,
    /// Bootloader version as (major, minor).
    pub bootloader_version: (u8, u8),
}

#[derive(Default)]
struct WriteCounters {
    pages: u32,
    bytes: u64,
    verify_failures: u32,
}

/// The flash job orchestrator: owns the session and the boot control for the
/// duration of a job.
pub struct Flasher<P: Port, B: BootControl<P>> {
    session: BootloaderSession<P>,
    boot: B,
    config: FlashConfig,
}

impl<P: Port, B: BootControl<P>> Flasher<P, B> {
    /// Create a flasher with default configuration.
    pub fn new(port: P, boot: B) -> Self {
        Self::with_config(port, boot, FlashConfig::default())
    }

    /// Create a flasher with custom configuration.
    pub fn with_config(port: P, boot: B, config: FlashConfig) -> Self {
        let session = BootloaderSession::with_config(port, config.session.clone());
        Self {
            session,
            boot,
            config,
        }
    }

    /// Consume the flasher and return the port.
    pub fn into_port(self) -> P {
        self.session.into_port()
    }

    /// Parse-only pass: validate the HEX file and size up the image.
    ///
    /// Nothing is transmitted. Address gaps are reported through `sink` as
    /// informational lines; they are normal for images with separate
    /// vector/data sections.
    pub fn check<S: ProgressSink>(&mut self, hex_path: &Path, sink: &mut S) -> Result<CheckReport> {
        check_hex(hex_path, sink)
    }

    /// Flash `hex_path` and verify every page by reading it back.
    pub fn flash<S: ProgressSink>(&mut self, hex_path: &Path, sink: &mut S) -> Result<FlashReport> {
        let check = check_hex(hex_path, sink)?;

        self.bring_up(sink)?;
        let caps = self
            .session
            .caps()
            .copied()
            .ok_or(Error::InvalidArgument("session lost its capabilities"))?;

        sink.line(if caps.extended_erase() {
            "Erasing flash (extended method)..."
        } else {
            "Erasing flash (standard method)..."
        });
        sink.flush();
        self.session.erase_all()?;
        sink.line("Erase successful");

        sink.line("Flashing...");
        sink.flush();
        let started = Instant::now();
        let mut counters = WriteCounters::default();
        let result = self.write_pass(open_hex(hex_path)?, sink, &mut counters);
        let write_elapsed = started.elapsed();

        sink.text("\n");
        sink.line(&format!("Lines read: {}", check.lines_read));
        sink.line(&format!("Pages flashed: {}", counters.pages));
        sink.line(&format!("Bytes flashed: {}", counters.bytes));
        sink.line(&format!("Verify failures: {}", counters.verify_failures));
        sink.line(&format!("Check time: {} msec", check.elapsed.as_millis()));
        sink.line(&format!("Flash time: {} msec", write_elapsed.as_millis()));

        let outcome = match &result {
            Ok(()) => "Flash successful",
            Err(_) => "Flash failed",
        };
        sink.line(outcome);
        sink.flush();
        result?;

        Ok(FlashReport {
            bootloader_version: (caps.version_major(), caps.version_minor()),
            pages_written: counters.pages,
            bytes_written: counters.bytes,
            verify_failures: counters.verify_failures,
            write_elapsed,
            check,
        })
    }

    /// Reset the target into user code.
    pub fn reset_run(&mut self) -> Result<()> {
        self.boot.reset_run(self.session.port_mut())
    }

    /// Enter the bootloader and leave the session `Ready`: pin sequence,
    /// auto-baud, `GET`, then write-unprotect with re-entry.
    fn bring_up<S: ProgressSink>(&mut self, sink: &mut S) -> Result<()> {
        sink.line("Entering bootloader mode...");
        sink.flush();
        self.boot.enter_bootloader(self.session.port_mut())?;
        self.session.enter()?;
        let caps = self.session.get()?;
        sink.line(&format!(
            "Bootloader version: {}.{}",
            caps.version_major(),
            caps.version_minor()
        ));

        self.session.write_unprotect()?;
        sink.line("Flash write protection disabled, re-entering bootloader...");
        sink.flush();
        thread::sleep(self.config.unprotect_settle);
        // the unprotect reset may leave the bootloader already
        // synchronized, so a NACK here is tolerated; capabilities are
        // re-read because the device rebooted
        self.session.reenter()?;
        self.session.get()?;
        Ok(())
    }

    fn write_pass<R: BufRead>(
        &mut self,
        reader: R,
        sink: &mut impl ProgressSink,
        counters: &mut WriteCounters,
    ) -> Result<()> {
        let mut parser = HexParser::new(reader);
        let mut assembler = PageAssembler::new();

        while let Some(record) = parser.next_record()? {
            let Record::Data { address, data } = record else {
                continue;
            };
            for (i, byte) in data.iter().enumerate() {
                if let Some(job) = assembler.push(address + i as u32, *byte)? {
                    self.commit_page(&job, sink, counters)?;
                }
            }
        }
        if let Some(job) = assembler.finish() {
            self.commit_page(&job, sink, counters)?;
        }
        Ok(())
    }

    /// Write one page, read it back, compare.
    fn commit_page(
        &mut self,
        job: &WriteJob,
        sink: &mut impl ProgressSink,
        counters: &mut WriteCounters,
    ) -> Result<()> {
        debug!(
            "Writing page {:#010x} ({} bytes)",
            job.address,
            job.data.len()
        );
        self.session.write_memory(job.address, &job.data)?;
        sink.yield_hint();

        let readback = self.session.read_memory(job.address, job.data.len())?;
        sink.yield_hint();

        if readback != job.data {
            counters.verify_failures += 1;
            sink.line(&format!(
                "verify failed at address {:#010x}, len={}",
                job.address,
                job.data.len()
            ));
            dump_hex(sink, "written:", &job.data);
            dump_hex(sink, "read back:", &readback);
            sink.flush();
            return Err(Error::VerifyMismatch {
                addr: job.address,
                len: job.data.len(),
            });
        }

        counters.pages += 1;
        counters.bytes += job.data.len() as u64;

        sink.text(".");
        if counters.pages % self.config.dots_per_row == 0 {
            sink.text("\n");
        }
        sink.flush();
        sink.yield_hint();
        Ok(())
    }
}

/// Parse-only pass over a HEX file: validate it and size up the image
/// without touching any hardware.
pub fn check_hex(hex_path: &Path, sink: &mut impl ProgressSink) -> Result<CheckReport> {
    sink.line(&format!("Checking HEX file {} ...", hex_path.display()));
    let report = check_pass(open_hex(hex_path)?, sink)?;
    sink.line(&format!(
        "Check successful: {} lines, {} pages, {} bytes",
        report.lines_read, report.pages, report.image_bytes
    ));
    sink.flush();
    Ok(report)
}

fn check_pass<R: BufRead>(reader: R, sink: &mut impl ProgressSink) -> Result<CheckReport> {
    let started = Instant::now();
    let mut parser = HexParser::new(reader);
    let mut assembler = PageAssembler::new();

    let mut pages: u32 = 0;
    let mut image_bytes: u64 = 0;
    let mut address_min = u32::MAX;
    let mut address_max = 0u32;
    let mut expected_next: Option<u32> = None;

    while let Some(record) = parser.next_record()? {
        let Record::Data { address, data } = record else {
            continue;
        };
        if data.is_empty() {
            continue;
        }

        if let Some(expected) = expected_next {
            if address != expected {
                sink.line(&format!(
                    "Info: gap in line {}, addr {:#010x}. This is normal.",
                    parser.lines_read(),
                    address
                ));
            }
        }
        let end = address.wrapping_add(data.len() as u32);
        expected_next = Some(end);

        address_min = address_min.min(address);
        address_max = address_max.max(end - 1);

        for (i, byte) in data.iter().enumerate() {
            if let Some(job) = assembler.push(address + i as u32, *byte)? {
                pages += 1;
                image_bytes += job.data.len() as u64;
            }
        }
    }
    parser.require_eof()?;

    if let Some(job) = assembler.finish() {
        pages += 1;
        image_bytes += job.data.len() as u64;
    }

    Ok(CheckReport {
        lines_read: parser.lines_read(),
        bytes_read: parser.bytes_read(),
        pages,
        image_bytes,
        address_min,
        address_max,
        entry_point: parser.entry_point(),
        elapsed: started.elapsed(),
    })
}

fn open_hex(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)?;
    info!("Opened {}", path.display());
    Ok(BufReader::new(file))
}

/// Dump a buffer as hex rows of 16, yielding between rows so a cooperative
/// host can breathe during long failure reports.
fn dump_hex(sink: &mut impl ProgressSink, label: &str, data: &[u8]) {
    sink.line(label);
    for chunk in data.chunks(16) {
        let row: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        sink.line(&row.join(" "));
        sink.yield_hint();
    }
}
