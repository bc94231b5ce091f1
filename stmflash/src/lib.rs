//! # stmflash
//!
//! A library for flashing STM32 microcontrollers through the factory UART
//! bootloader (ST application note AN3155).
//!
//! The crate covers the full path from firmware file to verified flash:
//!
//! - Streaming Intel-HEX parsing (record types 0, 1, 4, 5)
//! - Assembly of the sparse address space into 256-byte aligned pages
//! - The bootloader command protocol: auto-baud entry, capability discovery
//!   via `GET`, classic and extended erase, write, read-back verify
//! - Target reset control over the serial adapter's DTR/RTS lines
//!
//! ## Example
//!
//! ```rust,no_run
//! use stmflash::{Flasher, NativePort, PinBootControl, WriteSink};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 115_200)?;
//!     let mut flasher = Flasher::new(port, PinBootControl::default());
//!
//!     let mut progress = WriteSink::new(std::io::stderr());
//!     let report = flasher.flash("firmware.hex".as_ref(), &mut progress)?;
//!     println!("flashed {} bytes", report.bytes_written);
//!
//!     // hand control back to the application image
//!     flasher.reset_run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boot;
pub mod error;
pub mod flasher;
pub mod host;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use boot::{BootControl, PinBootControl};
pub use error::{Error, HexErrorKind, Result};
pub use flasher::{check_hex, CheckReport, FlashConfig, FlashReport, Flasher};
pub use host::{auto_detect_port, discover_ports, DetectedPort};
pub use image::{HexParser, PageAssembler, Record, WriteJob, PAGE_SIZE};
pub use port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig};
pub use progress::{NullSink, ProgressSink, WriteSink};
pub use protocol::{Caps, Command, ACK, AUTO_BAUD, MAX_CHUNK, NACK};
pub use session::{BootloaderSession, MassErase, SessionConfig, SessionState};
