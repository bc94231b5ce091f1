//! Host-side serial port discovery.
//!
//! STM32 boards are flashed through whatever USB-UART bridge happens to be
//! wired to the target; recognizing the common bridge chips lets the CLI
//! pick a port without being told when the choice is unambiguous.

use log::debug;

use crate::error::{Error, Result};
use crate::port::{NativePortEnumerator, PortEnumerator, PortInfo};

/// USB VID/PID pairs of common USB-UART bridges.
const KNOWN_BRIDGES: &[(u16, u16, &str)] = &[
    (0x0403, 0x6001, "FTDI FT232R"),
    (0x0403, 0x6010, "FTDI FT2232"),
    (0x0403, 0x6015, "FTDI FT231X"),
    (0x10C4, 0xEA60, "Silicon Labs CP210x"),
    (0x1A86, 0x7523, "WCH CH340"),
    (0x1A86, 0x55D4, "WCH CH9102"),
    (0x067B, 0x2303, "Prolific PL2303"),
    (0x0483, 0x5740, "STMicroelectronics VCP"),
];

/// A serial port together with what we recognized it as.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// The underlying port description.
    pub info: PortInfo,
    /// Bridge chip name, when the VID/PID is a known USB-UART bridge.
    pub bridge: Option<&'static str>,
}

impl DetectedPort {
    /// Whether this port is a recognized USB-UART bridge.
    pub fn is_known(&self) -> bool {
        self.bridge.is_some()
    }
}

/// Look up a port's USB identity in the bridge table.
pub fn classify(info: &PortInfo) -> Option<&'static str> {
    let (vid, pid) = (info.vid?, info.pid?);
    KNOWN_BRIDGES
        .iter()
        .find(|(v, p, _)| *v == vid && *p == pid)
        .map(|(_, _, name)| *name)
}

/// List available serial ports, classified.
pub fn discover_ports() -> Result<Vec<DetectedPort>> {
    let ports = NativePortEnumerator::list_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let bridge = classify(&info);
            DetectedPort { info, bridge }
        })
        .collect())
}

/// Pick a port automatically: a single recognized bridge wins; otherwise a
/// single port of any kind. Anything else needs an explicit `--port`.
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = discover_ports()?;
    debug!("Found {} serial ports", ports.len());

    let known: Vec<&DetectedPort> = ports.iter().filter(|p| p.is_known()).collect();
    match (known.len(), ports.len()) {
        (1, _) => Ok(known[0].clone()),
        (0, 1) => Ok(ports[0].clone()),
        (0, 0) => Err(Error::PortDetection("no serial ports found".into())),
        _ => Err(Error::PortDetection(format!(
            "multiple candidate ports ({}); specify one explicitly",
            ports
                .iter()
                .map(|p| p.info.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
