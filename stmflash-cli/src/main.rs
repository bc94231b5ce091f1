//! stmflash CLI - Command-line tool for flashing STM32 microcontrollers
//! via the factory UART bootloader.
//!
//! ## Features
//!
//! - Flash Intel-HEX firmware files with read-back verification
//! - Offline HEX file checking and inspection
//! - Full-chip and per-bank mass erase
//! - Serial port auto-detection for common USB-UART bridges
//! - Shell completion generation
//! - Environment variable support

use std::io;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};

use stmflash::{
    BootControl, BootloaderSession, Flasher, MassErase, NativePort, PinBootControl, ProgressSink,
    SerialConfig,
};

/// stmflash - flash STM32 microcontrollers over their UART bootloader.
///
/// Environment variables:
///   STMFLASH_PORT   - Default serial port
///   STMFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "stmflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "The target must have BOOT0 and RESET wired to the adapter's DTR and RTS.")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "STMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "STMFLASH_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash an Intel-HEX firmware file and verify it.
    Flash {
        /// Path to the firmware file (Intel HEX).
        firmware: PathBuf,

        /// Reset the target into the new firmware after flashing.
        #[arg(long)]
        run: bool,
    },

    /// Check an Intel-HEX file without touching any hardware.
    Check {
        /// Path to the firmware file (Intel HEX).
        firmware: PathBuf,
    },

    /// Erase flash memory.
    Erase {
        /// Erase entire flash (required confirmation).
        #[arg(long)]
        all: bool,

        /// Erase a single bank instead (extended-erase targets only).
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
        bank: Option<u8>,
    },

    /// Show information about a firmware file.
    Info {
        /// Path to the firmware file (Intel HEX).
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the target into user code.
    Reset,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // NO_COLOR / non-TTY: drop styling so logs stay clean
    if std::env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!("stmflash v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Flash { firmware, run } => cmd_flash(&cli, firmware, *run),
        Commands::Check { firmware } => cmd_check(&cli, firmware),
        Commands::Erase { all, bank } => cmd_erase(&cli, *all, *bank),
        Commands::Info { firmware, json } => cmd_info(firmware, *json),
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        }
        Commands::Reset => cmd_reset(&cli),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        }
    }
}

/// Get serial port from CLI args or auto-detection.
fn get_port(cli: &Cli) -> Result<String> {
    if let Some(ref port) = cli.port {
        return Ok(port.clone());
    }

    let detected = stmflash::auto_detect_port()
        .context("no port given and auto-detection failed (use --port)")?;
    if !cli.quiet {
        let bridge = detected.bridge.unwrap_or("serial port");
        eprintln!(
            "{} Auto-detected {} ({})",
            style("→").green(),
            style(&detected.info.name).cyan(),
            bridge
        );
    }
    Ok(detected.info.name)
}

fn open_port(cli: &Cli) -> Result<NativePort> {
    let name = get_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&name).cyan(),
            cli.baud
        );
    }
    let config = SerialConfig::new(&name, cli.baud).with_timeout(Duration::from_secs(1));
    NativePort::open(&config).with_context(|| format!("failed to open {name}"))
}

/// Progress sink for the terminal: a live page counter on a TTY, plain
/// dots otherwise. Full lines go to stderr; `--quiet` drops everything.
struct CliSink {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl CliSink {
    fn new(quiet: bool) -> Self {
        let fancy = !quiet && console::Term::stderr().is_term();
        let bar = fancy.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {pos} pages {msg}")
                    .expect("static template string"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb
        });
        Self { bar, quiet }
    }

    fn finish(self) {
        if let Some(pb) = self.bar {
            pb.finish_and_clear();
        }
    }
}

impl ProgressSink for CliSink {
    fn text(&mut self, s: &str) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(pb) if s == "." => pb.inc(1),
            Some(_) if s == "\n" => {}
            Some(pb) => {
                let trimmed = s.trim_end();
                if !trimmed.is_empty() {
                    pb.println(trimmed);
                }
            }
            None => eprint!("{s}"),
        }
    }

    fn flush(&mut self) {
        if !self.quiet && self.bar.is_none() {
            let _ = io::stderr().flush();
        }
    }
}

/// Flash command implementation.
fn cmd_flash(cli: &Cli, firmware: &PathBuf, run: bool) -> Result<()> {
    let port = open_port(cli)?;
    let mut flasher = Flasher::new(port, PinBootControl::default());

    let mut sink = CliSink::new(cli.quiet);
    let result = flasher.flash(firmware, &mut sink);
    sink.finish();

    let report = result.with_context(|| format!("flashing {} failed", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {} bytes in {} pages ({} ms)",
            style("🎉").green().bold(),
            report.bytes_written,
            report.pages_written,
            report.write_elapsed.as_millis()
        );
    }

    if run {
        if !cli.quiet {
            eprintln!("{} Resetting target into user code", style("🔄").cyan());
        }
        flasher.reset_run()?;
    }

    Ok(())
}

/// Check command implementation.
fn cmd_check(cli: &Cli, firmware: &PathBuf) -> Result<()> {
    let mut sink = CliSink::new(cli.quiet);
    let report = stmflash::check_hex(firmware, &mut sink)
        .with_context(|| format!("check of {} failed", firmware.display()))?;
    sink.finish();

    if !cli.quiet {
        eprintln!(
            "{} {} lines, {} pages, address range {:#010x}..={:#010x}",
            style("✓").green(),
            report.lines_read,
            report.pages,
            report.address_min,
            report.address_max
        );
    }
    Ok(())
}

/// Erase command implementation.
fn cmd_erase(cli: &Cli, all: bool, bank: Option<u8>) -> Result<()> {
    if !all && bank.is_none() {
        error!("refusing to erase without --all (or --bank)");
        eprintln!(
            "{} Pass {} to erase the entire flash.",
            style("⚠").yellow(),
            style("--all").cyan()
        );
        std::process::exit(2);
    }

    let mut port = open_port(cli)?;
    let mut boot = PinBootControl::default();
    boot.enter_bootloader(&mut port)?;

    let mut session = BootloaderSession::new(port);
    session.enter()?;
    let caps = session.get()?;
    if !cli.quiet {
        eprintln!(
            "{} Bootloader v{}.{}",
            style("ℹ").blue(),
            caps.version_major(),
            caps.version_minor()
        );
        eprintln!("{} Erasing flash...", style("🗑").red());
    }

    let which = match bank {
        Some(1) => MassErase::Bank1,
        Some(2) => MassErase::Bank2,
        _ => MassErase::Global,
    };
    session.erase_mass(which)?;

    if !cli.quiet {
        eprintln!("{} Erase complete", style("✓").green().bold());
    }
    Ok(())
}

/// Info command implementation.
fn cmd_info(firmware: &PathBuf, json: bool) -> Result<()> {
    let mut sink = stmflash::NullSink;
    let report = stmflash::check_hex(firmware, &mut sink)
        .with_context(|| format!("failed to read {}", firmware.display()))?;

    if json {
        let info = serde_json::json!({
            "lines": report.lines_read,
            "pages": report.pages,
            "image_bytes": report.image_bytes,
            "address_min": format!("{:#010x}", report.address_min),
            "address_max": format!("{:#010x}", report.address_max),
            "entry_point": report.entry_point.map(|e| format!("{e:#010x}")),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Firmware image").bold().underlined());
    eprintln!("  Lines:         {}", report.lines_read);
    eprintln!("  Pages:         {}", report.pages);
    eprintln!("  Image bytes:   {}", report.image_bytes);
    if report.pages > 0 {
        eprintln!(
            "  Address range: {:#010x}..={:#010x}",
            report.address_min, report.address_max
        );
    }
    if let Some(entry) = report.entry_point {
        eprintln!("  Entry point:   {entry:#010x}");
    }
    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) {
    let detected = stmflash::discover_ports().unwrap_or_default();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.info.name,
                    "bridge": p.bridge,
                    "known": p.is_known(),
                    "vid": p.info.vid,
                    "pid": p.info.pid,
                    "manufacturer": p.info.manufacturer,
                    "product": p.info.product,
                    "serial": p.info.serial_number,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("none found").dim());
        return;
    }

    for port in &detected {
        let bridge = port
            .bridge
            .map(|b| format!(" [{}]", style(b).yellow()))
            .unwrap_or_default();
        let vid_pid = match (port.info.vid, port.info.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.info.name).cyan(),
            bridge,
            vid_pid
        );
    }

    if let Ok(auto) = stmflash::auto_detect_port() {
        eprintln!(
            "\n{} would auto-select {}",
            style("→").green().bold(),
            style(&auto.info.name).cyan().bold()
        );
    }
}

/// Reset command implementation.
fn cmd_reset(cli: &Cli) -> Result<()> {
    let mut port = open_port(cli)?;
    PinBootControl::default().reset_run(&mut port)?;
    if !cli.quiet {
        eprintln!("{} Target reset", style("✓").green());
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "stmflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "57600",
            "flash",
            "firmware.hex",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, 57_600);
        assert!(matches!(cli.command, Commands::Flash { .. }));
    }

    #[test]
    fn test_cli_parse_flash_with_all_options() {
        let cli = Cli::try_parse_from(["stmflash", "flash", "fw.hex", "--run"]).unwrap();
        if let Commands::Flash { firmware, run } = cli.command {
            assert_eq!(firmware.to_str().unwrap(), "fw.hex");
            assert!(run);
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_parse_erase() {
        let cli = Cli::try_parse_from(["stmflash", "erase", "--all"]).unwrap();
        if let Commands::Erase { all, bank } = cli.command {
            assert!(all);
            assert!(bank.is_none());
        } else {
            panic!("Expected Erase command");
        }
    }

    #[test]
    fn test_cli_parse_erase_bank() {
        let cli = Cli::try_parse_from(["stmflash", "erase", "--all", "--bank", "2"]).unwrap();
        if let Commands::Erase { bank, .. } = cli.command {
            assert_eq!(bank, Some(2));
        } else {
            panic!("Expected Erase command");
        }
    }

    #[test]
    fn test_cli_rejects_bad_bank() {
        assert!(Cli::try_parse_from(["stmflash", "erase", "--all", "--bank", "3"]).is_err());
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["stmflash", "info", "--json", "firmware.hex"]).unwrap();
        if let Commands::Info { json, .. } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["stmflash", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["stmflash", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 115_200);
        assert!(cli.port.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["stmflash"]).is_err());
    }
}
