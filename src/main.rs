// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uartota::host::{self, HostFsm, HostError};
use uartota::{Backend, BackendEvent, Config, IoctlCommand, SerialTransport};

#[derive(Parser)]
#[command(name = "uartota")]
#[command(about = "Reliable OTA image transfer over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Act as the target: handshake with a host and pull an image from it
    Pull {
        /// File to write the pulled image to
        #[arg(short, long)]
        output: PathBuf,

        /// Number of bytes to pull
        #[arg(short, long)]
        size: u32,

        /// Give up if the host has not answered the handshake after this many seconds
        #[arg(long, value_name = "SECS")]
        open_timeout: Option<u64>,

        /// Do not report the image as valid when done
        #[arg(long)]
        no_report: bool,
    },
    /// Act as the host: answer the handshake and serve an image file
    Serve {
        /// Image to serve
        file: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(port = %cli.port, baud = cli.baud, ?data_bits, ?parity, ?stop_bits, "serial settings");

    let transport = SerialTransport::new(&cli.port, cli.baud, data_bits, parity, stop_bits);
    let config = Config::with_baud(cli.baud);

    match cli.command {
        Commands::Pull { output, size, open_timeout, no_report } => {
            let wait = open_timeout.map(Duration::from_secs);
            if let Err(e) = pull_image(transport, config, output, size, wait, !no_report) {
                eprintln!("Pull failed: {}", e);
                std::process::exit(1);
            }
            println!("\nImage pulled successfully!");
        }
        Commands::Serve { file } => {
            match serve_image(transport, config, file) {
                Ok(value) => println!("\nTarget reported image state {}", value),
                Err(e) => {
                    eprintln!("Serve failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn pull_image(
    transport: SerialTransport,
    config: Config,
    output: PathBuf,
    size: u32,
    wait: Option<Duration>,
    report: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(&output)?;
    let (backend, events) = Backend::new(Box::new(transport), config);

    let logger = std::thread::spawn(move || {
        for event in events {
            match event {
                BackendEvent::SessionEstablished => tracing::info!("session established"),
                BackendEvent::Progress(percent) => tracing::info!("progress {}%", percent),
            }
        }
    });

    let result = transfer(&backend, &mut file, size, wait, report);
    let closed = backend.close();
    drop(backend);
    if logger.join().is_err() {
        tracing::warn!("event logger panicked");
    }

    result?;
    closed?;
    file.flush()?;
    Ok(())
}

fn transfer(
    backend: &Backend,
    file: &mut File,
    size: u32,
    wait: Option<Duration>,
    report: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    backend.open(wait)?;

    let chunk = backend.ioctl(IoctlCommand::GetMaxTransferSize, 0)?;
    let mut buf = vec![0u8; chunk as usize];
    let mut offset = 0u32;
    let mut last_percent = None;

    while offset < size {
        let len = chunk.min(size - offset) as usize;
        backend.read(offset, &mut buf[..len])?;
        file.write_all(&buf[..len])?;
        offset += len as u32;

        let percent = (u64::from(offset) * 100 / u64::from(size)) as u32;
        if last_percent != Some(percent) {
            backend.ioctl(IoctlCommand::ReportProgress, percent)?;
            last_percent = Some(percent);
        }
    }

    if report {
        backend.ioctl(IoctlCommand::ReportImageValid, 1)?;
    }
    Ok(())
}

fn serve_image(transport: SerialTransport, config: Config, file: PathBuf) -> Result<u32, HostError> {
    use uartota::Transport;

    if !file.exists() {
        return Err(HostError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let image = std::fs::read(&file)?;
    tracing::info!("{} file size: {}", file.display(), image.len());

    let mut transport = transport;
    transport.open()?;

    let stop = Arc::new(AtomicBool::new(false));
    let fsm = HostFsm::new(Box::new(transport), image, config, stop);
    host::serve(fsm)
}
