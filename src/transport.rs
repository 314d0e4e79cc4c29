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

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort as SerialPortTrait, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

/// Byte stream the OTA protocol runs over.
///
/// `read` must not block: it returns whatever is already buffered, possibly
/// nothing. Ordering is preserved but bytes may be lost.
pub trait Transport: Send {
    fn open(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Discard everything received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not open")
}

// ============================================================================
// Serial Port Implementation
// ============================================================================

/// Transport over a real serial port, opened lazily with the stored settings
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    port: Option<Box<dyn SerialPortTrait>>,
}

impl SerialTransport {
    pub fn new(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Self {
        SerialTransport {
            port_name: port_name.to_string(),
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            port: None,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(Duration::from_millis(10))
            .open()?;

        tracing::debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self.port.as_mut().ok_or_else(not_open)?;

        let pending = port.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }

        let len = pending.min(buf.len());
        port.read(&mut buf[..len])
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

#[cfg(test)]
pub use mock::{MockTransport, PipeTransport, pipe_pair};
