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

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the backend to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failed to open, close or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every attempt of a command was rejected.
    #[error("{command} failed after {attempts} attempts")]
    RetriesExhausted { command: String, attempts: u32 },

    /// Unknown ioctl code.
    #[error("ioctl {0:#x} not supported")]
    Unsupported(u32),

    #[error("parameter block too long: {len} bytes (max {max})")]
    ParamsTooLong { len: usize, max: usize },

    #[error("response length {0} does not fit the wire format")]
    ResponseTooLong(usize),

    #[error("backend is not open")]
    NotOpen,

    /// The session was closed while the operation was in progress.
    #[error("session closed")]
    Closed,

    #[error("timed out waiting for the host handshake")]
    HandshakeTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single response attempt was thrown away.
///
/// These never reach the caller of the backend; the exchange retries on
/// every one of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("short read of {field}: got {got}/{want} bytes")]
    ShortRead {
        field: &'static str,
        got: usize,
        want: usize,
    },

    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u32, got: u32 },

    #[error("crc mismatch: peer {peer:#010x}, computed {computed:#010x}")]
    CrcMismatch { peer: u32, computed: u32 },
}
