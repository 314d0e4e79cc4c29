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

//! UART OTA protocol constants

/// Handshake marker A - target announces it is listening
pub const GREETING: &[u8] = b"OK?";

/// Handshake marker B - host answers the greeting
pub const REPLY: &[u8] = b"YES,YOU?";

/// Handshake marker C - target confirms, session is established
pub const CONFIRM: &[u8] = b"METOO";

/// Pull a block of image data: params = offset:u32, size:u32
pub const PULLDATA: [u8; COMMAND_SIZE] = *b"PULLDATA";

/// Report image validity: params = value:u32, reserved:u32
pub const REPORT01: [u8; COMMAND_SIZE] = *b"REPORT01";

/// Length of a command name on the wire
pub const COMMAND_SIZE: usize = 8;

/// Length of the sequence number on the wire
pub const SEQ_SIZE: usize = 4;

/// Length of the CRC32 word leading every response
pub const CRC_SIZE: usize = 4;

/// Request header: name + sequence
pub const REQUEST_HEADER_SIZE: usize = COMMAND_SIZE + SEQ_SIZE;

/// Response header: crc32 + sequence
pub const RESPONSE_HEADER_SIZE: usize = CRC_SIZE + SEQ_SIZE;

/// Parameter block carried by PULLDATA and REPORT01
pub const PARAM_BLOCK_SIZE: usize = 8;

/// Largest parameter block accepted by the framer
pub const MAX_PARAMS_LEN: usize = 64;

/// Largest PULLDATA block the target asks for
pub const MAX_TRANSFER_SIZE: u32 = 0x400;

/// Retry budget for every command the backend issues
pub const COMMAND_RETRIES: u32 = 100;

/// Consecutive marker B misses before the greeting is sent again
pub const HANDSHAKE_ATTEMPTS: u32 = 3;
