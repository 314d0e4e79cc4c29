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

//! Command and response framing
//!
//! ```text
//! request:  | name (8) | seq (4) | params (N)  |
//! response: | crc32 (4) | seq (4) | payload (M) |
//! ```
//!
//! All integers are little-endian. The CRC covers the payload only.

use crate::error::{Error, Result};
use crate::protocol::*;

/// CRC32 (IEEE, same as zlib) of a response payload.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Space-pad or truncate `name` to a wire command name.
pub fn command_name(name: &str) -> [u8; COMMAND_SIZE] {
    let mut result = [b' '; COMMAND_SIZE];
    for (slot, byte) in result.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    result
}

/// Printable form of a command name for logs and errors.
pub fn display_name(name: &[u8; COMMAND_SIZE]) -> String {
    String::from_utf8_lossy(name).trim_end().to_string()
}

/// Parameter block of two little-endian words, as used by every command.
pub fn param_block(first: u32, second: u32) -> [u8; PARAM_BLOCK_SIZE] {
    let mut block = [0u8; PARAM_BLOCK_SIZE];
    block[..4].copy_from_slice(&first.to_le_bytes());
    block[4..].copy_from_slice(&second.to_le_bytes());
    block
}

pub fn encode(name: &[u8; COMMAND_SIZE], sequence: u32, params: &[u8]) -> Result<Vec<u8>> {
    if params.len() > MAX_PARAMS_LEN {
        return Err(Error::ParamsTooLong {
            len: params.len(),
            max: MAX_PARAMS_LEN,
        });
    }

    let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + params.len());
    frame.extend_from_slice(name);
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(params);
    Ok(frame)
}

/// Split a response header into `(crc32, sequence)`.
pub fn decode_response_header(header: &[u8; RESPONSE_HEADER_SIZE]) -> (u32, u32) {
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let seq = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (crc, seq)
}

pub fn encode_response(sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A request as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub name: [u8; COMMAND_SIZE],
    pub sequence: u32,
    pub params: Vec<u8>,
}

impl RequestFrame {
    /// The two parameter words, if the block carries them.
    pub fn words(&self) -> Option<(u32, u32)> {
        if self.params.len() < PARAM_BLOCK_SIZE {
            return None;
        }
        let p = &self.params;
        Some((
            u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            u32::from_le_bytes([p[4], p[5], p[6], p[7]]),
        ))
    }
}

pub fn decode_request(bytes: &[u8]) -> Option<RequestFrame> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return None;
    }

    let mut name = [0u8; COMMAND_SIZE];
    name.copy_from_slice(&bytes[..COMMAND_SIZE]);
    let seq = &bytes[COMMAND_SIZE..REQUEST_HEADER_SIZE];

    Some(RequestFrame {
        name,
        sequence: u32::from_le_bytes([seq[0], seq[1], seq[2], seq[3]]),
        params: bytes[REQUEST_HEADER_SIZE..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_matches_zlib() {
        // Standard CRC-32 check value
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn test_command_name() {
        assert_eq!(&command_name("PULLDATA"), b"PULLDATA");
        assert_eq!(&command_name("PING"), b"PING    ");
        assert_eq!(&command_name("REPORT01EXTRA"), b"REPORT01");
        assert_eq!(&command_name(""), b"        ");
        assert_eq!(display_name(&command_name("PING")), "PING");
    }

    #[test]
    fn test_encode_pulldata() {
        let params = param_block(0x1000, 64);
        let frame = encode(&PULLDATA, 7, &params).unwrap();

        assert_eq!(frame.len(), REQUEST_HEADER_SIZE + 8);
        assert_eq!(&frame[..8], b"PULLDATA");
        assert_eq!(&frame[8..12], &[7, 0, 0, 0]);
        assert_eq!(&frame[12..16], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&frame[16..20], &[64, 0, 0, 0]);
    }

    #[test]
    fn test_encode_without_params() {
        let frame = encode(&command_name("PING"), 0xDEAD_BEEF, &[]).unwrap();
        assert_eq!(frame.len(), REQUEST_HEADER_SIZE);
        assert_eq!(&frame[8..], &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_encode_rejects_long_params() {
        let params = vec![0u8; MAX_PARAMS_LEN + 1];
        match encode(&PULLDATA, 0, &params) {
            Err(Error::ParamsTooLong { len, max }) => {
                assert_eq!(len, MAX_PARAMS_LEN + 1);
                assert_eq!(max, MAX_PARAMS_LEN);
            }
            other => panic!("expected ParamsTooLong, got {:?}", other),
        }
        assert!(encode(&PULLDATA, 0, &params[..MAX_PARAMS_LEN]).is_ok());
    }

    #[test]
    fn test_decode_response_header() {
        let frame = encode_response(42, b"data");
        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        header.copy_from_slice(&frame[..RESPONSE_HEADER_SIZE]);

        let (crc, seq) = decode_response_header(&header);
        assert_eq!(crc, checksum(b"data"));
        assert_eq!(seq, 42);
        assert_eq!(&frame[RESPONSE_HEADER_SIZE..], b"data");
    }

    #[test]
    fn test_decode_request() {
        let frame = encode(&REPORT01, 3, &param_block(1, 0)).unwrap();
        let request = decode_request(&frame).unwrap();

        assert_eq!(request.name, REPORT01);
        assert_eq!(request.sequence, 3);
        assert_eq!(request.words(), Some((1, 0)));

        assert!(decode_request(&frame[..11]).is_none());
        let bare = decode_request(&frame[..12]).unwrap();
        assert_eq!(bare.words(), None);
    }
}
