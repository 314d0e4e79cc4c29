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

//! Command/response exchange with retry
//!
//! Every attempt goes out with a fresh sequence number, so a late answer to
//! an abandoned attempt can never satisfy the current one.

use std::sync::atomic::{AtomicBool, Ordering};
use crate::config::Config;
use crate::error::{Error, Rejection, Result};
use crate::frame::{checksum, decode_response_header, display_name, encode};
use crate::protocol::*;
use crate::reader::read_until;
use crate::session::Session;
use crate::transport::Transport;

/// Drain rounds after a rejected response
const SETTLE_ROUNDS: u32 = 5;

/// One logical request.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: [u8; COMMAND_SIZE],
    pub params: Vec<u8>,
    pub expect_response: bool,
    pub response_len: u32,
}

impl CommandRequest {
    pub fn with_response(name: [u8; COMMAND_SIZE], params: &[u8], response_len: u32) -> Self {
        CommandRequest {
            name,
            params: params.to_vec(),
            expect_response: true,
            response_len,
        }
    }

    pub fn fire_and_forget(name: [u8; COMMAND_SIZE], params: &[u8]) -> Self {
        CommandRequest {
            name,
            params: params.to_vec(),
            expect_response: false,
            response_len: 0,
        }
    }
}

/// Borrowed view of everything one exchange touches.
pub struct Engine<'a> {
    pub transport: &'a mut dyn Transport,
    pub session: &'a mut Session,
    pub config: &'a Config,
    pub cancel: &'a AtomicBool,
}

impl Engine<'_> {
    /// Send `req` and return its verified payload.
    ///
    /// Gives up after `max_retries + 1` attempts. The session sequence ends up
    /// one past the last number put on the wire, whatever the outcome.
    pub fn exchange(&mut self, req: &CommandRequest, max_retries: u32) -> Result<Vec<u8>> {
        let command = display_name(&req.name);
        let mut retries_left = max_retries;
        let mut attempts = 0u32;

        loop {
            self.check_cancel()?;
            attempts += 1;

            self.transport.clear_input()?;
            let frame = encode(&req.name, self.session.sequence, &req.params)?;
            tracing::debug!(%command, seq = self.session.sequence, attempt = attempts, "sending");

            // Part of the frame may be on the wire even if the write fails,
            // so its sequence number is spent from here on
            let sent = self.transport.write_all(&frame);
            if let Err(e) = sent {
                self.session.advance_sequence();
                return Err(e.into());
            }

            if !req.expect_response {
                self.session.advance_sequence();
                return Ok(Vec::new());
            }

            let response = self.await_response(req.response_len as usize);
            self.session.advance_sequence();

            match response {
                Ok(payload) => return Ok(payload),
                Err(rejection) => {
                    tracing::warn!(%command, "{}", rejection);
                    self.check_cancel()?;
                    self.settle()?;

                    if retries_left == 0 {
                        tracing::error!(%command, attempts, "retries exhausted");
                        return Err(Error::RetriesExhausted { command, attempts });
                    }
                    retries_left -= 1;
                    tracing::info!(%command, retries_left, "retrying");
                }
            }
        }
    }

    /// Read and verify one response frame for the current sequence.
    ///
    /// Ordered cheapest check first: the sequence is known after eight bytes,
    /// the CRC only once the whole payload is in.
    fn await_response(&mut self, response_len: usize) -> std::result::Result<Vec<u8>, Rejection> {
        let mut crc_buf = [0u8; CRC_SIZE];
        self.read_field("crc32", &mut crc_buf, CRC_SIZE)?;

        let mut seq_buf = [0u8; SEQ_SIZE];
        self.read_field("sequence", &mut seq_buf, SEQ_SIZE)?;

        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        header[..CRC_SIZE].copy_from_slice(&crc_buf);
        header[CRC_SIZE..].copy_from_slice(&seq_buf);
        let (peer_crc, seq) = decode_response_header(&header);

        if seq != self.session.sequence {
            return Err(Rejection::SequenceMismatch {
                expected: self.session.sequence,
                got: seq,
            });
        }

        let mut payload = vec![0u8; response_len];
        self.read_field("payload", &mut payload, response_len)?;

        let computed = checksum(&payload);
        if computed != peer_crc {
            return Err(Rejection::CrcMismatch {
                peer: peer_crc,
                computed,
            });
        }

        Ok(payload)
    }

    fn read_field(
        &mut self,
        field: &'static str,
        buf: &mut [u8],
        len: usize,
    ) -> std::result::Result<(), Rejection> {
        let timeout = self.config.response_timeout(len);
        let got = read_until(
            self.transport,
            buf,
            Some(timeout),
            self.config.poll_interval,
            self.cancel,
        );

        if got < len {
            return Err(Rejection::ShortRead { field, got, want: len });
        }
        Ok(())
    }

    /// Let the rest of a bad response arrive, then throw it away.
    fn settle(&mut self) -> Result<()> {
        let round = self.config.settle / SETTLE_ROUNDS;
        for _ in 0..SETTLE_ROUNDS {
            std::thread::sleep(round);
            self.transport.clear_input()?;
            self.check_cancel()?;
        }
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
