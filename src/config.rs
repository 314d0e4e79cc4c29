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

use std::time::Duration;

use crate::protocol::COMMAND_RETRIES;

/// Timing knobs for one session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Line rate used to scale read timeouts
    pub baud: u32,
    /// Sleep between two polls of the transport
    pub poll_interval: Duration,
    /// Fixed part of every response wait
    pub response_baseline: Duration,
    /// Total drain time after a rejected response
    pub settle: Duration,
    /// Tick of the handshake driver
    pub handshake_period: Duration,
    /// Retries on top of the first attempt of each command
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baud: 115_200,
            poll_interval: Duration::from_millis(1),
            response_baseline: Duration::from_millis(100),
            settle: Duration::from_millis(500),
            handshake_period: Duration::from_millis(200),
            max_retries: COMMAND_RETRIES,
        }
    }
}

impl Config {
    pub fn with_baud(baud: u32) -> Self {
        Config {
            baud,
            ..Config::default()
        }
    }

    /// Wait allowed for a response field of `bytes` length.
    pub fn response_timeout(&self, bytes: usize) -> Duration {
        self.response_baseline + transfer_time(bytes, self.baud)
    }
}

/// Time to move `bytes` over a line at `baud`, 10 bits per byte.
///
/// Rounded up to whole milliseconds, never less than one.
pub fn transfer_time(bytes: usize, baud: u32) -> Duration {
    let bits = bytes as u64 * 10;
    let baud = u64::from(baud.max(1));
    let ms = (bits * 1000).div_ceil(baud);
    Duration::from_millis(ms.max(1))
}
