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

/// Where the target is in the marker exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Send the greeting
    Init,
    /// Wait for the host reply
    Step1,
    /// Send the confirmation
    Step2,
    /// Mark the session established
    Step3,
    /// Nothing left to do, the driver stops
    Done,
}

/// State shared by the handshake driver and the command exchange.
#[derive(Debug)]
pub struct Session {
    pub synchronized: bool,
    /// Sequence number the next request goes out with
    pub sequence: u32,
    pub handshake_state: HandshakeState,
    /// Marker B misses since the greeting was last sent
    pub attempt_counter: u32,
}

impl Session {
    pub fn new() -> Self {
        Session {
            synchronized: false,
            sequence: 0,
            handshake_state: HandshakeState::Init,
            attempt_counter: 0,
        }
    }

    /// Drop back to an unsynchronized, idle session.
    pub fn reset(&mut self) {
        self.synchronized = false;
        self.sequence = 0;
        self.handshake_state = HandshakeState::Done;
        self.attempt_counter = 0;
    }

    pub fn advance_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut session = Session::new();
        session.synchronized = true;
        session.sequence = 17;
        session.attempt_counter = 2;
        session.handshake_state = HandshakeState::Step1;

        session.reset();

        assert!(!session.synchronized);
        assert_eq!(session.sequence, 0);
        assert_eq!(session.attempt_counter, 0);
        assert_eq!(session.handshake_state, HandshakeState::Done);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut session = Session::new();
        session.sequence = u32::MAX;
        session.advance_sequence();
        assert_eq!(session.sequence, 0);
    }
}
