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

//! Target side of the marker handshake
//!
//! ```text
//! target                 host
//!   | ---- "OK?" -------> |
//!   | <--- "YES,YOU?" --- |
//!   | ---- "METOO" -----> |
//! ```
//!
//! One call to [`step`] is one timer tick. There is no overall deadline: an
//! unanswered greeting is repeated every [`HANDSHAKE_ATTEMPTS`] ticks until
//! the host shows up or the session is closed.

use std::sync::atomic::AtomicBool;
use crate::config::{Config, transfer_time};
use crate::protocol::*;
use crate::reader::read_until;
use crate::session::{HandshakeState, Session};
use crate::transport::Transport;

/// Run one handshake transition.
///
/// Returns true on the tick that establishes the session, false otherwise.
pub fn step(
    session: &mut Session,
    transport: &mut dyn Transport,
    config: &Config,
    cancel: &AtomicBool,
) -> bool {
    if !transport.is_open() {
        return false;
    }

    tracing::trace!(state = ?session.handshake_state, "handshake tick");

    match session.handshake_state {
        HandshakeState::Init => {
            session.attempt_counter = 0;
            match transport.write_all(GREETING) {
                Ok(()) => {
                    tracing::debug!("Sent: {:?}", String::from_utf8_lossy(GREETING));
                    session.handshake_state = HandshakeState::Step1;
                }
                Err(e) => tracing::warn!("greeting write failed: {}", e),
            }
            false
        }

        HandshakeState::Step1 => {
            session.attempt_counter += 1;

            let mut buf = [0u8; REPLY.len()];
            let timeout = transfer_time(REPLY.len(), config.baud);
            let got = read_until(transport, &mut buf, Some(timeout), config.poll_interval, cancel);

            if got == REPLY.len() && buf[..] == *REPLY {
                tracing::debug!("Received: {:?}", String::from_utf8_lossy(REPLY));
                session.handshake_state = HandshakeState::Step2;
            } else if session.attempt_counter >= HANDSHAKE_ATTEMPTS {
                tracing::debug!(attempts = session.attempt_counter, "no reply, greeting again");
                session.handshake_state = HandshakeState::Init;
            }
            false
        }

        HandshakeState::Step2 => {
            match transport.write_all(CONFIRM) {
                Ok(()) => {
                    tracing::debug!("Sent: {:?}", String::from_utf8_lossy(CONFIRM));
                    session.handshake_state = HandshakeState::Step3;
                }
                Err(e) => {
                    tracing::warn!("confirm write failed: {}", e);
                    session.handshake_state = HandshakeState::Init;
                }
            }
            false
        }

        HandshakeState::Step3 => {
            session.synchronized = true;
            session.handshake_state = HandshakeState::Done;
            tracing::info!("handshake complete");
            true
        }

        HandshakeState::Done => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            baud: 3_000_000,
            poll_interval: Duration::from_millis(1),
            ..Config::default()
        }
    }

    fn tick(session: &mut Session, mock: &mut MockTransport) -> bool {
        step(session, mock, &fast_config(), &AtomicBool::new(false))
    }

    #[test]
    fn test_handshake_full_exchange() {
        let mut mock = MockTransport::with_responder(|written| {
            if written == GREETING { REPLY.to_vec() } else { Vec::new() }
        }).opened();
        let mut session = Session::new();

        assert!(!tick(&mut session, &mut mock));
        assert_eq!(session.handshake_state, HandshakeState::Step1);
        assert!(!tick(&mut session, &mut mock));
        assert_eq!(session.handshake_state, HandshakeState::Step2);
        assert!(!tick(&mut session, &mut mock));
        assert_eq!(session.handshake_state, HandshakeState::Step3);
        assert!(!session.synchronized);

        assert!(tick(&mut session, &mut mock));
        assert!(session.synchronized);
        assert_eq!(session.handshake_state, HandshakeState::Done);

        // Established fires exactly once
        for _ in 0..5 {
            assert!(!tick(&mut session, &mut mock));
        }

        assert_eq!(mock.writes(), vec![GREETING.to_vec(), CONFIRM.to_vec()]);
    }

    #[test]
    fn test_handshake_repeats_greeting_without_reply() {
        let mut mock = MockTransport::new().opened();
        let mut session = Session::new();

        // Init, then three misses in Step1, then Init again: two full rounds
        for _ in 0..8 {
            assert!(!tick(&mut session, &mut mock));
            assert!(matches!(
                session.handshake_state,
                HandshakeState::Init | HandshakeState::Step1
            ));
        }

        assert_eq!(mock.writes(), vec![GREETING.to_vec(), GREETING.to_vec()]);
        assert!(!session.synchronized);
    }

    #[test]
    fn test_handshake_attempt_counter() {
        let mut mock = MockTransport::new().opened();
        let mut session = Session::new();

        tick(&mut session, &mut mock);
        assert_eq!(session.attempt_counter, 0);
        tick(&mut session, &mut mock);
        assert_eq!(session.attempt_counter, 1);
        tick(&mut session, &mut mock);
        assert_eq!(session.attempt_counter, 2);
        assert_eq!(session.handshake_state, HandshakeState::Step1);
        tick(&mut session, &mut mock);
        assert_eq!(session.handshake_state, HandshakeState::Init);
        tick(&mut session, &mut mock);
        assert_eq!(session.attempt_counter, 0);
    }

    #[test]
    fn test_handshake_rejects_wrong_reply() {
        let mut mock = MockTransport::new().opened();
        let mut session = Session::new();

        tick(&mut session, &mut mock);
        mock.push_rx(b"YES,ME??");
        tick(&mut session, &mut mock);
        assert_eq!(session.handshake_state, HandshakeState::Step1);

        // Late but correct reply on the next tick is still accepted
        mock.push_rx(REPLY);
        tick(&mut session, &mut mock);
        assert_eq!(session.handshake_state, HandshakeState::Step2);
    }

    #[test]
    fn test_handshake_short_reply() {
        let mut mock = MockTransport::new().opened();
        let mut session = Session::new();

        tick(&mut session, &mut mock);
        mock.push_rx(b"YES,");
        tick(&mut session, &mut mock);
        assert_eq!(session.handshake_state, HandshakeState::Step1);
        assert_eq!(session.attempt_counter, 1);
    }

    #[test]
    fn test_handshake_idle_while_transport_closed() {
        let mut mock = MockTransport::new();
        let mut session = Session::new();

        for _ in 0..3 {
            assert!(!tick(&mut session, &mut mock));
        }
        assert_eq!(session.handshake_state, HandshakeState::Init);
        assert!(mock.writes().is_empty());
    }
}
