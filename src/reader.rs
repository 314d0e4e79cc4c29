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

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use crate::transport::Transport;

/// Poll `transport` until `buf` is full, `timeout` runs out or `cancel` is
/// raised. `None` waits forever.
///
/// Returns how many bytes landed in `buf`. A short count is the only failure
/// signal; callers decide what it means.
pub fn read_until(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    timeout: Option<Duration>,
    poll: Duration,
    cancel: &AtomicBool,
) -> usize {
    let want = buf.len();
    let start = Instant::now();
    let mut got = 0;

    while got < want {
        match transport.read(&mut buf[got..]) {
            Ok(n) => got += n,
            Err(e) if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) => {}
            Err(e) => {
                tracing::warn!("transport read failed: {}", e);
                break;
            }
        }

        if got >= want || cancel.load(Ordering::Acquire) {
            break;
        }
        if let Some(timeout) = timeout {
            if start.elapsed() > timeout {
                break;
            }
        }
        std::thread::sleep(poll);
    }

    tracing::debug!(
        "got {}/{} in {}/{}ms",
        got,
        want,
        start.elapsed().as_millis(),
        timeout.map_or(-1, |t| t.as_millis() as i64)
    );
    got
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    const POLL: Duration = Duration::from_millis(1);

    #[test]
    fn test_read_until_collects_partial_reads() {
        let mut mock = MockTransport::new().opened();
        mock.push_rx(b"PULLDATA");
        mock.set_read_chunk(3);

        let cancel = AtomicBool::new(false);
        let mut buf = [0u8; 8];
        let got = read_until(&mut mock, &mut buf, Some(Duration::from_secs(1)), POLL, &cancel);

        assert_eq!(got, 8);
        assert_eq!(&buf, b"PULLDATA");
        assert_eq!(mock.reads(), 3);
    }

    #[test]
    fn test_read_until_short_on_timeout() {
        let mut mock = MockTransport::new().opened();
        mock.push_rx(b"OK");

        let cancel = AtomicBool::new(false);
        let mut buf = [0u8; 8];
        let start = Instant::now();
        let got = read_until(&mut mock, &mut buf, Some(Duration::from_millis(20)), POLL, &cancel);

        assert_eq!(got, 2);
        assert_eq!(&buf[..2], b"OK");
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_read_until_leaves_surplus_unread() {
        let mut mock = MockTransport::new().opened();
        mock.push_rx(b"YES,YOU?METOO");

        let cancel = AtomicBool::new(false);
        let mut buf = [0u8; 8];
        let got = read_until(&mut mock, &mut buf, None, POLL, &cancel);

        assert_eq!(got, 8);
        assert_eq!(&buf, b"YES,YOU?");
        assert_eq!(mock.pending(), 5);
    }

    #[test]
    fn test_read_until_stops_when_cancelled() {
        let mut mock = MockTransport::new().opened();

        let cancel = AtomicBool::new(true);
        let mut buf = [0u8; 4];
        let got = read_until(&mut mock, &mut buf, None, POLL, &cancel);

        assert_eq!(got, 0);
        assert_eq!(mock.reads(), 1);
    }

    #[test]
    fn test_read_until_stops_on_transport_error() {
        // Never opened: every read fails with NotConnected
        let mut mock = MockTransport::new();

        let cancel = AtomicBool::new(false);
        let mut buf = [0u8; 4];
        let got = read_until(&mut mock, &mut buf, None, POLL, &cancel);

        assert_eq!(got, 0);
    }
}
