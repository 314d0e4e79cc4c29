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

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use crate::config::Config;
use crate::frame::{decode_request, display_name, encode_response};
use crate::protocol::*;
use crate::reader::read_until;
use crate::transport::Transport;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Target sent REPORT01; carries the reported value
    #[error("Transfer complete (target reported {0})")]
    TransferComplete(u32),

    #[error("Stopped")]
    Stopped,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitGreeting;
pub struct SendReply;
pub struct AwaitConfirm;
pub struct ServeCommand;

// ============================================================================
// FSM Structure
// ============================================================================

/// Host end of the link: answers the handshake, then serves `image`.
pub struct HostFsm<State> {
    state: PhantomData<State>,
    transport: Box<dyn Transport>,
    image: Arc<Vec<u8>>,
    config: Config,
    stop: Arc<AtomicBool>,
    window: Vec<u8>,
    bytes_served: u64,
}

// ============================================================================
// Trait
// ============================================================================

pub trait HostState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn HostState>, HostError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> HostFsm<S> {
    fn transition<T>(self) -> Box<HostFsm<T>> {
        Box::new(HostFsm {
            state: PhantomData,
            transport: self.transport,
            image: self.image,
            config: self.config,
            stop: self.stop,
            window: self.window,
            bytes_served: self.bytes_served,
        })
    }

    fn io_error(&self, e: std::io::Error) -> HostError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        HostError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<std::time::Duration>) -> Result<usize, HostError> {
        let got = read_until(
            &mut *self.transport,
            buf,
            timeout,
            self.config.poll_interval,
            &self.stop,
        );
        if self.stop.load(Ordering::Acquire) {
            return Err(HostError::Stopped);
        }
        Ok(got)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl HostState for HostFsm<AwaitGreeting> {
    fn step(self: Box<Self>) -> Result<Box<dyn HostState>, HostError> {
        let mut fsm = *self;

        // Slide over the input one byte at a time; line noise may precede
        // the greeting
        let mut buf = [0u8; 1];
        let timeout = Some(fsm.config.handshake_period);
        if fsm.read(&mut buf, timeout)? == 1 {
            fsm.window.push(buf[0]);
            if fsm.window.len() > GREETING.len() {
                fsm.window.remove(0);
            }
            if fsm.window == GREETING {
                tracing::debug!("Received: {:?}", String::from_utf8_lossy(GREETING));
                fsm.window.clear();
                let next = fsm.transition::<SendReply>();
                return Ok(next as Box<dyn HostState>);
            }
        }

        Ok(Box::new(fsm) as Box<dyn HostState>)
    }
}

impl HostState for HostFsm<SendReply> {
    fn step(self: Box<Self>) -> Result<Box<dyn HostState>, HostError> {
        let mut fsm = *self;
        if let Err(e) = fsm.transport.write_all(REPLY) {
            return Err(fsm.io_error(e));
        }
        tracing::debug!("Sent: {:?}", String::from_utf8_lossy(REPLY));
        let next = fsm.transition::<AwaitConfirm>();
        Ok(next as Box<dyn HostState>)
    }
}

impl HostState for HostFsm<AwaitConfirm> {
    fn step(self: Box<Self>) -> Result<Box<dyn HostState>, HostError> {
        let mut fsm = *self;

        let mut buf = [0u8; CONFIRM.len()];
        let timeout = Some(fsm.config.handshake_period * HANDSHAKE_ATTEMPTS);
        let got = fsm.read(&mut buf, timeout)?;

        if got == CONFIRM.len() && buf[..] == *CONFIRM {
            tracing::info!("handshake complete");
            let next = fsm.transition::<ServeCommand>();
            Ok(next as Box<dyn HostState>)
        } else if got == 0 {
            Ok(Box::new(fsm) as Box<dyn HostState>)
        } else if buf[..got].starts_with(GREETING) {
            // Target missed our reply and greeted again
            tracing::debug!("greeting repeated, replying again");
            let next = fsm.transition::<SendReply>();
            Ok(next as Box<dyn HostState>)
        } else {
            tracing::warn!("unexpected confirmation {:02X?}", &buf[..got]);
            let next = fsm.transition::<AwaitGreeting>();
            Ok(next as Box<dyn HostState>)
        }
    }
}

impl HostState for HostFsm<ServeCommand> {
    fn step(self: Box<Self>) -> Result<Box<dyn HostState>, HostError> {
        let mut fsm = *self;

        let mut frame = [0u8; REQUEST_HEADER_SIZE + PARAM_BLOCK_SIZE];
        if fsm.read(&mut frame[..1], None)? == 0 {
            return Ok(Box::new(fsm) as Box<dyn HostState>);
        }
        let timeout = Some(fsm.config.response_timeout(frame.len() - 1));
        let got = 1 + fsm.read(&mut frame[1..], timeout)?;

        if frame[..got].starts_with(GREETING) {
            tracing::info!("target restarted the handshake");
            if let Err(e) = fsm.transport.clear_input() {
                return Err(fsm.io_error(e));
            }
            let next = fsm.transition::<SendReply>();
            return Ok(next as Box<dyn HostState>);
        }

        let request = match decode_request(&frame[..got]) {
            Some(request) if got == frame.len() => request,
            _ => {
                tracing::warn!("dropping partial frame of {} bytes", got);
                return Ok(Box::new(fsm) as Box<dyn HostState>);
            }
        };
        let Some((first, second)) = request.words() else {
            return Ok(Box::new(fsm) as Box<dyn HostState>);
        };

        match request.name {
            PULLDATA => {
                tracing::debug!(seq = request.sequence, "PULLDATA {:08x} {:08x}", first, second);
                let data = fsm.slice(first, second);
                let answer = encode_response(request.sequence, &data);
                if let Err(e) = fsm.transport.write_all(&answer) {
                    return Err(fsm.io_error(e));
                }
                fsm.bytes_served += u64::from(second);
                tracing::info!(served = fsm.bytes_served, "sent {:#x} bytes at {:#x}", second, first);
                Ok(Box::new(fsm) as Box<dyn HostState>)
            }
            REPORT01 => {
                tracing::info!(seq = request.sequence, "REPORT01 {}", first);
                let answer = encode_response(request.sequence, &REPORT01);
                if let Err(e) = fsm.transport.write_all(&answer) {
                    return Err(fsm.io_error(e));
                }
                Err(HostError::TransferComplete(first))
            }
            other => {
                tracing::warn!("unknown command {:?}", display_name(&other));
                Ok(Box::new(fsm) as Box<dyn HostState>)
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl HostFsm<AwaitGreeting> {
    pub fn new(
        transport: Box<dyn Transport>,
        image: Vec<u8>,
        config: Config,
        stop: Arc<AtomicBool>,
    ) -> Box<dyn HostState> {
        Box::new(HostFsm {
            state: PhantomData::<AwaitGreeting>,
            transport,
            image: Arc::new(image),
            config,
            stop,
            window: Vec::with_capacity(GREETING.len()),
            bytes_served: 0,
        })
    }
}

impl HostFsm<ServeCommand> {
    /// `size` bytes of the image from `offset`, zero-filled past its end.
    fn slice(&self, offset: u32, size: u32) -> Vec<u8> {
        let mut data = vec![0u8; size as usize];
        let start = (offset as usize).min(self.image.len());
        let end = start.saturating_add(size as usize).min(self.image.len());
        data[..end - start].copy_from_slice(&self.image[start..end]);
        data
    }
}

/// Run the host until the target reports the image, returning its value.
pub fn serve(mut fsm: Box<dyn HostState>) -> Result<u32, HostError> {
    loop {
        match fsm.step() {
            Ok(next) => fsm = next,
            Err(HostError::TransferComplete(value)) => return Ok(value),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendEvent, IoctlCommand};
    use crate::frame::{checksum, encode, param_block};
    use crate::transport::{MockTransport, pipe_pair};
    use std::thread;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            baud: 3_000_000,
            poll_interval: Duration::from_millis(1),
            response_baseline: Duration::from_millis(20),
            settle: Duration::from_millis(5),
            handshake_period: Duration::from_millis(10),
            max_retries: 5,
        }
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn host(mock: &MockTransport, image: Vec<u8>) -> Box<dyn HostState> {
        HostFsm::new(Box::new(mock.clone()), image, fast_config(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_host_serves_until_report() {
        let image = image(0x800);
        let mock = MockTransport::new().opened();
        mock.push_rx(b"\x00\xffOK");
        mock.push_rx(b"?");
        mock.push_rx(CONFIRM);
        mock.push_rx(&encode(&PULLDATA, 0, &param_block(0x100, 16)).unwrap());
        mock.push_rx(&encode(&REPORT01, 1, &param_block(1, 0)).unwrap());

        assert_eq!(serve(host(&mock, image.clone())).unwrap(), 1);

        let writes = mock.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], REPLY);
        assert_eq!(writes[1], encode_response(0, &image[0x100..0x110]));
        assert_eq!(&writes[2][..4], &checksum(b"REPORT01").to_le_bytes());
        assert_eq!(&writes[2][4..8], &[1, 0, 0, 0]);
        assert_eq!(&writes[2][8..], b"REPORT01");
    }

    #[test]
    fn test_host_zero_fills_past_image_end() {
        let image = image(0x20);
        let mock = MockTransport::new().opened();
        mock.push_rx(GREETING);
        mock.push_rx(CONFIRM);
        mock.push_rx(&encode(&PULLDATA, 5, &param_block(0x18, 16)).unwrap());
        mock.push_rx(&encode(&REPORT01, 6, &param_block(0, 0)).unwrap());

        assert_eq!(serve(host(&mock, image.clone())).unwrap(), 0);

        let mut expected = image[0x18..].to_vec();
        expected.resize(16, 0);
        assert_eq!(mock.writes()[1], encode_response(5, &expected));
    }

    #[test]
    fn test_host_replies_again_to_repeated_greeting() {
        let mock = MockTransport::new().opened();
        mock.push_rx(GREETING);
        mock.push_rx(GREETING);
        mock.push_rx(b"xx");
        mock.push_rx(CONFIRM);
        mock.push_rx(&encode(&REPORT01, 0, &param_block(7, 0)).unwrap());

        assert_eq!(serve(host(&mock, Vec::new())).unwrap(), 7);
        let writes = mock.writes();
        assert_eq!(writes[0], REPLY);
        assert_eq!(writes[1], REPLY);
    }

    #[test]
    fn test_host_skips_unknown_command() {
        let mock = MockTransport::new().opened();
        mock.push_rx(GREETING);
        mock.push_rx(CONFIRM);
        mock.push_rx(&encode(b"GETINFO0", 0, &param_block(0, 0)).unwrap());
        mock.push_rx(&encode(&REPORT01, 1, &param_block(3, 0)).unwrap());

        assert_eq!(serve(host(&mock, Vec::new())).unwrap(), 3);

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[1][4..8], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_host_stop() {
        let mock = MockTransport::new().opened();
        let stop = Arc::new(AtomicBool::new(true));
        let fsm = HostFsm::new(Box::new(mock), Vec::new(), fast_config(), stop);

        assert!(matches!(serve(fsm), Err(HostError::Stopped)));
    }

    #[test]
    fn test_host_write_error_names_state() {
        let mock = MockTransport::new().opened();
        mock.push_rx(GREETING);
        let mut closed = mock.clone();
        let mut fsm = host(&mock, Vec::new());
        for _ in 0..GREETING.len() {
            fsm = fsm.step().unwrap();
        }
        closed.close().unwrap();

        match fsm.step() {
            Err(HostError::Io(e)) => assert!(e.to_string().contains("SendReply")),
            Err(e) => panic!("expected I/O error, got {}", e),
            Ok(_) => panic!("expected I/O error"),
        }
    }

    // ========================================================================
    // Target and host over an in-memory link
    // ========================================================================

    fn pull_image(backend: &Backend, len: usize) -> Vec<u8> {
        let chunk = backend.ioctl(IoctlCommand::GetMaxTransferSize, 0).unwrap() as usize;
        let mut pulled = Vec::with_capacity(len);
        let mut offset = 0;
        while offset < len {
            let mut buf = vec![0u8; chunk.min(len - offset)];
            backend.read(offset as u32, &mut buf).unwrap();
            pulled.extend_from_slice(&buf);
            offset += buf.len();
            backend
                .ioctl(IoctlCommand::ReportProgress, (offset * 100 / len) as u32)
                .unwrap();
        }
        pulled
    }

    #[test]
    fn test_end_to_end_transfer() {
        let image = image(0x1234);
        let (target_end, host_end) = pipe_pair();

        let host_image = image.clone();
        let host = thread::spawn(move || {
            let stop = Arc::new(AtomicBool::new(false));
            serve(HostFsm::new(Box::new(host_end), host_image, fast_config(), stop))
        });

        let (backend, events) = Backend::new(Box::new(target_end), fast_config());
        backend.open(Some(Duration::from_secs(10))).unwrap();
        assert_eq!(events.recv().unwrap(), BackendEvent::SessionEstablished);

        assert_eq!(pull_image(&backend, image.len()), image);
        backend.ioctl(IoctlCommand::ReportImageValid, 1).unwrap();

        assert_eq!(host.join().unwrap().unwrap(), 1);
        let progress: Vec<_> = events.try_iter().collect();
        assert_eq!(progress.last(), Some(&BackendEvent::Progress(100)));
        backend.close().unwrap();
    }

    #[test]
    fn test_end_to_end_recovers_from_corruption() {
        let image = image(0x900);
        let (target_end, host_end) = pipe_pair();

        // Damage every fourth host write past the handshake reply
        let mut writes = 0;
        let host_end = host_end.with_fault(move |bytes| {
            writes += 1;
            if writes > 1 && writes % 4 == 0 {
                let mid = bytes.len() / 2;
                bytes[mid] ^= 0x5A;
            }
        });

        let host_image = image.clone();
        let host = thread::spawn(move || {
            let stop = Arc::new(AtomicBool::new(false));
            serve(HostFsm::new(Box::new(host_end), host_image, fast_config(), stop))
        });

        let (backend, _events) = Backend::new(Box::new(target_end), fast_config());
        backend.open(Some(Duration::from_secs(10))).unwrap();

        assert_eq!(pull_image(&backend, image.len()), image);
        // Three reads of 0x400, 0x400, 0x100 plus one retry
        assert_eq!(backend.sequence(), 4);

        backend.ioctl(IoctlCommand::ReportImageValid, 1).unwrap();
        assert_eq!(host.join().unwrap().unwrap(), 1);
    }
}
