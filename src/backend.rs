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

//! Target-side OTA backend
//!
//! `open` starts the handshake driver and waits for the host, `read` pulls
//! image data with PULLDATA, `ioctl` reports back. Status goes out on the
//! event channel handed back by [`Backend::new`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam_channel::{Receiver, Sender};
use crate::config::Config;
use crate::engine::{CommandRequest, Engine};
use crate::error::{Error, Result};
use crate::frame::param_block;
use crate::handshake;
use crate::protocol::*;
use crate::session::{HandshakeState, Session};
use crate::transport::Transport;

// ============================================================================
// Public Types
// ============================================================================

/// Status notifications for the update manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// Handshake finished, fired once per handshake
    SessionEstablished,
    /// Progress reported through `ioctl`, in percent
    Progress(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCommand {
    /// Send REPORT01 with the argument, no answer expected
    ReportImageValid = 1,
    /// Publish a progress event, local only
    ReportProgress = 2,
    /// Largest block `read` should be asked for
    GetMaxTransferSize = 3,
}

impl TryFrom<u32> for IoctlCommand {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            1 => Ok(IoctlCommand::ReportImageValid),
            2 => Ok(IoctlCommand::ReportProgress),
            3 => Ok(IoctlCommand::GetMaxTransferSize),
            _ => Err(Error::Unsupported(code)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Closed,
    Opening,
    Open,
}

// ============================================================================
// Shared State
// ============================================================================

struct Link {
    transport: Box<dyn Transport>,
    session: Session,
    state: BackendState,
    /// Bumped by every `close`; waiters and drivers from an older value quit
    generation: u64,
}

struct Shared {
    link: Mutex<Link>,
    synced: Condvar,
    cancel: AtomicBool,
    config: Config,
    events: Sender<BackendEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
    owns_transport: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: BackendEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(?event, "no event listener");
        }
    }
}

/// Handle to one OTA session. Clones share the session, so one thread can
/// `close` while another is blocked in `open` or `read`.
#[derive(Clone)]
pub struct Backend {
    shared: Arc<Shared>,
}

// ============================================================================
// Backend Implementation
// ============================================================================

impl Backend {
    /// Backend that owns `transport` and closes it on `close`.
    pub fn new(transport: Box<dyn Transport>, config: Config) -> (Self, Receiver<BackendEvent>) {
        Self::build(transport, config, true)
    }

    /// Backend over a transport someone else opens and closes.
    pub fn attach(transport: Box<dyn Transport>, config: Config) -> (Self, Receiver<BackendEvent>) {
        Self::build(transport, config, false)
    }

    fn build(
        transport: Box<dyn Transport>,
        config: Config,
        owns_transport: bool,
    ) -> (Self, Receiver<BackendEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let shared = Shared {
            link: Mutex::new(Link {
                transport,
                session: Session::new(),
                state: BackendState::Closed,
                generation: 0,
            }),
            synced: Condvar::new(),
            cancel: AtomicBool::new(false),
            config,
            events,
            driver: Mutex::new(None),
            owns_transport,
        };

        (Backend { shared: Arc::new(shared) }, receiver)
    }

    /// Open the link and block until the host has completed the handshake.
    ///
    /// `wait` bounds the block; `None` waits for as long as it takes. On
    /// timeout the handshake keeps running in the background, so a later
    /// `open` picks up where this one left off.
    pub fn open(&self, wait: Option<Duration>) -> Result<()> {
        let shared = &*self.shared;
        let mut link = shared.lock();

        if link.state == BackendState::Open {
            return Ok(());
        }

        let generation = link.generation;
        shared.cancel.store(false, Ordering::Release);
        if !link.transport.is_open() {
            link.transport.open()?;
        }
        link.state = BackendState::Opening;

        if !link.session.synchronized {
            if !self.driver_running() {
                link.session.handshake_state = HandshakeState::Init;
                link.session.attempt_counter = 0;
                self.start_driver(generation)?;
            }
            tracing::info!("waiting for host handshake");
        }

        let deadline = wait.map(|w| Instant::now() + w);
        while !link.session.synchronized {
            if link.generation != generation {
                return Err(Error::Closed);
            }

            link = match deadline {
                None => shared.synced.wait(link).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        link.state = BackendState::Closed;
                        return Err(Error::HandshakeTimeout);
                    }
                    let (guard, _) = shared
                        .synced
                        .wait_timeout(link, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }

        link.state = BackendState::Open;
        tracing::info!("backend open");
        Ok(())
    }

    /// Tear the session down. Aborts any exchange in progress; safe to call
    /// more than once.
    pub fn close(&self) -> Result<()> {
        let shared = &*self.shared;

        // Aborts an exchange or handshake tick that holds the link
        shared.cancel.store(true, Ordering::Release);

        let (driver, closed) = {
            let mut link = shared.lock();
            link.generation = link.generation.wrapping_add(1);
            link.session.reset();
            link.state = BackendState::Closed;

            let closed = if shared.owns_transport && link.transport.is_open() {
                link.transport.close()
            } else {
                Ok(())
            };
            shared.synced.notify_all();

            let driver = shared.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
            (driver, closed)
        };

        if let Some(driver) = driver {
            if driver.join().is_err() {
                tracing::warn!("handshake driver panicked");
            }
        }

        closed?;
        tracing::info!("backend closed");
        Ok(())
    }

    /// Pull `buf.len()` bytes of image data starting at `offset`.
    pub fn read(&self, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let size = u32::try_from(buf.len()).map_err(|_| Error::ResponseTooLong(buf.len()))?;
        tracing::debug!(offset, size, "read");

        let req = CommandRequest::with_response(PULLDATA, &param_block(offset, size), size);
        let data = self.exchange(&req)?;
        buf.copy_from_slice(&data);
        Ok(data.len())
    }

    pub fn ioctl(&self, cmd: IoctlCommand, arg: u32) -> Result<u32> {
        tracing::debug!(?cmd, arg, "ioctl");

        match cmd {
            IoctlCommand::ReportImageValid => {
                let req = CommandRequest::fire_and_forget(REPORT01, &param_block(arg, 0));
                self.exchange(&req)?;
                Ok(0)
            }
            IoctlCommand::ReportProgress => {
                self.shared.publish(BackendEvent::Progress(arg));
                Ok(0)
            }
            IoctlCommand::GetMaxTransferSize => Ok(MAX_TRANSFER_SIZE),
        }
    }

    /// `ioctl` by numeric code, as an update manager passes it through.
    pub fn ioctl_raw(&self, code: u32, arg: u32) -> Result<u32> {
        let cmd = IoctlCommand::try_from(code).inspect_err(|_| {
            tracing::warn!(code, "unsupported ioctl");
        })?;
        self.ioctl(cmd, arg)
    }

    pub fn state(&self) -> BackendState {
        self.shared.lock().state
    }

    pub fn is_synchronized(&self) -> bool {
        self.shared.lock().session.synchronized
    }

    /// Sequence number the next request will carry.
    pub fn sequence(&self) -> u32 {
        self.shared.lock().session.sequence
    }

    fn exchange(&self, req: &CommandRequest) -> Result<Vec<u8>> {
        let shared = &*self.shared;
        let mut link = shared.lock();
        if link.state != BackendState::Open {
            return Err(Error::NotOpen);
        }

        let Link { transport, session, .. } = &mut *link;
        let mut engine = Engine {
            transport: &mut **transport,
            session,
            config: &shared.config,
            cancel: &shared.cancel,
        };
        engine.exchange(req, shared.config.max_retries)
    }

    fn driver_running(&self) -> bool {
        let driver = self.shared.driver.lock().unwrap_or_else(|e| e.into_inner());
        driver.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn start_driver(&self, generation: u64) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        let handle = thread::Builder::new()
            .name("ota-handshake".to_string())
            .spawn(move || drive_handshake(weak, generation))?;

        let mut driver = self.shared.driver.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(finished) = driver.replace(handle) {
            let _ = finished.join();
        }
        Ok(())
    }
}

// ============================================================================
// Handshake Driver
// ============================================================================

/// Tick the handshake until it is done, the session is closed or every
/// backend handle is gone.
fn drive_handshake(weak: Weak<Shared>, generation: u64) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.cancel.load(Ordering::Acquire) {
            return;
        }

        let period = shared.config.handshake_period;
        {
            let mut link = shared.lock();
            if link.generation != generation {
                return;
            }
            let Link { transport, session, .. } = &mut *link;

            if handshake::step(session, &mut **transport, &shared.config, &shared.cancel) {
                shared.publish(BackendEvent::SessionEstablished);
                shared.synced.notify_all();
            }
            if session.handshake_state == HandshakeState::Done {
                tracing::debug!("handshake driver stopped");
                return;
            }
        }

        drop(shared);
        thread::sleep(period);
    }
}
