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

//! UART OTA: pull firmware-update data over a lossy serial line
//!
//! The target side is [`backend::Backend`]; the host side is
//! [`host::HostFsm`]. Both run over any [`transport::Transport`].

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod host;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod transport;

pub use backend::{Backend, BackendEvent, BackendState, IoctlCommand};
pub use config::Config;
pub use error::{Error, Result};
pub use transport::{SerialTransport, Transport};
