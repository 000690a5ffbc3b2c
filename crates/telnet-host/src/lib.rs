// Copyright (C) 2025 The telwire developers. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A telnet server for MUD-style services.
//!
//! [`TelnetServer`] accepts connections, offers GMCP to every client, and publishes what arrives
//! as [`ServerEvent`]s: lines of text, raw subnegotiations, and decoded GMCP messages, along
//! with connection lifecycle events. Each [`Connection`] can be written to directly, sent lines
//! of text, sent GMCP messages, or closed.

pub mod config;
pub mod connection;
pub mod connection_codec;
pub mod error;
pub mod events;
pub mod gmcp;
mod listen;
mod registry;
pub mod telnet;

pub use config::ServerConfig;
pub use connection::{Connection, EventStream};
pub use connection_codec::{DEFAULT_MAX_BUFFER_LENGTH, TelnetCodec, TelnetEvent};
pub use error::{ConnectionError, ServerError};
pub use events::{EventKind, EventReceiver, ServerEvent};
pub use gmcp::{GmcpError, GmcpMessage};
pub use listen::TelnetServer;
