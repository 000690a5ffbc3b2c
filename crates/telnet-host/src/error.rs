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

use std::io;

use crate::gmcp::GmcpError;

/// Why a connection's read loop ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    MalformedGmcp(#[from] GmcpError),
    #[error("The event stream for this connection has already been taken")]
    EventsTaken,
}

impl ConnectionError {
    /// True for the transport failures that simply mean the peer went away. These end the
    /// connection like an ordinary end-of-input rather than as an error.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Unable to bind listener at {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("Listener failed while accepting connections: {0}")]
    Accept(#[source] io::Error),
}
