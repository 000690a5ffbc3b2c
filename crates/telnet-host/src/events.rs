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

//! The events a [`crate::TelnetServer`] publishes, and the channel they travel over.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::trace;

use crate::connection::Connection;
use crate::error::{ConnectionError, ServerError};

/// Everything the server reports to the application.
///
/// Events from a single connection arrive in the order their bytes were received, and
/// `Connect` always precedes anything else from that connection. `Close` is always the last
/// event the server publishes.
#[derive(Debug)]
pub enum ServerEvent {
    /// A connection was accepted and registered.
    Connect(Arc<Connection>),
    /// A line of text, with surrounding whitespace trimmed.
    Text(Arc<Connection>, String),
    /// A raw subnegotiation: option and unescaped payload.
    Subnegotiation(Arc<Connection>, u8, Bytes),
    /// A decoded GMCP message: package name and body.
    Gmcp(Arc<Connection>, String, Value),
    /// The connection ended. Carries the error if it ended abnormally. Not published for
    /// connections torn down by [`crate::TelnetServer::close`].
    Disconnect(Arc<Connection>, Option<ConnectionError>),
    /// The listener failed. Published at most once, just before `Close`.
    Error(ServerError),
    /// The server has stopped.
    Close,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Text,
    Subnegotiation,
    Gmcp,
    Disconnect,
    Error,
    Close,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Text => "text",
            EventKind::Subnegotiation => "subnegotiation",
            EventKind::Gmcp => "gmcp",
            EventKind::Disconnect => "disconnect",
            EventKind::Error => "error",
            EventKind::Close => "close",
        }
    }
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connect(_) => EventKind::Connect,
            ServerEvent::Text(..) => EventKind::Text,
            ServerEvent::Subnegotiation(..) => EventKind::Subnegotiation,
            ServerEvent::Gmcp(..) => EventKind::Gmcp,
            ServerEvent::Disconnect(..) => EventKind::Disconnect,
            ServerEvent::Error(_) => EventKind::Error,
            ServerEvent::Close => EventKind::Close,
        }
    }

    /// The connection this event concerns, if any.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        match self {
            ServerEvent::Connect(c)
            | ServerEvent::Text(c, _)
            | ServerEvent::Subnegotiation(c, ..)
            | ServerEvent::Gmcp(c, ..)
            | ServerEvent::Disconnect(c, _) => Some(c),
            ServerEvent::Error(_) | ServerEvent::Close => None,
        }
    }
}

/// Receiving side of the event channel, handed out by [`crate::TelnetServer::listen`].
pub type EventReceiver = flume::Receiver<ServerEvent>;

#[derive(Clone)]
pub(crate) struct EventSender {
    sender: flume::Sender<ServerEvent>,
}

impl EventSender {
    pub(crate) fn publish(&self, event: ServerEvent) {
        let kind = event.kind();
        let client_id = event.connection().map(|c| c.id());
        trace!(event = kind.name(), ?client_id, "Publishing");
        if self.sender.send(event).is_err() {
            trace!(event = kind.name(), "No subscriber, event dropped");
        }
    }
}

pub(crate) fn event_channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = flume::unbounded();
    (EventSender { sender }, receiver)
}
