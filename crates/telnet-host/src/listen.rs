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

//! The telnet server: accept loop, per-connection read loops, and translation of codec events
//! into [`ServerEvent`]s.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::select;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::connection_codec::{TelnetCodec, TelnetEvent};
use crate::error::{ConnectionError, ServerError};
use crate::events::{EventReceiver, EventSender, ServerEvent, event_channel};
use crate::gmcp;
use crate::registry::Registry;
use crate::telnet::command_name;
use crate::telnet::option::GMCP;

/// State shared between the server handle, the accept loop and every connection task.
struct Shared {
    registry: Registry,
    /// Set once a deliberate shutdown begins; suppresses disconnect events from then on.
    closing: AtomicBool,
    events: EventSender,
    max_buffer_length: usize,
}

impl Shared {
    fn new(max_buffer_length: usize) -> (Arc<Self>, EventReceiver) {
        let (events, receiver) = event_channel();
        let shared = Arc::new(Self {
            registry: Registry::default(),
            closing: AtomicBool::new(false),
            events,
            max_buffer_length,
        });
        (shared, receiver)
    }

    fn close_all(&self) {
        for connection in self.registry.snapshot() {
            connection.close();
        }
    }
}

pub struct TelnetServer {
    host: String,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    finished: CancellationToken,
}

impl TelnetServer {
    /// Bind the listener and start accepting connections in the background.
    ///
    /// Returns the server handle and the receiver every [`ServerEvent`] is published to.
    pub async fn listen(config: ServerConfig) -> Result<(Self, EventReceiver), ServerError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        let (shared, receiver) = Shared::new(config.max_buffer_length);
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();

        info!(%local_addr, "Listening");
        tokio::spawn(accept_loop(
            listener,
            shared.clone(),
            shutdown.clone(),
            finished.clone(),
        ));

        let server = Self {
            host: config.host,
            local_addr,
            shared,
            shutdown,
            finished,
        };
        Ok((server, receiver))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port actually bound; differs from the configured one only when that was 0.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection(&self, client_id: &Uuid) -> Option<Arc<Connection>> {
        self.shared.registry.get(client_id)
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Gracefully shut down: close every connection without publishing disconnects for them,
    /// then close the listener. `ServerEvent::Close` follows once all of them are torn down.
    /// Calling this again is harmless.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(local_addr = %self.local_addr, connections = self.connection_count(), "Closing server");
        self.shared.close_all();
        self.shutdown.cancel();
    }

    /// Resolves once `ServerEvent::Close` has been published.
    pub async fn closed(&self) {
        self.finished.cancelled().await
    }
}

impl Drop for TelnetServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Where the accept loop gets its connections from.
trait Acceptor: Send + 'static {
    fn accept(
        &mut self,
        codec: TelnetCodec,
    ) -> impl Future<Output = io::Result<Connection>> + Send;
}

impl Acceptor for TcpListener {
    async fn accept(&mut self, codec: TelnetCodec) -> io::Result<Connection> {
        let (stream, peer_addr) = TcpListener::accept(self).await?;
        Ok(Connection::new(stream, peer_addr, codec))
    }
}

async fn accept_loop<A: Acceptor>(
    mut listener: A,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    finished: CancellationToken,
) {
    let mut tasks = JoinSet::new();
    let outcome = loop {
        let codec = TelnetCodec::new_with_max_length(shared.max_buffer_length);
        select! {
            _ = shutdown.cancelled() => break Ok(()),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
            accepted = listener.accept(codec) => match accepted {
                Ok(connection) => {
                    let connection = open_connection(&shared, connection);
                    tasks.spawn(run_connection(connection, shared.clone()));
                }
                Err(e) => break Err(e),
            },
        }
    };
    drop(listener);

    if let Err(e) = outcome {
        error!("Listener failed: {e}");
        shared.events.publish(ServerEvent::Error(ServerError::Accept(e)));
        shared.closing.store(true, Ordering::SeqCst);
    }

    // Anything accepted after `close` took its snapshot is still open.
    shared.close_all();
    while let Some(joined) = tasks.join_next().await {
        reap(joined);
    }

    info!("Server closed");
    shared.events.publish(ServerEvent::Close);
    finished.cancel();
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!("Connection task panicked: {e}");
    }
}

fn open_connection(shared: &Shared, connection: Connection) -> Arc<Connection> {
    let connection = Arc::new(connection);
    info!(peer_addr = ?connection.peer_addr(), client_id = ?connection.id(), "Accepted connection");
    shared.registry.insert(connection.clone());
    shared.events.publish(ServerEvent::Connect(connection.clone()));
    connection
}

/// Drive one connection to completion, then tear it down.
async fn run_connection(connection: Arc<Connection>, shared: Arc<Shared>) {
    let client_id = connection.id();
    let error = match drive_connection(&connection, &shared.events).await {
        Ok(()) => None,
        Err(e) if e.is_disconnect() => {
            debug!(?client_id, "Connection dropped: {e}");
            None
        }
        Err(e) => {
            warn!(?client_id, "Connection failed: {e}");
            Some(e)
        }
    };

    shared.registry.remove(&client_id);
    connection.close();

    if shared.closing.load(Ordering::SeqCst) {
        debug!(?client_id, "Connection closed during shutdown");
        return;
    }
    info!(?client_id, "Connection closed");
    shared
        .events
        .publish(ServerEvent::Disconnect(connection, error));
}

async fn drive_connection(
    connection: &Arc<Connection>,
    events: &EventSender,
) -> Result<(), ConnectionError> {
    // Offer GMCP before looking at anything the client sends.
    let proposal = connection.with_codec(|codec| {
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP)
    });
    if let Some(proposal) = proposal {
        connection.write(&proposal).await?;
    }

    let mut stream = connection.events()?;
    while let Some(event) = stream.next().await {
        dispatch(connection, event?, events)?;
    }
    Ok(())
}

fn dispatch(
    connection: &Arc<Connection>,
    event: TelnetEvent,
    events: &EventSender,
) -> Result<(), ConnectionError> {
    match event {
        TelnetEvent::Text(line) => {
            let line = String::from_utf8_lossy(&line).trim().to_string();
            events.publish(ServerEvent::Text(connection.clone(), line));
        }
        TelnetEvent::Subnegotiation { option, payload } => {
            events.publish(ServerEvent::Subnegotiation(
                connection.clone(),
                option,
                payload.clone(),
            ));
            if option == GMCP
                && let Some(message) = gmcp::parse_message(&payload)?
            {
                events.publish(ServerEvent::Gmcp(
                    connection.clone(),
                    message.package,
                    message.payload,
                ));
            }
        }
        TelnetEvent::Negotiation { command, option } => {
            debug!(client_id = ?connection.id(), command = command_name(command), option, "Negotiation");
        }
        TelnetEvent::Command(command) => {
            trace!(client_id = ?connection.id(), command = command_name(command), "Command");
        }
        TelnetEvent::Send(_) => {
            // Written by the connection itself; never reaches here.
        }
    }
    Ok(())
}
