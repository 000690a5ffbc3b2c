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

//! A single accepted telnet connection: a socket plus its negotiation codec.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::oneshot;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::connection_codec::{TelnetCodec, TelnetEvent};
use crate::error::ConnectionError;
use crate::gmcp;
use crate::telnet::option::GMCP;

/// The inbound side of a connection, as produced by [`Connection::events`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TelnetEvent, ConnectionError>> + Send>>;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Bytes queued for the writer task. Replies generated while decoding carry no ack.
struct Outbound {
    data: Bytes,
    ack: Option<oneshot::Sender<io::Result<usize>>>,
}

pub struct Connection {
    client_id: Uuid,
    peer_addr: Option<SocketAddr>,
    codec: Arc<Mutex<TelnetCodec>>,
    outbound: flume::Sender<Outbound>,
    reader: Mutex<Option<BoxedReader>>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap an accepted TCP stream. Must be called from within a tokio runtime.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, codec: TelnetCodec) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(?peer_addr, "Unable to set TCP_NODELAY: {e}");
        }
        let (read, write) = stream.into_split();
        Self::from_parts(Box::new(read), write, Some(peer_addr), codec)
    }

    /// Wrap any duplex byte stream, e.g. a TLS stream or an in-memory pipe.
    pub fn from_stream<S>(stream: S, peer_addr: Option<SocketAddr>, codec: TelnetCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(Box::new(read), write, peer_addr, codec)
    }

    fn from_parts<W>(
        reader: BoxedReader,
        writer: W,
        peer_addr: Option<SocketAddr>,
        codec: TelnetCodec,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client_id = Uuid::new_v4();
        let closed = CancellationToken::new();
        let (outbound, outbound_recv) = flume::unbounded();
        tokio::spawn(write_loop(client_id, writer, outbound_recv, closed.clone()));
        Self {
            client_id,
            peer_addr,
            codec: Arc::new(Mutex::new(codec)),
            outbound,
            reader: Mutex::new(Some(reader)),
            closed,
        }
    }

    pub fn id(&self) -> Uuid {
        self.client_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Run `f` with exclusive access to the negotiation codec, e.g. to mark options as
    /// supported or to build a negotiation request.
    pub fn with_codec<R>(&self, f: impl FnOnce(&mut TelnetCodec) -> R) -> R {
        f(&mut lock(&self.codec))
    }

    /// Write raw bytes to the peer, returning how many were written.
    pub async fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.write_bytes(Bytes::copy_from_slice(data)).await
    }

    /// Send a line of text, encoded by the codec.
    pub async fn send(&self, text: &str) -> io::Result<usize> {
        let encoded = self.with_codec(|codec| codec.encode_text(text));
        self.write_bytes(encoded).await
    }

    /// Send a GMCP message. Fails with `InvalidInput` if GMCP hasn't been negotiated.
    pub async fn send_gmcp<T>(&self, package: &str, payload: &T) -> io::Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let body = gmcp::encode_message(package, &payload);
        let Some(framed) = self.with_codec(|codec| codec.encode_subnegotiation(GMCP, body.as_bytes()))
        else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "GMCP is not enabled on this connection",
            ));
        };
        self.write_bytes(framed).await
    }

    async fn write_bytes(&self, data: Bytes) -> io::Result<usize> {
        if self.is_closed() {
            return Err(not_connected());
        }
        let (ack, done) = oneshot::channel();
        self.outbound
            .send(Outbound {
                data,
                ack: Some(ack),
            })
            .map_err(|_| not_connected())?;
        done.await.map_err(|_| not_connected())?
    }

    /// Close the socket. Idempotent. The read stream ends as if the peer had hung up, and any
    /// further writes fail with `NotConnected`.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            trace!(client_id = ?self.client_id, "Closing connection");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// The stream of protocol events decoded from the socket.
    ///
    /// Replies the codec produces while decoding are queued for writing and never appear in the
    /// stream. The stream ends at end-of-input, on the first error, or once the connection is
    /// closed. It can be taken only once.
    pub fn events(&self) -> Result<EventStream, ConnectionError> {
        let reader = lock(&self.reader)
            .take()
            .ok_or(ConnectionError::EventsTaken)?;
        let client_id = self.client_id;
        let outbound = self.outbound.clone();
        let frames = FramedRead::new(reader, SharedCodec(self.codec.clone()));
        let stream = frames
            .take_until(self.closed.clone().cancelled_owned())
            .filter_map(move |item| {
                let event = match item {
                    Ok(TelnetEvent::Send(reply)) => {
                        // Not awaited: decoding carries on while the reply is written.
                        let queued = outbound.send(Outbound {
                            data: reply,
                            ack: None,
                        });
                        if queued.is_err() {
                            trace!(?client_id, "Writer gone, negotiation reply dropped");
                        }
                        None
                    }
                    Ok(event) => Some(Ok(event)),
                    Err(e) => Some(Err(ConnectionError::from(e))),
                };
                futures_util::future::ready(event)
            });
        Ok(Box::pin(stream))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_connected() -> io::Error {
    io::Error::from(io::ErrorKind::NotConnected)
}

/// Lets the read side decode with the same codec instance the write side encodes with.
struct SharedCodec(Arc<Mutex<TelnetCodec>>);

impl Decoder for SharedCodec {
    type Item = TelnetEvent;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        lock(&self.0).decode(buf)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        lock(&self.0).decode_eof(buf)
    }
}

/// Owns the write half. Writes are performed strictly in the order they were queued. Closing
/// the connection abandons a write stalled on a peer that has stopped reading.
async fn write_loop<W>(
    client_id: Uuid,
    mut writer: W,
    outbound: flume::Receiver<Outbound>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let Outbound { data, ack } = select! {
            biased;
            _ = closed.cancelled() => break,
            message = outbound.recv_async() => match message {
                Ok(message) => message,
                Err(_) => break,
            },
        };
        let result = select! {
            biased;
            _ = closed.cancelled() => Err(not_connected()),
            result = write_flushed(&mut writer, &data) => result,
        };
        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    debug!(?client_id, "Unable to write negotiation reply: {e}");
                }
            }
        }
    }
    if let Err(e) = writer.shutdown().await {
        trace!(?client_id, "Shutdown of write side failed: {e}");
    }
}

async fn write_flushed<W>(writer: &mut W, data: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::{self, DO, IAC, SB, SE, WILL, WONT, option::ECHO};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn pair() -> (Connection, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(4096);
        (
            Connection::from_stream(ours, None, TelnetCodec::new()),
            theirs,
        )
    }

    async fn read_exactly(peer: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        peer.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_write_and_send() {
        let (connection, mut peer) = pair();
        assert_eq!(connection.write(b"raw").await.unwrap(), 3);
        assert_eq!(connection.send("hi").await.unwrap(), 4);
        assert_eq!(read_exactly(&mut peer, 7).await, b"rawhi\r\n");
    }

    #[tokio::test]
    async fn test_events_in_order_and_replies_hidden() {
        let (connection, mut peer) = pair();
        let mut events = connection.events().unwrap();

        peer.write_all(b"look\r\n").await.unwrap();
        peer.write_all(&[IAC, DO, ECHO]).await.unwrap();
        peer.write_all(b"north\n").await.unwrap();

        assert_eq!(
            events.next().await.unwrap().unwrap(),
            TelnetEvent::Text(Bytes::from_static(b"look"))
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            TelnetEvent::Negotiation {
                command: DO,
                option: ECHO
            }
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            TelnetEvent::Text(Bytes::from_static(b"north"))
        );

        // The refusal went straight back to the peer.
        assert_eq!(read_exactly(&mut peer, 3).await, [IAC, WONT, ECHO]);
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let (connection, _peer) = pair();
        let _events = connection.events().unwrap();
        assert!(matches!(
            connection.events(),
            Err(ConnectionError::EventsTaken)
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_at_eof() {
        let (connection, peer) = pair();
        let mut events = connection.events().unwrap();
        drop(peer);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_stream_and_is_idempotent() {
        let (connection, _peer) = pair();
        let mut events = connection.events().unwrap();
        connection.close();
        connection.close();
        assert!(connection.is_closed());
        assert!(events.next().await.is_none());

        let err = connection.send("too late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_close_abandons_stalled_write() {
        let (ours, _peer) = tokio::io::duplex(8);
        let connection = Arc::new(Connection::from_stream(ours, None, TelnetCodec::new()));

        // The peer never reads, so this write can't complete.
        let writer = connection.clone();
        let write = tokio::spawn(async move { writer.write(&[0; 1024]).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!write.is_finished());

        connection.close();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), write)
            .await
            .expect("write still blocked after close")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_send_gmcp_requires_negotiation() {
        let (connection, mut peer) = pair();
        let err = connection
            .send_gmcp("Core.Ping", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let proposal = connection.with_codec(|codec| {
            codec.options_mut().support_local(GMCP);
            codec.will(GMCP)
        });
        assert_eq!(proposal, Some(telnet::negotiation(WILL, GMCP)));

        connection.send_gmcp("Core.Ping", "").await.unwrap();
        let mut expected = vec![IAC, SB, GMCP];
        expected.extend_from_slice(b"Core.Ping");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(read_exactly(&mut peer, expected.len()).await, expected);
    }
}
