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

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use telwire_telnet_host::telnet::option::GMCP;
use telwire_telnet_host::telnet::{IAC, SB, SE, WILL};
use telwire_telnet_host::{EventReceiver, ServerConfig, ServerEvent, TelnetServer};

const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_server() -> (TelnetServer, EventReceiver) {
    TelnetServer::listen(ServerConfig::new(0))
        .await
        .expect("Failed to start server")
}

/// Wait for the next published event, failing the test if none arrives in time.
pub async fn next_event(events: &EventReceiver) -> ServerEvent {
    timeout(TIMEOUT, events.recv_async())
        .await
        .expect("Timed out waiting for server event")
        .expect("Event channel closed")
}

/// A raw telnet client speaking just enough of the protocol for tests.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connect and consume the server's GMCP offer.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to server");
        let mut client = Self { stream };
        client.expect_bytes(&[IAC, WILL, GMCP]).await;
        client
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("Failed to write to server");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    pub async fn send_gmcp(&mut self, body: &str) {
        let mut framed = vec![IAC, SB, GMCP];
        framed.extend_from_slice(body.as_bytes());
        framed.extend_from_slice(&[IAC, SE]);
        self.send_raw(&framed).await;
    }

    pub async fn read_exactly(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        timeout(TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .expect("Timed out reading from server")
            .expect("Failed to read from server");
        buf
    }

    pub async fn expect_bytes(&mut self, expected: &[u8]) {
        assert_eq!(self.read_exactly(expected.len()).await, expected);
    }

    /// Read until the server closes its side, returning whatever arrived first.
    pub async fn read_to_eof(&mut self) -> Vec<u8> {
        let mut buf = vec![];
        timeout(TIMEOUT, self.stream.read_to_end(&mut buf))
            .await
            .expect("Timed out waiting for server to close connection")
            .expect("Failed to read from server");
        buf
    }
}
