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

use clap::Parser;
use clap_derive::Parser;
use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde_derive::{Deserialize, Serialize};
use serde_json::json;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use telwire_telnet_host::{
    Connection, DEFAULT_MAX_BUFFER_LENGTH, EventReceiver, ServerConfig, ServerEvent, TelnetServer,
};

#[derive(Parser, Debug, Serialize, Deserialize)]
struct Args {
    #[arg(
        long,
        value_name = "host",
        help = "Telnet server listen address",
        default_value = "127.0.0.1"
    )]
    host: String,

    #[arg(
        long,
        value_name = "port",
        help = "Telnet server listen port",
        default_value = "8888"
    )]
    port: u16,

    #[arg(
        long,
        value_name = "bytes",
        help = "Largest line or subnegotiation accepted from a client",
        default_value_t = DEFAULT_MAX_BUFFER_LENGTH
    )]
    max_buffer_length: usize,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,

    #[arg(long, help = "Yaml config file to use, overrides values in CLI args")]
    config_file: Option<String>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.port)
            .with_host(self.host.clone())
            .with_max_buffer_length(self.max_buffer_length)
    }
}

async fn reply(connection: &Connection, text: &str) {
    if let Err(e) = connection.send(text).await {
        debug!(client_id = ?connection.id(), "Unable to send to client: {e}");
    }
}

/// A small demonstration application: greets, echoes, and answers `Core.Hello`.
async fn serve_events(events: EventReceiver) {
    while let Ok(event) = events.recv_async().await {
        match event {
            ServerEvent::Connect(connection) => {
                info!(client_id = ?connection.id(), peer_addr = ?connection.peer_addr(), "Client connected");
                reply(&connection, "Welcome to telwire. Type 'quit' to leave.").await;
            }
            ServerEvent::Text(connection, line) => match line.as_str() {
                "quit" => {
                    reply(&connection, "Goodbye.").await;
                    connection.close();
                }
                "" => {}
                _ => reply(&connection, &format!("You said: {line}")).await,
            },
            ServerEvent::Subnegotiation(connection, option, payload) => {
                debug!(client_id = ?connection.id(), option, len = payload.len(), "Subnegotiation");
            }
            ServerEvent::Gmcp(connection, package, payload) => {
                info!(client_id = ?connection.id(), %package, %payload, "GMCP");
                if package.eq_ignore_ascii_case("Core.Hello") {
                    let hello = json!({
                        "name": "telwire",
                        "version": env!("CARGO_PKG_VERSION"),
                    });
                    if let Err(e) = connection.send_gmcp("Core.Hello", &hello).await {
                        debug!(client_id = ?connection.id(), "Unable to send GMCP: {e}");
                    }
                }
            }
            ServerEvent::Disconnect(connection, error) => match error {
                Some(e) => warn!(client_id = ?connection.id(), "Client disconnected: {e}"),
                None => info!(client_id = ?connection.id(), "Client disconnected"),
            },
            ServerEvent::Error(e) => {
                error!("Server error: {e}");
            }
            ServerEvent::Close => {
                info!("Server closed");
                break;
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let cli_args = Args::parse();
    let config_file = cli_args.config_file.clone();
    let mut args_figment = Figment::new().merge(Serialized::defaults(cli_args));
    if let Some(config_file) = config_file {
        args_figment = args_figment.merge(Yaml::file(config_file));
    }
    let args = args_figment.extract::<Args>()?;

    telwire_common::tracing::init_tracing(args.debug)?;

    let mut hup_signal = signal(SignalKind::hangup())?;
    let mut stop_signal = signal(SignalKind::interrupt())?;

    let (server, events) = TelnetServer::listen(args.server_config()).await?;
    info!("Host started, listening @ {}...", server.local_addr());

    let app = tokio::spawn(serve_events(events));

    select! {
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
        },
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
        },
        _ = server.closed() => {
            warn!("Server stopped on its own");
        }
    }
    server.close();
    server.closed().await;
    app.await?;
    info!("Done.");

    Ok(())
}
