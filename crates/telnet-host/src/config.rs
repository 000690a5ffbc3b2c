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

use serde_derive::{Deserialize, Serialize};

use crate::connection_codec::DEFAULT_MAX_BUFFER_LENGTH;

pub const DEFAULT_HOST: &str = "127.0.0.1";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_max_buffer_length() -> usize {
    DEFAULT_MAX_BUFFER_LENGTH
}

/// Where and how a [`crate::TelnetServer`] listens. `port` is required; everything else has a
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Largest line or subnegotiation accepted from a client, in bytes.
    #[serde(default = "default_max_buffer_length")]
    pub max_buffer_length: usize,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: default_host(),
            port,
            max_buffer_length: default_max_buffer_length(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_max_buffer_length(mut self, max_buffer_length: usize) -> Self {
        self.max_buffer_length = max_buffer_length;
        self
    }

    pub(crate) fn bind_address(&self) -> String {
        // Bare IPv6 literals need brackets.
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
