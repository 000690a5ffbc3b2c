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

//! GMCP message routing: `<Package.Name> <json>` carried in subnegotiations of the GMCP option.

use serde_json::Value;

/// A decoded GMCP message.
#[derive(Debug, Clone, PartialEq)]
pub struct GmcpMessage {
    /// Message name, e.g. `Core.Hello` or `room.info`.
    pub package: String,
    /// Parsed body. Bare messages with no body carry an empty string.
    pub payload: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("Malformed GMCP payload for {package}: {source}")]
pub struct GmcpError {
    pub package: String,
    #[source]
    pub source: serde_json::Error,
}

/// Decode a GMCP subnegotiation payload.
///
/// Returns `Ok(None)` for a payload that is empty after trimming.
pub fn parse_message(raw: &[u8]) -> Result<Option<GmcpMessage>, GmcpError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let Some((package, body)) = text.split_once(' ') else {
        return Ok(Some(GmcpMessage {
            package: text.to_string(),
            payload: Value::String(String::new()),
        }));
    };

    let payload = serde_json::from_str(body).map_err(|source| GmcpError {
        package: package.to_string(),
        source,
    })?;
    Ok(Some(GmcpMessage {
        package: package.to_string(),
        payload,
    }))
}

/// Render the body of an outbound GMCP message.
pub fn encode_message(package: &str, payload: &Value) -> String {
    match payload {
        Value::String(s) if s.is_empty() => package.to_string(),
        _ => format!("{package} {payload}"),
    }
}
