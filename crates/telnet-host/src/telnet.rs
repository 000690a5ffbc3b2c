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

//! Telnet protocol constants, option identifiers and the per-option compatibility table
//! consulted by the negotiation codec.

use bytes::{BufMut, Bytes, BytesMut};

/// Interpret As Command.
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Subnegotiation begin.
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const EL: u8 = 248;
pub const EC: u8 = 247;
pub const AYT: u8 = 246;
pub const AO: u8 = 245;
pub const IP: u8 = 244;
pub const BRK: u8 = 243;
pub const DM: u8 = 242;
pub const NOP: u8 = 241;
/// Subnegotiation end.
pub const SE: u8 = 240;

/// Option identifiers. Only the ones MUD servers and clients commonly exchange are named.
pub mod option {
    pub const BINARY: u8 = 0;
    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const TTYPE: u8 = 24;
    pub const EOR: u8 = 25;
    pub const NAWS: u8 = 31;
    pub const LINEMODE: u8 = 34;
    pub const CHARSET: u8 = 42;
    pub const MSDP: u8 = 69;
    pub const MSSP: u8 = 70;
    pub const MCCP2: u8 = 86;
    pub const MXP: u8 = 91;
    /// Generic MUD Communication Protocol, the keyed JSON side-channel.
    pub const GMCP: u8 = 201;
}

/// Human readable name for a command byte, for logging.
pub fn command_name(command: u8) -> &'static str {
    match command {
        IAC => "IAC",
        DONT => "DONT",
        DO => "DO",
        WONT => "WONT",
        WILL => "WILL",
        SB => "SB",
        GA => "GA",
        EL => "EL",
        EC => "EC",
        AYT => "AYT",
        AO => "AO",
        IP => "IP",
        BRK => "BRK",
        DM => "DM",
        NOP => "NOP",
        SE => "SE",
        _ => "UNKNOWN",
    }
}

/// Negotiation state for a single option.
///
/// `local` / `remote` say whether we are willing to enable the option on our side / the peer's
/// side at all. `local_enabled` / `remote_enabled` track what has actually been agreed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionEntry {
    pub local: bool,
    pub remote: bool,
    pub local_enabled: bool,
    pub remote_enabled: bool,
}

impl OptionEntry {
    /// True if the option is enabled in either direction.
    pub fn is_active(&self) -> bool {
        self.local_enabled || self.remote_enabled
    }
}

/// Compatibility table covering every possible option byte.
#[derive(Clone, Debug)]
pub struct OptionTable {
    entries: [OptionEntry; 256],
}

impl Default for OptionTable {
    fn default() -> Self {
        Self {
            entries: [OptionEntry::default(); 256],
        }
    }
}

impl OptionTable {
    pub fn get(&self, option: u8) -> OptionEntry {
        self.entries[usize::from(option)]
    }

    pub fn get_mut(&mut self, option: u8) -> &mut OptionEntry {
        &mut self.entries[usize::from(option)]
    }

    /// Declare that we are willing to perform `option` ourselves.
    pub fn support_local(&mut self, option: u8) {
        self.get_mut(option).local = true;
    }

    /// Declare that we are willing to let the peer perform `option`.
    pub fn support_remote(&mut self, option: u8) {
        self.get_mut(option).remote = true;
    }

    /// Forget everything agreed so far, keeping what is supported.
    pub fn reset_enabled(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.local_enabled = false;
            entry.remote_enabled = false;
        }
    }
}

/// `IAC <command> <option>`.
pub fn negotiation(command: u8, option: u8) -> Bytes {
    Bytes::copy_from_slice(&[IAC, command, option])
}

/// Append `data` to `buf`, doubling every IAC byte.
pub fn escape_iac(data: &[u8], buf: &mut BytesMut) {
    for chunk in data.split_inclusive(|b| *b == IAC) {
        buf.put_slice(chunk);
        if chunk.last() == Some(&IAC) {
            buf.put_u8(IAC);
        }
    }
}

/// `IAC SB <option> <escaped payload> IAC SE`.
pub fn subnegotiation(option: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 5);
    buf.put_slice(&[IAC, SB, option]);
    escape_iac(payload, &mut buf);
    buf.put_slice(&[IAC, SE]);
    buf.freeze()
}
