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

//! Telnet negotiation codec: turns inbound wire bytes into [`TelnetEvent`]s, answers option
//! negotiation according to its [`OptionTable`], and encodes outbound text.
//!
//! Text is framed into lines the same way `LinesCodec` does (LF terminated, trailing CR
//! stripped). A partial line is delivered early when a subnegotiation arrives before its
//! terminator, so the two keep their arrival order. Replies the peer must receive are surfaced
//! as [`TelnetEvent::Send`]; the connection writes those back itself and never hands them to
//! the application.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::telnet::{
    self, DO, DONT, IAC, OptionEntry, OptionTable, SB, SE, WILL, WONT, command_name,
};

/// Default cap on a single line or subnegotiation payload.
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 64 * 1024;

/// Items produced while decoding inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// One line of plain text, without its line terminator.
    Text(Bytes),
    /// A complete `IAC SB <option> ... IAC SE` with the payload unescaped.
    Subnegotiation { option: u8, payload: Bytes },
    /// The peer sent `IAC <DO|DONT|WILL|WONT> <option>`.
    Negotiation { command: u8, option: u8 },
    /// Any other `IAC <command>`, e.g. NOP, GA or AYT.
    Command(u8),
    /// Bytes that must be written back to the peer immediately.
    Send(Bytes),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Negotiate(u8),
    SubOption,
    SubData(u8),
    SubIac(u8),
}

pub struct TelnetCodec {
    options: OptionTable,
    state: State,
    line: BytesMut,
    sub: BytesMut,
    pending: VecDeque<TelnetEvent>,
    max_length: usize,
}

impl TelnetCodec {
    pub fn new() -> Self {
        Self::new_with_max_length(DEFAULT_MAX_BUFFER_LENGTH)
    }

    /// Create a codec which rejects lines or subnegotiations longer than `max_length` bytes.
    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            options: OptionTable::default(),
            state: State::Data,
            line: BytesMut::new(),
            sub: BytesMut::new(),
            pending: VecDeque::new(),
            max_length,
        }
    }

    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionTable {
        &mut self.options
    }

    /// Offer to perform `option` ourselves. Returns the bytes to send, or `None` if the option
    /// isn't locally supported or is already enabled.
    pub fn will(&mut self, option: u8) -> Option<Bytes> {
        let entry = self.options.get_mut(option);
        if !entry.local || entry.local_enabled {
            return None;
        }
        entry.local_enabled = true;
        Some(telnet::negotiation(WILL, option))
    }

    /// Stop performing `option` ourselves.
    pub fn wont(&mut self, option: u8) -> Option<Bytes> {
        let entry = self.options.get_mut(option);
        if !entry.local_enabled {
            return None;
        }
        entry.local_enabled = false;
        Some(telnet::negotiation(WONT, option))
    }

    /// Ask the peer to perform `option`.
    pub fn do_(&mut self, option: u8) -> Option<Bytes> {
        let entry = self.options.get_mut(option);
        if !entry.remote || entry.remote_enabled {
            return None;
        }
        entry.remote_enabled = true;
        Some(telnet::negotiation(DO, option))
    }

    /// Ask the peer to stop performing `option`.
    pub fn dont(&mut self, option: u8) -> Option<Bytes> {
        let entry = self.options.get_mut(option);
        if !entry.remote_enabled {
            return None;
        }
        entry.remote_enabled = false;
        Some(telnet::negotiation(DONT, option))
    }

    /// Encode a line of outbound text: IAC is escaped, bare LF becomes CRLF, and the line is
    /// terminated with CRLF if it isn't already.
    pub fn encode_text(&self, text: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(text.len() + 2);
        let mut previous = None;
        for &byte in text.as_bytes() {
            match byte {
                IAC => buf.put_slice(&[IAC, IAC]),
                b'\n' if previous != Some(b'\r') => buf.put_slice(b"\r\n"),
                _ => buf.put_u8(byte),
            }
            previous = Some(byte);
        }
        if !buf.ends_with(b"\r\n") {
            buf.put_slice(b"\r\n");
        }
        buf.freeze()
    }

    /// Frame a subnegotiation for `option`. Returns `None` unless the option has been enabled in
    /// at least one direction.
    pub fn encode_subnegotiation(&self, option: u8, payload: &[u8]) -> Option<Bytes> {
        if !self.options.get(option).is_active() {
            return None;
        }
        Some(telnet::subnegotiation(option, payload))
    }

    /// Apply the peer's negotiation to our table, returning the answer if one is owed.
    fn answer(&mut self, command: u8, option: u8) -> Option<Bytes> {
        let entry: &mut OptionEntry = self.options.get_mut(option);
        let (enable, reply) = match command {
            WILL if !entry.remote => return Some(telnet::negotiation(DONT, option)),
            WILL if entry.remote_enabled => return None,
            WILL => {
                entry.remote_enabled = true;
                (true, DO)
            }
            WONT if !entry.remote_enabled => return None,
            WONT => {
                entry.remote_enabled = false;
                (false, DONT)
            }
            DO if !entry.local => return Some(telnet::negotiation(WONT, option)),
            DO if entry.local_enabled => return None,
            DO => {
                entry.local_enabled = true;
                (true, WILL)
            }
            DONT if !entry.local_enabled => return None,
            DONT => {
                entry.local_enabled = false;
                (false, WONT)
            }
            _ => return None,
        };
        trace!(option, enable, reply = command_name(reply), "Option state changed");
        Some(telnet::negotiation(reply, option))
    }

    fn take_line(&mut self) -> TelnetEvent {
        let mut line = self.line.split();
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
        TelnetEvent::Text(line.freeze())
    }

    fn push_line(&mut self, byte: u8) -> Result<(), io::Error> {
        if self.line.len() >= self.max_length {
            self.line.clear();
            return Err(self.overlong());
        }
        self.line.put_u8(byte);
        Ok(())
    }

    fn overlong(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("input exceeds maximum length of {} bytes", self.max_length),
        )
    }

    /// Feed one byte through the state machine.
    fn step(&mut self, byte: u8) -> Result<Option<TelnetEvent>, io::Error> {
        let state = self.state;
        match state {
            State::Data => match byte {
                IAC => self.state = State::Iac,
                b'\n' => return Ok(Some(self.take_line())),
                // CR NUL is a bare carriage return.
                0 => {}
                _ => self.push_line(byte)?,
            },
            State::Iac => {
                self.state = State::Data;
                match byte {
                    IAC => self.push_line(IAC)?,
                    DO | DONT | WILL | WONT => self.state = State::Negotiate(byte),
                    SB => self.state = State::SubOption,
                    _ => return Ok(Some(TelnetEvent::Command(byte))),
                }
            }
            State::Negotiate(command) => {
                self.state = State::Data;
                if let Some(reply) = self.answer(command, byte) {
                    self.pending.push_back(TelnetEvent::Send(reply));
                }
                return Ok(Some(TelnetEvent::Negotiation {
                    command,
                    option: byte,
                }));
            }
            State::SubOption => {
                self.sub.clear();
                self.state = State::SubData(byte);
            }
            State::SubData(option) => {
                if byte == IAC {
                    self.state = State::SubIac(option);
                } else {
                    if self.sub.len() >= self.max_length {
                        self.sub.clear();
                        self.state = State::Data;
                        return Err(self.overlong());
                    }
                    self.sub.put_u8(byte);
                }
            }
            State::SubIac(option) => match byte {
                IAC => {
                    self.sub.put_u8(IAC);
                    self.state = State::SubData(option);
                }
                SE => {
                    self.state = State::Data;
                    let payload = self.sub.split().freeze();
                    if !self.options.get(option).is_active() {
                        trace!(option, "Dropping subnegotiation for inactive option");
                        return Ok(None);
                    }
                    let event = TelnetEvent::Subnegotiation { option, payload };
                    // Text received ahead of the subnegotiation must be delivered ahead of it.
                    if self.line.is_empty() {
                        return Ok(Some(event));
                    }
                    self.pending.push_back(event);
                    return Ok(Some(self.take_line()));
                }
                _ => {
                    // Unterminated subnegotiation; abandon it and treat this as a fresh command.
                    trace!(option, "Subnegotiation aborted by IAC {}", command_name(byte));
                    self.sub.clear();
                    self.state = State::Iac;
                    return self.step(byte);
                }
            },
        }
        Ok(None)
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        while buf.has_remaining() {
            let byte = buf.get_u8();
            if let Some(event) = self.step(byte)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.decode(buf)? {
            return Ok(Some(event));
        }
        // Flush an unterminated final line, even if a command or subnegotiation was cut short.
        self.state = State::Data;
        self.sub.clear();
        if !self.line.is_empty() {
            return Ok(Some(self.take_line()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::option::{ECHO, GMCP, NAWS};
    use crate::telnet::{GA, NOP};

    fn decode_all(codec: &mut TelnetCodec, input: &[u8]) -> Vec<TelnetEvent> {
        let mut buf = BytesMut::from(input);
        let mut events = vec![];
        while let Some(event) = codec.decode(&mut buf).unwrap() {
            events.push(event);
        }
        events
    }

    fn text(s: &str) -> TelnetEvent {
        TelnetEvent::Text(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_lines_are_framed() {
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, b"hello\nworld\r\npartial");
        assert_eq!(events, vec![text("hello"), text("world")]);

        // The partial line completes with the next chunk.
        let events = decode_all(&mut codec, b" line\r\n");
        assert_eq!(events, vec![text("partial line")]);
    }

    #[test]
    fn test_unterminated_line_flushed_at_eof() {
        let mut codec = TelnetCodec::new();
        assert!(decode_all(&mut codec, b"bye").is_empty());
        let mut buf = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(text("bye")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_line_flushed_at_eof_after_truncated_sequence() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);
        assert!(decode_all(&mut codec, &[b'b', b'y', b'e', IAC, SB, GMCP, b'x']).is_empty());
        let mut buf = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(text("bye")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);

        let mut codec = TelnetCodec::new();
        assert!(decode_all(&mut codec, &[b'b', b'y', b'e', IAC]).is_empty());
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(text("bye")));
    }

    #[test]
    fn test_partial_line_precedes_subnegotiation() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);

        let mut input = b"look".to_vec();
        input.extend_from_slice(&[IAC, SB, GMCP]);
        input.extend_from_slice(b"hello");
        input.extend_from_slice(&[IAC, SE, b'\n']);
        let events = decode_all(&mut codec, &input);
        assert_eq!(
            events,
            vec![
                text("look"),
                TelnetEvent::Subnegotiation {
                    option: GMCP,
                    payload: Bytes::from_static(b"hello")
                },
                text(""),
            ]
        );
    }

    #[test]
    fn test_escaped_iac_counts_towards_max_length() {
        let mut codec = TelnetCodec::new_with_max_length(16);
        let mut buf = BytesMut::from(&[IAC; 200][..]);
        let result = codec.decode(&mut buf);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(codec.line.len() <= 16);
    }

    #[test]
    fn test_escaped_iac_in_text() {
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, &[b'a', IAC, IAC, b'b', b'\n']);
        assert_eq!(
            events,
            vec![TelnetEvent::Text(Bytes::from_static(&[b'a', IAC, b'b']))]
        );
    }

    #[test]
    fn test_commands_interleaved_with_text() {
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, &[b'h', IAC, NOP, b'i', IAC, GA, b'\n']);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Command(NOP),
                TelnetEvent::Command(GA),
                text("hi")
            ]
        );
    }

    #[test]
    fn test_will_only_when_supported_and_not_enabled() {
        let mut codec = TelnetCodec::new();
        assert_eq!(codec.will(GMCP), None);

        codec.options_mut().support_local(GMCP);
        assert_eq!(codec.will(GMCP), Some(telnet::negotiation(WILL, GMCP)));
        assert!(codec.options().get(GMCP).local_enabled);

        // Already proposed; nothing further to send.
        assert_eq!(codec.will(GMCP), None);
        assert_eq!(codec.wont(GMCP), Some(telnet::negotiation(WONT, GMCP)));
        assert_eq!(codec.wont(GMCP), None);
    }

    #[test]
    fn test_do_after_will_is_not_answered() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);

        let events = decode_all(&mut codec, &[IAC, DO, GMCP]);
        assert_eq!(
            events,
            vec![TelnetEvent::Negotiation {
                command: DO,
                option: GMCP
            }]
        );
    }

    #[test]
    fn test_unsupported_options_are_refused() {
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, &[IAC, DO, ECHO, IAC, WILL, NAWS]);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Negotiation {
                    command: DO,
                    option: ECHO
                },
                TelnetEvent::Send(telnet::negotiation(WONT, ECHO)),
                TelnetEvent::Negotiation {
                    command: WILL,
                    option: NAWS
                },
                TelnetEvent::Send(telnet::negotiation(DONT, NAWS)),
            ]
        );
    }

    #[test]
    fn test_supported_remote_option_is_accepted_once() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_remote(NAWS);
        let events = decode_all(&mut codec, &[IAC, WILL, NAWS, IAC, WILL, NAWS]);
        let sends: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TelnetEvent::Send(_)))
            .collect();
        assert_eq!(sends, vec![&TelnetEvent::Send(telnet::negotiation(DO, NAWS))]);
        assert!(codec.options().get(NAWS).remote_enabled);

        let events = decode_all(&mut codec, &[IAC, WONT, NAWS]);
        assert_eq!(events[1], TelnetEvent::Send(telnet::negotiation(DONT, NAWS)));
        assert!(!codec.options().get(NAWS).remote_enabled);
    }

    #[test]
    fn test_subnegotiation_for_active_option() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);

        let mut input = vec![IAC, SB, GMCP];
        input.extend_from_slice(b"Core.Hello {}");
        input.extend_from_slice(&[IAC, IAC, IAC, SE]);
        let events = decode_all(&mut codec, &input);

        let mut expected = b"Core.Hello {}".to_vec();
        expected.push(IAC);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiation {
                option: GMCP,
                payload: Bytes::from(expected)
            }]
        );
    }

    #[test]
    fn test_subnegotiation_for_inactive_option_is_dropped() {
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, &[IAC, SB, GMCP, b'x', IAC, SE, b'o', b'k', b'\n']);
        assert_eq!(events, vec![text("ok")]);
    }

    #[test]
    fn test_subnegotiation_split_across_chunks() {
        let mut codec = TelnetCodec::new();
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);

        assert!(decode_all(&mut codec, &[IAC, SB, GMCP, b'a']).is_empty());
        assert!(decode_all(&mut codec, &[b'b', IAC]).is_empty());
        let events = decode_all(&mut codec, &[SE]);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiation {
                option: GMCP,
                payload: Bytes::from_static(b"ab")
            }]
        );
    }

    #[test]
    fn test_max_length() {
        let mut codec = TelnetCodec::new_with_max_length(5);
        let mut buf = BytesMut::from("toolong\n");
        let result = codec.decode(&mut buf);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_encode_text() {
        let codec = TelnetCodec::new();
        assert_eq!(&codec.encode_text("hi")[..], b"hi\r\n");
        assert_eq!(&codec.encode_text("a\nb\r\n")[..], b"a\r\nb\r\n");
        assert_eq!(
            &codec.encode_text("\u{ff}")[..],
            "\u{ff}\r\n".as_bytes(),
            "UTF-8 encoded text never contains a raw IAC byte"
        );
    }

    #[test]
    fn test_encode_subnegotiation_requires_active_option() {
        let mut codec = TelnetCodec::new();
        assert_eq!(codec.encode_subnegotiation(GMCP, b"Core.Ping"), None);
        codec.options_mut().support_local(GMCP);
        codec.will(GMCP);
        assert_eq!(
            codec.encode_subnegotiation(GMCP, b"Core.Ping"),
            Some(telnet::subnegotiation(GMCP, b"Core.Ping"))
        );
    }
}
