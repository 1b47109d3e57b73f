//! Incremental HTTP/1.x message parser.
//!
//! This module implements a byte-driven state machine that parses either an
//! HTTP request or an HTTP response into an
//! [`HttpMessage`](crate::protocol::HttpMessage), accepting input in
//! arbitrarily sized chunks. It supports both `Content-Length` and chunked
//! transfer framing, per
//! [RFC 7230 Section 3.3](https://tools.ietf.org/html/rfc7230#section-3.3).
//!
//! # Incremental operation
//!
//! The parser consumes bytes through a caller-owned cursor and never reads
//! past the end of the message it is framing: when [`ParseStatus::Valid`]
//! is returned the cursor sits exactly one past the last byte of the
//! message, and any trailing bytes are untouched. Feeding one byte at a
//! time or the whole message at once produces the same result.
//!
//! # Phase pauses
//!
//! [`HttpMessageParser::parse_with_phase`] additionally reports coarse
//! milestones ([`ParsePhase`]) and pauses whenever one is crossed, so a
//! caller can observe "headers are complete" before the body has been
//! read. Phases only ever move forward, and each advancement is reported
//! exactly once.
//!
//! # Tolerated deviations
//!
//! Interop with real-world traffic requires a few deliberate departures
//! from a strict reading of the RFC:
//!
//! - the terminating chunk length may be any run of hex digits whose value
//!   is zero (some servers prefix extra zeroes)
//! - `Transfer-Encoding: gzip, chunked` selects chunked framing; the token
//!   comparison is ASCII case-insensitive
//! - obs-fold header continuation lines are recognized and concatenated
//!   onto the preceding value
//!
//! Chunk extensions and trailing headers after the last chunk are not
//! supported and yield [`ParseStatus::Invalid`].

use std::cmp;
use std::mem;

use tracing::trace;

use crate::protocol::HttpMessage;

/// Externally observable milestones of parsing one message.
///
/// Monotonically non-decreasing across the lifetime of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParsePhase {
    Start,
    ReceivedMessageLine,
    ReceivedHeaders,
    ReceivedBody,
    ReceivedFullMessage,
}

/// Outcome of a parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Input exhausted (or a phase pause); more bytes expected.
    Incomplete,
    /// The message is fully parsed; trailing input is untouched.
    Valid,
    /// The input violated the grammar. The message is partially populated
    /// and must be discarded; the parser must be reset before reuse.
    Invalid,
}

/// Internal parser positions. Invisible outside the parser; the coarse
/// [`ParsePhase`] is the external view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    // Request start line
    MethodStart,
    Method,
    Uri,
    HttpVersionH,
    HttpVersionT1,
    HttpVersionT2,
    HttpVersionP,
    HttpVersionSlash,
    HttpVersionMajorStart,
    HttpVersionMajor,
    HttpVersionMinorStart,
    HttpVersionMinor,
    Newline1,

    // Response status line
    ResponseStart,
    ResponseHttpT1,
    ResponseHttpT2,
    ResponseHttpP,
    ResponseHttpSlash,
    ResponseMajorVersionStart,
    ResponseMajorVersion,
    ResponseMinorVersionStart,
    ResponseMinorVersion,
    ResponseStatusCodeStart,
    ResponseStatusCode,
    ResponseStatusMessageStart,
    ResponseStatusMessage,
    ResponseNewline,

    // Headers
    HeaderLineStart,
    HeaderLws,
    HeaderName,
    HeaderSpace,
    HeaderValue,
    Newline2,
    Newline3,

    // Chunked entities
    ChunkLengthStart,
    ChunkLength,
    ChunkLengthNewline,
    Chunk,
    ChunkTrailingNewline,
    ChunkTrailingHeaderLineStart,
    ChunkTerminatingNewline,

    // Non-chunked entities
    FixedLengthEntity,
}

/// A resettable incremental parser for HTTP/1.x messages.
///
/// One parser instance serves one transaction: it parses the request,
/// is reset with [`reset_for_response`](Self::reset_for_response), then
/// parses the response. The target message is owned by the caller and is
/// mutated only through parse calls.
#[derive(Debug)]
pub struct HttpMessageParser {
    state: ParserState,
    phase: ParsePhase,

    // Bytes left in the current fixed-length range; used both for
    // individual chunks and for fixed-length entities.
    remaining: u64,

    // General-purpose scratch buffer: header names, status reason.
    buffer: String,

    // Separate buffer for header values, so the current name survives.
    value_buffer: String,

    // The most recently completed header line, held back until the next
    // line proves it is not continued by obs-fold.
    pending_header: Option<(String, String)>,
    folding: bool,
}

impl Default for HttpMessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMessageParser {
    /// Creates a parser positioned at the start of a request.
    pub fn new() -> Self {
        Self {
            state: ParserState::MethodStart,
            phase: ParsePhase::Start,
            remaining: 0,
            buffer: String::with_capacity(64),
            value_buffer: String::with_capacity(64),
            pending_header: None,
            folding: false,
        }
    }

    /// Rewinds the parser to the start of a request line.
    pub fn reset_for_request(&mut self) {
        self.reset(ParserState::MethodStart);
    }

    /// Rewinds the parser to the start of a response status line.
    pub fn reset_for_response(&mut self) {
        self.reset(ParserState::ResponseStart);
    }

    fn reset(&mut self, state: ParserState) {
        self.state = state;
        self.phase = ParsePhase::Start;
        self.remaining = 0;
        self.buffer.clear();
        self.value_buffer.clear();
        self.pending_header = None;
        self.folding = false;
    }

    /// Consumes bytes from `input` starting at `*pos`, advancing the
    /// cursor as it goes.
    ///
    /// Returns [`ParseStatus::Incomplete`] when the input is exhausted,
    /// [`ParseStatus::Valid`] when the message is complete (the cursor
    /// then points one past its final byte), or [`ParseStatus::Invalid`]
    /// on a grammar violation.
    pub fn parse(&mut self, message: &mut HttpMessage, input: &[u8], pos: &mut usize) -> ParseStatus {
        self.parse_inner(message, input, pos, false)
    }

    /// Like [`parse`](Self::parse), but also pauses at phase boundaries.
    ///
    /// On a phase advancement the call returns [`ParseStatus::Incomplete`]
    /// without consuming further input, after storing the new phase in
    /// `*phase`. Calling again resumes from the paused position; the same
    /// phase is never reported twice.
    pub fn parse_with_phase(
        &mut self,
        message: &mut HttpMessage,
        input: &[u8],
        pos: &mut usize,
        phase: &mut ParsePhase,
    ) -> ParseStatus {
        let status = self.parse_inner(message, input, pos, true);
        *phase = self.phase;
        status
    }

    fn parse_inner(
        &mut self,
        message: &mut HttpMessage,
        input: &[u8],
        pos: &mut usize,
        pause_on_phase_change: bool,
    ) -> ParseStatus {
        let starting_phase = self.phase;

        while *pos < input.len() {
            // Body bytes can be copied in bulk: no state or phase change
            // can occur until the current range is exhausted.
            if self.remaining > 0
                && matches!(self.state, ParserState::Chunk | ParserState::FixedLengthEntity)
            {
                let available = (input.len() - *pos) as u64;
                let take = cmp::min(self.remaining, available) as usize;
                message.extend_body(&input[*pos..*pos + take]);
                *pos += take;
                self.remaining -= take as u64;

                if self.remaining == 0 && self.state == ParserState::FixedLengthEntity {
                    self.phase = ParsePhase::ReceivedFullMessage;
                    return ParseStatus::Valid;
                }
                continue;
            }

            let byte = input[*pos];
            *pos += 1;

            let status = self.consume(message, byte);
            if status != ParseStatus::Incomplete {
                if status == ParseStatus::Valid {
                    self.phase = ParsePhase::ReceivedFullMessage;
                }
                return status;
            }

            if pause_on_phase_change && self.phase != starting_phase {
                trace!(phase = ?self.phase, "parse paused on phase change");
                break;
            }
        }

        ParseStatus::Incomplete
    }

    fn transit(&mut self, new_state: ParserState) {
        self.phase = phase_for_transition(self.phase, self.state, new_state);
        self.state = new_state;
    }

    fn flush_pending_header(&mut self, message: &mut HttpMessage) {
        if let Some((name, value)) = self.pending_header.take() {
            message.headers_mut().insert(name, value);
        }
    }

    /// Feeds a single byte through the state machine.
    fn consume(&mut self, message: &mut HttpMessage, input: u8) -> ParseStatus {
        use ParserState::*;

        use ParseStatus::{Incomplete, Invalid, Valid};

        match self.state {
            MethodStart => {
                if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    return Invalid;
                }
                self.transit(Method);
                message.push_method_byte(input);
                Incomplete
            }

            Method => {
                if input == b' ' {
                    self.transit(Uri);
                    Incomplete
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    Invalid
                } else {
                    message.push_method_byte(input);
                    Incomplete
                }
            }

            Uri => {
                if input == b' ' {
                    self.transit(HttpVersionH);
                    Incomplete
                } else if is_ctl(input) {
                    Invalid
                } else {
                    message.push_uri_byte(input);
                    Incomplete
                }
            }

            HttpVersionH => self.expect(input, b'H', HttpVersionT1),
            HttpVersionT1 => self.expect(input, b'T', HttpVersionT2),
            HttpVersionT2 => self.expect(input, b'T', HttpVersionP),
            HttpVersionP => self.expect(input, b'P', HttpVersionSlash),

            HttpVersionSlash => {
                if input == b'/' {
                    self.transit(HttpVersionMajorStart);
                    message.set_major_version(0);
                    message.set_minor_version(0);
                    Incomplete
                } else {
                    Invalid
                }
            }

            HttpVersionMajorStart => {
                if is_digit(input) {
                    self.transit(HttpVersionMajor);
                    message.set_major_version(u16::from(input - b'0'));
                    Incomplete
                } else {
                    Invalid
                }
            }

            HttpVersionMajor => {
                if input == b'.' {
                    self.transit(HttpVersionMinorStart);
                    Incomplete
                } else if is_digit(input) {
                    match accumulate(message.major_version(), input) {
                        Some(v) => {
                            message.set_major_version(v);
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    Invalid
                }
            }

            HttpVersionMinorStart => {
                if is_digit(input) {
                    self.transit(HttpVersionMinor);
                    message.set_minor_version(u16::from(input - b'0'));
                    Incomplete
                } else {
                    Invalid
                }
            }

            HttpVersionMinor => {
                if input == b'\r' {
                    self.transit(Newline1);
                    Incomplete
                } else if is_digit(input) {
                    match accumulate(message.minor_version(), input) {
                        Some(v) => {
                            message.set_minor_version(v);
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    Invalid
                }
            }

            Newline1 => self.expect(input, b'\n', HeaderLineStart),

            ResponseStart => self.expect(input, b'H', ResponseHttpT1),
            ResponseHttpT1 => self.expect(input, b'T', ResponseHttpT2),
            ResponseHttpT2 => self.expect(input, b'T', ResponseHttpP),
            ResponseHttpP => self.expect(input, b'P', ResponseHttpSlash),
            ResponseHttpSlash => self.expect(input, b'/', ResponseMajorVersionStart),

            ResponseMajorVersionStart => {
                if is_digit(input) {
                    self.transit(ResponseMajorVersion);
                    message.set_major_version(u16::from(input - b'0'));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ResponseMajorVersion => {
                if input == b'.' {
                    self.transit(ResponseMinorVersionStart);
                    Incomplete
                } else if is_digit(input) {
                    match accumulate(message.major_version(), input) {
                        Some(v) => {
                            message.set_major_version(v);
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    Invalid
                }
            }

            ResponseMinorVersionStart => {
                if is_digit(input) {
                    self.transit(ResponseMinorVersion);
                    message.set_minor_version(u16::from(input - b'0'));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ResponseMinorVersion => {
                if input == b' ' {
                    self.transit(ResponseStatusCodeStart);
                    Incomplete
                } else if is_digit(input) {
                    match accumulate(message.minor_version(), input) {
                        Some(v) => {
                            message.set_minor_version(v);
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    Invalid
                }
            }

            ResponseStatusCodeStart => {
                if is_digit(input) {
                    self.transit(ResponseStatusCode);
                    message.set_status_code(u16::from(input - b'0'));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ResponseStatusCode => {
                if input == b' ' {
                    self.transit(ResponseStatusMessageStart);
                    Incomplete
                } else if is_digit(input) {
                    match accumulate(message.status_code(), input) {
                        Some(v) => {
                            message.set_status_code(v);
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    Invalid
                }
            }

            ResponseStatusMessageStart => {
                if is_char(input) {
                    self.transit(ResponseStatusMessage);
                    self.buffer.clear();
                    self.buffer.push(char::from(input));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ResponseStatusMessage => {
                if input == b'\r' {
                    self.transit(ResponseNewline);
                    message.set_status_message(mem::take(&mut self.buffer));
                    Incomplete
                } else if is_char(input) || input == b' ' {
                    self.buffer.push(char::from(input));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ResponseNewline => self.expect(input, b'\n', HeaderLineStart),

            // Headers
            //
            HeaderLineStart => {
                if input == b'\r' {
                    self.flush_pending_header(message);
                    self.transit(Newline3);
                    Incomplete
                } else if self.pending_header.is_some() && (input == b' ' || input == b'\t') {
                    // obs-fold: this line continues the previous value
                    self.transit(HeaderLws);
                    Incomplete
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    Invalid
                } else {
                    self.flush_pending_header(message);
                    self.transit(HeaderName);
                    self.buffer.clear();
                    self.buffer.push(char::from(input));
                    Incomplete
                }
            }

            HeaderLws => {
                if input == b'\r' {
                    self.transit(Newline2);
                    Incomplete
                } else if input == b' ' || input == b'\t' {
                    Incomplete
                } else if is_ctl(input) {
                    Invalid
                } else {
                    self.transit(HeaderValue);
                    self.folding = true;
                    self.value_buffer.clear();
                    self.value_buffer.push(char::from(input));
                    Incomplete
                }
            }

            HeaderName => {
                if input == b':' {
                    self.transit(HeaderSpace);
                    Incomplete
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    Invalid
                } else {
                    self.buffer.push(char::from(input));
                    Incomplete
                }
            }

            HeaderSpace => {
                if input == b' ' {
                    self.transit(HeaderValue);
                    self.value_buffer.clear();
                    Incomplete
                } else {
                    Invalid
                }
            }

            HeaderValue => {
                if input == b'\r' {
                    self.transit(Newline2);
                    if self.folding {
                        self.folding = false;
                        // concatenate onto the held-back value, joined by
                        // a single space per RFC 7230 s. 3.2.4
                        if let Some((_, value)) = self.pending_header.as_mut() {
                            value.push(' ');
                            value.push_str(&self.value_buffer);
                        }
                        self.value_buffer.clear();
                    } else {
                        self.pending_header =
                            Some((mem::take(&mut self.buffer), mem::take(&mut self.value_buffer)));
                    }
                    Incomplete
                } else if !is_ctl(input) {
                    self.value_buffer.push(char::from(input));
                    Incomplete
                } else {
                    Invalid
                }
            }

            Newline2 => self.expect(input, b'\n', HeaderLineStart),

            Newline3 => {
                if input != b'\n' {
                    return Invalid;
                }
                self.select_body(message)
            }

            // Chunked entities
            //
            ChunkLengthStart => {
                // RFC 7230 s. 4.1 defines the terminal chunk length as
                // exactly "0"; some real servers prefix extra zeroes, so
                // any hex run whose value is zero is accepted.
                if is_hex(input) {
                    self.transit(ChunkLength);
                    self.remaining = u64::from(hex_value(input));
                    Incomplete
                } else {
                    Invalid
                }
            }

            ChunkLength => {
                if input == b'\r' {
                    self.transit(ChunkLengthNewline);
                    Incomplete
                } else if is_hex(input) {
                    match self
                        .remaining
                        .checked_mul(16)
                        .and_then(|v| v.checked_add(u64::from(hex_value(input))))
                    {
                        Some(v) => {
                            self.remaining = v;
                            Incomplete
                        }
                        None => Invalid,
                    }
                } else {
                    // chunk extensions (";ext=...") are not supported
                    Invalid
                }
            }

            ChunkLengthNewline => {
                if input == b'\n' {
                    if self.remaining > 0 {
                        self.transit(Chunk);
                    } else {
                        self.transit(ChunkTrailingHeaderLineStart);
                    }
                    Incomplete
                } else {
                    Invalid
                }
            }

            Chunk => {
                if self.remaining == 0 {
                    if input == b'\r' {
                        self.transit(ChunkTrailingNewline);
                        Incomplete
                    } else {
                        Invalid
                    }
                } else {
                    message.push_body_byte(input);
                    self.remaining -= 1;
                    Incomplete
                }
            }

            ChunkTrailingNewline => self.expect(input, b'\n', ChunkLengthStart),

            ChunkTrailingHeaderLineStart => {
                if input == b'\r' {
                    self.transit(ChunkTerminatingNewline);
                    Incomplete
                } else {
                    // trailing headers are not supported
                    Invalid
                }
            }

            ChunkTerminatingNewline => {
                if input == b'\n' {
                    Valid
                } else {
                    Invalid
                }
            }

            // Non-chunked entities
            //
            FixedLengthEntity => {
                message.push_body_byte(input);
                self.remaining -= 1;
                if self.remaining == 0 { Valid } else { Incomplete }
            }
        }
    }

    /// Handles the end of the header block: picks chunked framing, a
    /// fixed-length entity, or no body at all.
    fn select_body(&mut self, message: &mut HttpMessage) -> ParseStatus {
        let is_chunked = message
            .headers()
            .find("Transfer-Encoding")
            .iter()
            .any(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("chunked")));

        if is_chunked {
            self.transit(ParserState::ChunkLengthStart);
            message.clear_body();
            return ParseStatus::Incomplete;
        }

        let content_length = message
            .headers()
            .find("Content-Length")
            .first()
            .map(|value| value.parse::<u64>());

        if let Some(parsed) = content_length {
            let length = match parsed {
                Ok(length) => length,
                Err(_) => return ParseStatus::Invalid,
            };

            if length == 0 {
                return ParseStatus::Valid;
            }

            self.transit(ParserState::FixedLengthEntity);
            self.remaining = length;
            message.clear_body();
            message.reserve_body(usize::try_from(length).unwrap_or(usize::MAX));
            return ParseStatus::Incomplete;
        }

        // No entity expected, we're done
        ParseStatus::Valid
    }

    fn expect(&mut self, input: u8, expected: u8, next: ParserState) -> ParseStatus {
        if input == expected {
            self.transit(next);
            ParseStatus::Incomplete
        } else {
            ParseStatus::Invalid
        }
    }
}

/// Maps an internal state transition onto a phase advancement, when the
/// transition crosses a phase boundary.
fn phase_for_transition(phase: ParsePhase, old_state: ParserState, new_state: ParserState) -> ParsePhase {
    if old_state == new_state {
        return phase;
    }

    match new_state {
        ParserState::HeaderLineStart if phase == ParsePhase::Start => ParsePhase::ReceivedMessageLine,

        ParserState::ChunkLengthStart | ParserState::FixedLengthEntity
            if phase == ParsePhase::ReceivedMessageLine =>
        {
            ParsePhase::ReceivedHeaders
        }

        _ => phase,
    }
}

fn accumulate(current: u16, digit: u8) -> Option<u16> {
    current.checked_mul(10)?.checked_add(u16::from(digit - b'0'))
}

// ASCII character predicates, per RFC 7230.

fn is_char(input: u8) -> bool {
    input <= 127
}

fn is_ctl(input: u8) -> bool {
    input <= 31 || input == 127
}

fn is_tspecial(input: u8) -> bool {
    matches!(
        input,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

fn is_digit(input: u8) -> bool {
    input.is_ascii_digit()
}

fn is_hex(input: u8) -> bool {
    input.is_ascii_hexdigit()
}

fn hex_value(input: u8) -> u8 {
    match input {
        b'0'..=b'9' => input - b'0',
        b'a'..=b'f' => input - b'a' + 10,
        _ => input - b'A' + 10,
    }
}
