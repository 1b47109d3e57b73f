//! The uniform HTTP message value type.
//!
//! An [`HttpMessage`] holds either a request (method + URI) or a response
//! (status code + reason phrase), along with the version, headers and body
//! shared by both. It carries no parsing or validation logic of its own:
//! the parser is its sole writer, and each message is owned by exactly one
//! transaction.

use bytes::Bytes;

use crate::protocol::headers::{self, Headers};

/// A parsed HTTP/1.x message.
///
/// Request-side fields (`method`, `uri`) and response-side fields
/// (`status_code`, `status_message`) coexist in one type; which set is
/// meaningful depends on how the parser was reset. The URI is opaque —
/// the core never interprets it beyond `CONNECT` host extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    method: String,
    uri: String,
    status_code: u16,
    status_message: String,
    major_version: u16,
    minor_version: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Lossy UTF-8 view of the body, for assertions and display.
    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Replaces the body wholesale. Intended for test fixtures; production
    /// bodies are written byte-by-byte by the parser.
    pub fn set_body<B: Into<Vec<u8>>>(&mut self, body: B) {
        self.body = body.into();
    }

    /// Serializes the message back to its canonical on-the-wire form:
    ///
    /// ```text
    /// <METHOD> <URI> HTTP/<major>.<minor>\r\n
    /// <Name>: <Value>\r\n        (each header, canonical-cased)
    /// \r\n
    /// <body bytes>
    /// ```
    ///
    /// Responses render a status line instead of a request line. Header
    /// entries keep their insertion order, duplicates included.
    pub fn format(&self) -> Bytes {
        let mut out = Vec::with_capacity(128 + self.body.len());

        if self.method.is_empty() {
            out.extend_from_slice(
                format!(
                    "HTTP/{}.{} {} {}\r\n",
                    self.major_version, self.minor_version, self.status_code, self.status_message
                )
                .as_bytes(),
            );
        } else {
            out.extend_from_slice(
                format!(
                    "{} {} HTTP/{}.{}\r\n",
                    self.method, self.uri, self.major_version, self.minor_version
                )
                .as_bytes(),
            );
        }

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(headers::canonicalize(name).as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);

        Bytes::from(out)
    }

    // Writer-side access, used by the parser alone.

    pub(crate) fn push_method_byte(&mut self, b: u8) {
        self.method.push(char::from(b));
    }

    pub(crate) fn push_uri_byte(&mut self, b: u8) {
        self.uri.push(char::from(b));
    }

    pub(crate) fn set_status_code(&mut self, code: u16) {
        self.status_code = code;
    }

    pub(crate) fn set_status_message(&mut self, message: String) {
        self.status_message = message;
    }

    pub(crate) fn set_major_version(&mut self, major: u16) {
        self.major_version = major;
    }

    pub(crate) fn set_minor_version(&mut self, minor: u16) {
        self.minor_version = minor;
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn clear_body(&mut self) {
        self.body.clear();
    }

    pub(crate) fn reserve_body(&mut self, additional: usize) {
        self.body.reserve(additional);
    }

    pub(crate) fn push_body_byte(&mut self, b: u8) {
        self.body.push(b);
    }

    pub(crate) fn extend_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_renders_request_line_headers_and_body() {
        let mut message = HttpMessage::new();
        message.push_method_byte(b'G');
        message.push_method_byte(b'E');
        message.push_method_byte(b'T');
        for b in b"/index.html" {
            message.push_uri_byte(*b);
        }
        message.set_major_version(1);
        message.set_minor_version(1);
        message.headers_mut().insert("host", "example.com");
        message.headers_mut().insert("accept-encoding", "identity");

        let wire = message.format();
        assert_eq!(
            &wire[..],
            &b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept-Encoding: identity\r\n\r\n"[..]
        );
    }

    #[test]
    fn format_renders_status_line_for_responses() {
        let mut message = HttpMessage::new();
        message.set_major_version(1);
        message.set_minor_version(0);
        message.set_status_code(404);
        message.set_status_message("Not Found".to_owned());
        message.set_body(&b"gone"[..]);

        let wire = message.format();
        assert_eq!(&wire[..], &b"HTTP/1.0 404 Not Found\r\n\r\ngone"[..]);
    }

    #[test]
    fn format_keeps_duplicate_headers_in_insertion_order() {
        let mut message = HttpMessage::new();
        message.push_method_byte(b'G');
        message.push_uri_byte(b'/');
        message.set_major_version(1);
        message.set_minor_version(1);
        message.headers_mut().insert("set-thing", "a");
        message.headers_mut().insert("other", "b");
        message.headers_mut().insert("Set-Thing", "c");

        let wire = message.format();
        let text = std::str::from_utf8(&wire).unwrap();
        assert_eq!(text, "G / HTTP/1.1\r\nSet-Thing: a\r\nOther: b\r\nSet-Thing: c\r\n\r\n");
    }
}
