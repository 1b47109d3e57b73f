//! Core of an intercepting HTTP proxy used as a web-traffic inspector.
//!
//! The proxy accepts TCP connections from local HTTP clients, parses each
//! request with an incremental HTTP/1.x state machine, relays it to the
//! origin named by the `Host` header (or opens an opaque tunnel for
//! `CONNECT`), relays the response back byte-exact, and emits structured
//! lifecycle events so external observers — a UI, a persistence sink —
//! can watch every request/response pair.
//!
//! # Architecture
//!
//! - [`parser`]: the incremental [`HttpMessageParser`](parser::HttpMessageParser)
//! - [`protocol`]: [`Headers`](protocol::Headers),
//!   [`HttpMessage`](protocol::HttpMessage) and the error taxonomy
//! - [`connection`] / [`pool`]: byte-stream handles and their creation
//! - [`server`]: listener, accept loop and shutdown signals
//! - [`transaction`]: the per-request engine
//! - [`events`]: lifecycle event fan-out to subscribers
//! - [`proxy`] / [`config`]: wiring and the configuration surface
//! - [`dates`]: RFC 7231 date parsing for persistence sinks
//!
//! TLS is tunneled, never intercepted; HTTP/2 and beyond are out of scope.

pub mod config;
pub mod connection;
pub mod dates;
pub mod events;
pub mod parser;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transaction;

pub use config::ProxyConfig;
pub use events::ProxyEvent;
pub use proxy::Proxy;
