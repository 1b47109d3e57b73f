//! Protocol data model: headers, messages and the error taxonomy.
//!
//! These are the value types the rest of the core passes around:
//!
//! - [`Headers`]: ordered case-insensitive multimap with canonical-case
//!   name iteration
//! - [`HttpMessage`]: the uniform request/response value, written only by
//!   the parser
//! - [`ProxyError`] / [`ErrorKind`]: the failure taxonomy crossing the
//!   API boundary

mod headers;
pub use headers::Headers;
pub use headers::canonicalize;

mod message;
pub use message::HttpMessage;

mod error;
pub use error::ErrorKind;
pub use error::ProxyError;
