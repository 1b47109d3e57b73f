//! The proxy core's error taxonomy.
//!
//! Every failure that crosses the API boundary is a [`ProxyError`]: a
//! stable kind, optionally paired with the underlying I/O error that
//! caused it. Subscribers that only need to branch on the category use
//! [`ProxyError::kind`].

use std::io;

use thiserror::Error;

/// Errors terminating a proxy transaction.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Generic socket-level failure.
    #[error("network error")]
    Network {
        #[source]
        source: Option<io::Error>,
    },

    /// Resolution of the upstream host failed.
    #[error("failed to resolve remote hostname")]
    RemoteDnsLookup {
        #[source]
        source: Option<io::Error>,
    },

    /// Client EOF at an unexpected point.
    #[error("client connection unexpectedly closed")]
    ClientDisconnected,

    /// Remote EOF at an unexpected point.
    #[error("remote connection unexpectedly closed")]
    RemoteDisconnected,

    /// The client request failed to parse, or lacked a usable `Host`.
    #[error("client HTTP request is malformed")]
    MalformedRequest,

    /// The remote response failed to parse.
    #[error("remote HTTP response is malformed")]
    MalformedResponse,
}

impl ProxyError {
    /// A network error carrying its underlying cause.
    pub fn network(source: io::Error) -> Self {
        Self::Network { source: Some(source) }
    }

    /// A DNS lookup error carrying its underlying cause, when one exists.
    pub fn dns_lookup(source: Option<io::Error>) -> Self {
        Self::RemoteDnsLookup { source }
    }

    /// The stable category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::RemoteDnsLookup { .. } => ErrorKind::RemoteDnsLookup,
            Self::ClientDisconnected => ErrorKind::ClientDisconnected,
            Self::RemoteDisconnected => ErrorKind::RemoteDisconnected,
            Self::MalformedRequest => ErrorKind::MalformedRequest,
            Self::MalformedResponse => ErrorKind::MalformedResponse,
        }
    }

    /// The OS error code of the underlying cause, when one exists.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Network { source } | Self::RemoteDnsLookup { source } => {
                source.as_ref().and_then(io::Error::raw_os_error)
            }
            _ => None,
        }
    }
}

/// The stable error categories of [`ProxyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    RemoteDnsLookup,
    ClientDisconnected,
    RemoteDisconnected,
    MalformedRequest,
    MalformedResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ProxyError::ClientDisconnected.kind(), ErrorKind::ClientDisconnected);
        assert_eq!(ProxyError::MalformedRequest.kind(), ErrorKind::MalformedRequest);
        assert_eq!(
            ProxyError::network(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).kind(),
            ErrorKind::Network
        );
    }

    #[test]
    fn network_error_carries_its_source() {
        let err = ProxyError::network(io::Error::from_raw_os_error(104));
        assert_eq!(err.os_error(), Some(104));

        let err = ProxyError::dns_lookup(None);
        assert_eq!(err.os_error(), None);
    }

    #[test]
    fn messages_match_the_taxonomy() {
        assert_eq!(ProxyError::RemoteDisconnected.to_string(), "remote connection unexpectedly closed");
        assert_eq!(
            ProxyError::dns_lookup(None).to_string(),
            "failed to resolve remote hostname"
        );
    }
}
