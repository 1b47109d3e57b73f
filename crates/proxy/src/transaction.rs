//! The per-connection transaction engine.
//!
//! A [`Transaction`] drives one client request through its full lifecycle:
//! read and parse the request, resolve and open the upstream, relay the
//! request, read the response while capturing its raw bytes, relay those
//! bytes verbatim back to the client. `CONNECT` requests branch into an
//! opaque full-duplex tunnel instead.
//!
//! Each transaction runs as one spawned task that owns all of its state —
//! both connections, the parser, the request/response messages and the
//! notification cursor — so no locking is needed inside a transaction and
//! at most one read and one write is in flight per direction at any time.
//!
//! Progress is reported through a [`NotificationState`] cursor that only
//! moves forward. Advancing it enumerates every crossed state exactly
//! once, in order, and the states that carry an externally visible event
//! emit it as they are entered. Every transaction ends with exactly one
//! terminal event: `TransactionComplete` or `TransactionFailed`.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::events::{EventBus, ProxyEvent};
use crate::parser::{HttpMessageParser, ParsePhase, ParseStatus};
use crate::pool::ConnectionPool;
use crate::protocol::{HttpMessage, ProxyError};

/// One 8 KiB scratch buffer per direction.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The product token sent in `Proxy-Agent` headers.
pub const PROXY_AGENT: &str = concat!("wiretap/", env!("CARGO_PKG_VERSION"));

const CONNECT_ESTABLISHED: &[u8] =
    concat!("HTTP/1.1 200 OK\r\nProxy-Agent: wiretap/", env!("CARGO_PKG_VERSION"), "\r\n\r\n")
        .as_bytes();

const CONNECT_FAILED: &[u8] = concat!(
    "HTTP/1.1 400 Bad Request\r\nProxy-Agent: wiretap/",
    env!("CARGO_PKG_VERSION"),
    "\r\n\r\n"
)
.as_bytes();

/// The progress cursor of a transaction, observed by event subscribers.
///
/// Advances monotonically through the request states, then the response
/// states. `TlsTunnel` and `Error` are sinks: a transaction that enters
/// either never advances again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationState {
    None,
    RequestHeaders,
    RequestBody,
    RequestComplete,
    ResponseHeaders,
    ResponseBody,
    ResponseComplete,
    TlsTunnel,
    Error,
}

impl NotificationState {
    fn next(self) -> Self {
        match self {
            Self::None => Self::RequestHeaders,
            Self::RequestHeaders => Self::RequestBody,
            Self::RequestBody => Self::RequestComplete,
            Self::RequestComplete => Self::ResponseHeaders,
            Self::ResponseHeaders => Self::ResponseBody,
            Self::ResponseBody => Self::ResponseComplete,
            Self::ResponseComplete => Self::TlsTunnel,
            Self::TlsTunnel | Self::Error => Self::Error,
        }
    }
}

/// Which direction a parse phase belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Response,
}

/// One client HTTP request plus its upstream round-trip.
#[derive(Debug)]
pub struct Transaction {
    id: i64,
    pool: Arc<ConnectionPool>,
    events: EventBus,

    client: Option<Connection>,
    remote: Option<Connection>,

    parser: HttpMessageParser,
    request: HttpMessage,
    response: HttpMessage,
    request_phase: ParsePhase,
    response_phase: ParsePhase,
    notification_state: NotificationState,
    error: Option<Arc<ProxyError>>,

    read_buffer: Box<[u8]>,
    // Raw response bytes, relayed to the client exactly as received no
    // matter how the parser interpreted them.
    raw_input: Vec<u8>,
}

impl Transaction {
    pub fn new(id: i64, pool: Arc<ConnectionPool>, events: EventBus, client: Connection) -> Self {
        Self {
            id,
            pool,
            events,
            client: Some(client),
            remote: None,
            parser: HttpMessageParser::new(),
            request: HttpMessage::new(),
            response: HttpMessage::new(),
            request_phase: ParsePhase::Start,
            response_phase: ParsePhase::Start,
            notification_state: NotificationState::None,
            error: None,
            read_buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            raw_input: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn notification_state(&self) -> NotificationState {
        self.notification_state
    }

    /// The error that failed this transaction, if it has failed.
    pub fn error(&self) -> Option<&ProxyError> {
        self.error.as_deref()
    }

    pub fn request(&self) -> &HttpMessage {
        &self.request
    }

    pub fn response(&self) -> &HttpMessage {
        &self.response
    }

    /// Runs the transaction to completion, consuming it. Emits exactly one
    /// terminal event.
    pub async fn begin(mut self) {
        debug!(id = self.id, "transaction begin");
        self.events.emit(ProxyEvent::TransactionStarted { id: self.id });
        self.raw_input.clear();

        match self.drive().await {
            Ok(()) => self.complete_transaction().await,
            Err(e) => self.notify_failure(e).await,
        }
    }

    async fn drive(&mut self) -> Result<(), ProxyError> {
        self.read_client_request().await?;

        if self.request.method() == "CONNECT" {
            debug!(id = self.id, uri = self.request.uri(), "CONNECT, establishing tunnel");
            self.establish_tls_tunnel().await
        } else {
            self.do_notification(NotificationState::RequestComplete);
            self.open_remote_connection().await?;
            self.send_client_request_to_remote().await?;
            self.read_remote_response().await?;
            self.do_notification(NotificationState::ResponseComplete);
            self.send_remote_response_to_client().await
        }
    }

    /// Reads from the client until the request parses as a full message,
    /// emitting a notification for every parse phase crossed on the way.
    async fn read_client_request(&mut self) -> Result<(), ProxyError> {
        loop {
            let Some(client) = self.client.as_mut() else {
                return Err(ProxyError::ClientDisconnected);
            };

            let num_read = client
                .read_some(&mut self.read_buffer)
                .await
                .map_err(ProxyError::network)?;
            if num_read == 0 {
                // unexpected disconnect
                return Err(ProxyError::ClientDisconnected);
            }
            trace!(id = self.id, num_read, "read client bytes");

            let mut pos = 0;
            let mut current_phase = self.request_phase;
            let mut status = self.parser.parse_with_phase(
                &mut self.request,
                &self.read_buffer[..num_read],
                &mut pos,
                &mut self.request_phase,
            );
            while status == ParseStatus::Incomplete && current_phase != self.request_phase {
                debug!(id = self.id, old = ?current_phase, new = ?self.request_phase, "request phase change");
                self.notify_phase_change(Side::Request);

                current_phase = self.request_phase;
                status = self.parser.parse_with_phase(
                    &mut self.request,
                    &self.read_buffer[..num_read],
                    &mut pos,
                    &mut self.request_phase,
                );
            }

            match status {
                ParseStatus::Incomplete => {}
                ParseStatus::Invalid => return Err(ProxyError::MalformedRequest),
                ParseStatus::Valid => return Ok(()),
            }
        }
    }

    /// Resolves the `Host` header and opens the upstream connection.
    async fn open_remote_connection(&mut self) -> Result<(), ProxyError> {
        let (host, port) = {
            let host_values = self.request.headers().find("Host");
            let Some(value) = host_values.first() else {
                warn!(id = self.id, "malformed request: no Host header found");
                return Err(ProxyError::MalformedRequest);
            };
            let (host, port) = split_host_port(value, 80);
            (host.to_owned(), port)
        };

        let remote = self.pool.try_open(&host, port).await?;
        self.remote = Some(remote);
        Ok(())
    }

    /// Serializes the parsed request back to canonical wire form and
    /// writes it upstream in one operation.
    async fn send_client_request_to_remote(&mut self) -> Result<(), ProxyError> {
        let formatted = self.request.format();
        let Some(remote) = self.remote.as_mut() else {
            return Err(ProxyError::RemoteDisconnected);
        };
        remote.write_all_bytes(&formatted).await.map_err(ProxyError::network)?;

        self.raw_input.clear();
        self.parser.reset_for_response();
        Ok(())
    }

    /// Reads the upstream response. Every byte read is appended to
    /// `raw_input` so the reply can be relayed byte-exact, independent of
    /// the parse.
    async fn read_remote_response(&mut self) -> Result<(), ProxyError> {
        loop {
            let Some(remote) = self.remote.as_mut() else {
                return Err(ProxyError::RemoteDisconnected);
            };

            let num_read = remote
                .read_some(&mut self.read_buffer)
                .await
                .map_err(ProxyError::network)?;
            if num_read == 0 {
                // unexpected disconnect
                return Err(ProxyError::RemoteDisconnected);
            }
            trace!(id = self.id, num_read, "read remote bytes");

            self.raw_input.extend_from_slice(&self.read_buffer[..num_read]);

            let mut pos = 0;
            let mut current_phase = self.response_phase;
            let mut status = self.parser.parse_with_phase(
                &mut self.response,
                &self.read_buffer[..num_read],
                &mut pos,
                &mut self.response_phase,
            );
            while status == ParseStatus::Incomplete && current_phase != self.response_phase {
                debug!(id = self.id, old = ?current_phase, new = ?self.response_phase, "response phase change");
                self.notify_phase_change(Side::Response);

                current_phase = self.response_phase;
                status = self.parser.parse_with_phase(
                    &mut self.response,
                    &self.read_buffer[..num_read],
                    &mut pos,
                    &mut self.response_phase,
                );
            }

            match status {
                ParseStatus::Incomplete => {}
                ParseStatus::Invalid => return Err(ProxyError::MalformedResponse),
                ParseStatus::Valid => return Ok(()),
            }
        }
    }

    async fn send_remote_response_to_client(&mut self) -> Result<(), ProxyError> {
        let Some(client) = self.client.as_mut() else {
            return Err(ProxyError::ClientDisconnected);
        };
        client
            .write_all_bytes(&self.raw_input)
            .await
            .map_err(ProxyError::network)
    }

    /// Opens the tunnel endpoint named by the `CONNECT` URI, answers the
    /// client with the literal 200/400 reply, then relays bytes in both
    /// directions until either side hangs up.
    async fn establish_tls_tunnel(&mut self) -> Result<(), ProxyError> {
        let (host, port) = {
            let (host, port) = split_host_port(self.request.uri(), 443);
            (host.to_owned(), port)
        };

        let open_result = self.pool.try_open(&host, port).await;

        let reply: &[u8] = if open_result.is_ok() { CONNECT_ESTABLISHED } else { CONNECT_FAILED };
        let Some(client) = self.client.as_mut() else {
            return Err(ProxyError::ClientDisconnected);
        };
        let write_result = client.write_all_bytes(reply).await;

        let remote = open_result?;
        if let Err(e) = write_result {
            warn!(id = self.id, cause = %e, "failed to send CONNECT reply to client");
            return Err(ProxyError::network(e));
        }
        self.remote = Some(remote);

        self.notification_state = NotificationState::TlsTunnel;
        self.pump_tunnel().await
    }

    /// Full-duplex byte relay. Neither direction parses, inspects or
    /// modifies anything; EOF on either side ends the tunnel cleanly.
    async fn pump_tunnel(&mut self) -> Result<(), ProxyError> {
        let Some(client) = self.client.take() else {
            return Err(ProxyError::ClientDisconnected);
        };
        let Some(remote) = self.remote.take() else {
            return Err(ProxyError::RemoteDisconnected);
        };

        let (client_read, client_write) = tokio::io::split(client);
        let (remote_read, remote_write) = tokio::io::split(remote);

        // Whichever direction finishes first wins; the other future is
        // dropped, which aborts its pending I/O and closes the sockets.
        let result = tokio::select! {
            result = pump(client_read, remote_write) => result,
            result = pump(remote_read, client_write) => result,
        };

        debug!(id = self.id, ok = result.is_ok(), "tunnel finished");
        result
    }

    /// Maps the most recently crossed parse phase onto the notification
    /// cursor and advances it.
    fn notify_phase_change(&mut self, side: Side) {
        let phase = match side {
            Side::Request => self.request_phase,
            Side::Response => self.response_phase,
        };

        let target = match (side, phase) {
            // nothing to notify on
            (_, ParsePhase::Start | ParsePhase::ReceivedMessageLine) => return,
            (Side::Request, ParsePhase::ReceivedHeaders) => NotificationState::RequestHeaders,
            (Side::Request, ParsePhase::ReceivedBody) => NotificationState::RequestBody,
            (Side::Request, ParsePhase::ReceivedFullMessage) => NotificationState::RequestComplete,
            (Side::Response, ParsePhase::ReceivedHeaders) => NotificationState::ResponseHeaders,
            (Side::Response, ParsePhase::ReceivedBody) => NotificationState::ResponseBody,
            (Side::Response, ParsePhase::ReceivedFullMessage) => NotificationState::ResponseComplete,
        };

        self.do_notification(target);
    }

    /// Advances the cursor one state at a time up to `target`, visiting
    /// every intermediate state and emitting the event attached to each
    /// state as it is entered. States are never revisited, so each event
    /// fires at most once per transaction.
    fn do_notification(&mut self, target: NotificationState) {
        debug!(id = self.id, ns = ?target, "advance notification state");
        while self.notification_state < target {
            let entered = self.notification_state.next();
            self.notification_state = entered;
            trace!(id = self.id, ns = ?entered, "notification step");

            match entered {
                NotificationState::RequestComplete => {
                    self.events.emit(ProxyEvent::RequestRead {
                        id: self.id,
                        request: Arc::new(self.request.clone()),
                    });
                }
                NotificationState::ResponseHeaders => {
                    self.events.emit(ProxyEvent::ResponseHeadersRead {
                        id: self.id,
                        response: Arc::new(self.response.clone()),
                    });
                }
                NotificationState::ResponseComplete => {
                    self.events.emit(ProxyEvent::ResponseRead {
                        id: self.id,
                        response: Arc::new(self.response.clone()),
                    });
                }
                _ => {}
            }
        }
    }

    async fn complete_transaction(&mut self) {
        self.release_connections().await;
        debug!(id = self.id, "transaction complete");
        self.events.emit(ProxyEvent::TransactionComplete { id: self.id });
    }

    async fn notify_failure(&mut self, error: ProxyError) {
        warn!(id = self.id, cause = %error, "transaction failed");
        self.release_connections().await;

        let error = Arc::new(error);
        self.error = Some(Arc::clone(&error));
        self.notification_state = NotificationState::Error;
        self.events.emit(ProxyEvent::TransactionFailed { id: self.id, error });
    }

    async fn release_connections(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close().await;
        }
        if let Some(mut remote) = self.remote.take() {
            remote.close().await;
        }
    }
}

/// One direction of the tunnel: read some, write all, repeat until EOF.
async fn pump<R, W>(mut from: R, mut to: W) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let num_read = from.read(&mut buffer).await.map_err(ProxyError::network)?;
        if num_read == 0 {
            // finished normally
            return Ok(());
        }
        to.write_all(&buffer[..num_read]).await.map_err(ProxyError::network)?;
        to.flush().await.map_err(ProxyError::network)?;
    }
}

/// Splits `host[:port]`, tolerating a malformed port by falling back to
/// `default_port` (long-standing lenient behavior, kept on purpose).
fn split_host_port(value: &str, default_port: u16) -> (&str, u16) {
    match value.split_once(':') {
        Some((host, port_text)) => match port_text.parse() {
            Ok(port) => (host, port),
            Err(_) => {
                warn!(value, default_port, "malformed port, assuming default");
                (host, default_port)
            }
        },
        None => (value, default_port),
    }
}
