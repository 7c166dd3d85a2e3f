use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cassette_cql::frame::request::{self, options, SerializableRequest};
use cassette_cql::frame::response::authenticate::Authenticate;
use cassette_cql::frame::response::event::{Event, EventType};
use cassette_cql::frame::response::result::{self, Prepared, RawRowsBuilder, Rows, RowsBuilder};
use cassette_cql::frame::response::{Error, NonErrorResponse, Response};
use cassette_cql::frame::{self, Compression, FrameHeader, SerializedRequest};
use cassette_cql::Consistency;
use futures::future::RemoteHandle;
use futures::FutureExt;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::client::config::ConnectionConfig;
use crate::cluster::endpoint::Endpoint;
use crate::errors::{
    BadKeyspaceName, BrokenConnectionError, BrokenConnectionErrorKind, ConnectionError,
    ProtocolError, RequestError,
};

const CLUSTER_NAME_QUERY: &str = "SELECT cluster_name FROM system.local";

/// A single logical stream to one node.
///
/// A connection carries at most one request at a time. It is created closed;
/// [`Connection::open`] brings it up and [`Connection::close`] tears it down.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    fn endpoint(&self) -> &Arc<Endpoint>;

    /// Connects and performs the handshake. Does nothing when already open.
    async fn open(&self) -> Result<(), ConnectionError>;

    /// Closes the connection. Safe to call in any state, any number of times;
    /// a request in flight fails with a broken connection error.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Keyspace the connection is currently bound to.
    fn keyspace(&self) -> Option<String>;

    async fn use_keyspace(&self, keyspace: &str) -> Result<(), RequestError>;

    /// Name of the cluster the node belongs to. Used as a health probe.
    async fn cluster_name(&self) -> Result<String, RequestError>;
}

/// Builds connections to endpoints. Connections are returned closed.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn create(&self, endpoint: Arc<Endpoint>) -> Self::Connection;
}

/// Builds [`CqlConnection`]s sharing one [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct CqlConnectionFactory {
    config: ConnectionConfig,
}

impl CqlConnectionFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl ConnectionFactory for CqlConnectionFactory {
    type Connection = CqlConnection;

    fn create(&self, endpoint: Arc<Endpoint>) -> CqlConnection {
        CqlConnection::new(endpoint, self.config.clone())
    }
}

/// A connection speaking the native protocol over TCP.
pub struct CqlConnection {
    endpoint: Arc<Endpoint>,
    config: ConnectionConfig,
    live: StdMutex<Option<Arc<Live>>>,
    opening: tokio::sync::Mutex<()>,
    busy: AtomicBool,
    keyspace: StdMutex<Option<String>>,
    next_stream: AtomicU8,
}

/// Socket state of an open connection.
struct Live {
    writer: tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>,
    router: Arc<ResponseRouter>,
    _reader_handle: RemoteHandle<()>,
}

#[derive(Debug)]
pub(crate) struct ReceivedFrame {
    header: FrameHeader,
    body: Bytes,
}

type ResponseSender = oneshot::Sender<Result<ReceivedFrame, BrokenConnectionError>>;

struct Waiter {
    stream: i8,
    sender: ResponseSender,
}

#[derive(Default)]
struct RouterState {
    waiter: Option<Waiter>,
    broken: Option<BrokenConnectionError>,
    compression: Option<Compression>,
}

/// Hands frames read from the socket to the request waiting for them.
#[derive(Default)]
pub(crate) struct ResponseRouter {
    state: StdMutex<RouterState>,
}

impl ResponseRouter {
    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        stream: i8,
    ) -> Result<oneshot::Receiver<Result<ReceivedFrame, BrokenConnectionError>>, BrokenConnectionError>
    {
        let mut state = self.lock();
        if let Some(err) = &state.broken {
            return Err(err.clone());
        }
        let (sender, receiver) = oneshot::channel();
        state.waiter = Some(Waiter { stream, sender });
        Ok(receiver)
    }

    /// Completes the pending request with a frame read from the socket.
    ///
    /// A frame on a stream other than the pending one, or with no request
    /// pending at all, breaks the connection: the pending request (if any)
    /// fails and the connection reports itself closed from now on.
    pub(crate) fn deliver_response(
        &self,
        header: FrameHeader,
        body: Bytes,
    ) -> Result<(), BrokenConnectionError> {
        let mut state = self.lock();
        match state.waiter.take() {
            Some(waiter) if waiter.stream == header.stream => {
                // Nobody may be listening anymore, that's fine.
                let _ = waiter.sender.send(Ok(ReceivedFrame { header, body }));
                Ok(())
            }
            waiter => {
                let err: BrokenConnectionError = BrokenConnectionErrorKind::UnexpectedStreamId {
                    received: header.stream,
                    expected: waiter.as_ref().map(|w| w.stream),
                }
                .into();
                if let Some(waiter) = waiter {
                    let _ = waiter.sender.send(Err(err.clone()));
                }
                state.broken.get_or_insert_with(|| err.clone());
                Err(err)
            }
        }
    }

    fn break_connection(&self, err: BrokenConnectionError) {
        let mut state = self.lock();
        if state.broken.is_none() {
            state.broken = Some(err.clone());
        }
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.sender.send(Err(err));
        }
    }

    fn is_broken(&self) -> bool {
        self.lock().broken.is_some()
    }

    fn compression(&self) -> Option<Compression> {
        self.lock().compression
    }

    fn set_compression(&self, compression: Option<Compression>) {
        self.lock().compression = compression;
    }
}

/// Breaks the connection if the request is dropped before its response
/// arrives.
struct OrphanGuard<'a> {
    router: &'a ResponseRouter,
    armed: bool,
}

impl OrphanGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OrphanGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.router
                .break_connection(BrokenConnectionErrorKind::RequestCancelled.into());
        }
    }
}

#[derive(Debug)]
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, RequestError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(flag))
            .map_err(|_| RequestError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Live {
    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        stream: i8,
        compress: bool,
        tracing: bool,
    ) -> Result<ReceivedFrame, RequestError> {
        let compression = if compress {
            self.router.compression()
        } else {
            None
        };
        let mut serialized = SerializedRequest::make(request, compression, tracing)?;
        serialized.set_stream(stream);

        let receiver = self.router.register(stream)?;
        let guard = OrphanGuard {
            router: &self.router,
            armed: true,
        };

        {
            let mut writer = self.writer.lock().await;
            let written = match writer.write_all(serialized.get_data()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let err: BrokenConnectionError = BrokenConnectionErrorKind::WriteError(err).into();
                self.router.break_connection(err.clone());
                guard.disarm();
                return Err(err.into());
            }
        }

        let response = receiver.await;
        guard.disarm();
        match response {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(BrokenConnectionError::from(BrokenConnectionErrorKind::ClosedByClient).into()),
        }
    }

    fn parse_response<B: RowsBuilder>(
        &self,
        frame: ReceivedFrame,
        builder: &mut B,
    ) -> Result<(NonErrorResponse<B::Output>, Option<Uuid>), RequestError> {
        let ReceivedFrame { header, body } = frame;
        let body_with_ext =
            frame::parse_response_body_extensions(header.flags, self.router.compression(), body)
                .map_err(|err| ProtocolError::BodyExtensions(Arc::new(err)))?;
        if let Some(trace_id) = body_with_ext.trace_id {
            trace!("Response on stream {} traced as {}", header.stream, trace_id);
        }

        let opcode = header
            .response_opcode()
            .map_err(|err| ProtocolError::ResponseParse(err.into()))?;
        let response = Response::deserialize(opcode, &mut &body_with_ext.body[..], builder)
            .map_err(ProtocolError::from)?;

        match response.into_non_error_response() {
            Ok(response) => Ok((response, body_with_ext.trace_id)),
            Err(Error { error, reason }) => Err(RequestError::DbError(error, reason)),
        }
    }

    async fn request<B: RowsBuilder>(
        &self,
        request: &impl SerializableRequest,
        stream: i8,
        compress: bool,
        tracing: bool,
        builder: &mut B,
    ) -> Result<(NonErrorResponse<B::Output>, Option<Uuid>), RequestError> {
        let frame = self.send_request(request, stream, compress, tracing).await?;
        self.parse_response(frame, builder)
    }
}

impl CqlConnection {
    pub fn new(endpoint: Arc<Endpoint>, config: ConnectionConfig) -> Self {
        Self {
            endpoint,
            config,
            live: StdMutex::new(None),
            opening: tokio::sync::Mutex::new(()),
            busy: AtomicBool::new(false),
            keyspace: StdMutex::new(None),
            next_stream: AtomicU8::new(0),
        }
    }

    fn lock_live(&self) -> MutexGuard<'_, Option<Arc<Live>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_keyspace(&self) -> MutexGuard<'_, Option<String>> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Result<Arc<Live>, RequestError> {
        match self.lock_live().as_ref() {
            Some(live) if !live.router.is_broken() => Ok(Arc::clone(live)),
            _ => Err(RequestError::Closed),
        }
    }

    // Stream ids stay within 0..=127, negative ids are reserved for events.
    fn next_stream_id(&self) -> i8 {
        (self.next_stream.fetch_add(1, Ordering::Relaxed) & 0x7F) as i8
    }

    async fn request<B: RowsBuilder>(
        &self,
        request: &impl SerializableRequest,
        tracing: bool,
        builder: &mut B,
    ) -> Result<(NonErrorResponse<B::Output>, Option<Uuid>), RequestError> {
        let live = self.live()?;
        let _busy = BusyGuard::acquire(&self.busy)?;
        live.request(request, self.next_stream_id(), true, tracing, builder)
            .await
    }

    async fn result_request<B: RowsBuilder>(
        &self,
        request: &impl SerializableRequest,
        tracing: bool,
        builder: &mut B,
    ) -> Result<(result::Result<B::Output>, Option<Uuid>), RequestError> {
        match self.request(request, tracing, builder).await? {
            (NonErrorResponse::Result(result), trace_id) => Ok((result, trace_id)),
            (other, _) => Err(ProtocolError::UnexpectedResponse(other.to_response_kind()).into()),
        }
    }

    /// Runs an unprepared statement, keeping rows as raw cells.
    pub async fn query(
        &self,
        cql: &str,
        consistency: Consistency,
    ) -> Result<result::Result<Rows>, RequestError> {
        self.query_with(cql, consistency, &mut RawRowsBuilder).await
    }

    /// Runs an unprepared statement, handing rows to `builder`.
    pub async fn query_with<B: RowsBuilder>(
        &self,
        cql: &str,
        consistency: Consistency,
        builder: &mut B,
    ) -> Result<result::Result<B::Output>, RequestError> {
        let query = request::Query {
            contents: Cow::Borrowed(cql),
            consistency,
        };
        Ok(self.result_request(&query, false, builder).await?.0)
    }

    /// Like [`CqlConnection::query`], with server side tracing requested.
    /// Returns the tracing session id if the server sent one.
    pub async fn query_traced(
        &self,
        cql: &str,
        consistency: Consistency,
    ) -> Result<(result::Result<Rows>, Option<Uuid>), RequestError> {
        let query = request::Query {
            contents: Cow::Borrowed(cql),
            consistency,
        };
        self.result_request(&query, true, &mut RawRowsBuilder).await
    }

    pub async fn prepare(&self, cql: &str) -> Result<Prepared, RequestError> {
        let prepare = request::Prepare {
            query: Cow::Borrowed(cql),
        };
        match self.result_request(&prepare, false, &mut RawRowsBuilder).await?.0 {
            result::Result::Prepared(prepared) => Ok(prepared),
            other => Err(ProtocolError::UnexpectedResult(result_kind(&other)).into()),
        }
    }

    /// Executes a prepared statement with already serialized bound values.
    pub async fn execute(
        &self,
        prepared: &Prepared,
        values: Vec<Option<Bytes>>,
        consistency: Consistency,
    ) -> Result<result::Result<Rows>, RequestError> {
        let execute = request::Execute {
            id: prepared.id.clone(),
            values,
            consistency,
        };
        Ok(self
            .result_request(&execute, false, &mut RawRowsBuilder)
            .await?
            .0)
    }

    /// Subscribes the connection to server pushed events. They are forwarded
    /// to the configured event sender.
    pub async fn register(&self, event_types: Vec<EventType>) -> Result<(), RequestError> {
        let register = request::Register {
            event_types_to_register_for: event_types,
        };
        match self.request(&register, false, &mut RawRowsBuilder).await?.0 {
            NonErrorResponse::Ready => Ok(()),
            other => Err(ProtocolError::UnexpectedResponse(other.to_response_kind()).into()),
        }
    }

    async fn connect(&self) -> Result<Live, ConnectionError> {
        let stream = tokio::time::timeout(
            self.endpoint.connect_timeout(),
            connect_to_endpoint(&self.endpoint),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout)??;

        stream.set_nodelay(self.config.tcp_nodelay)?;
        if let Some(tcp_keepalive_interval) = self.config.tcp_keepalive_interval {
            setup_tcp_keepalive(&stream, tcp_keepalive_interval)?;
        }

        let (read_half, write_half) = stream.into_split();
        let router = Arc::new(ResponseRouter::default());

        let (task, handle) = reader(
            BufReader::with_capacity(8192, read_half),
            Arc::clone(&router),
            self.config.event_sender.clone(),
            Arc::clone(&self.endpoint),
        )
        .remote_handle();
        tokio::task::spawn(task);

        Ok(Live {
            writer: tokio::sync::Mutex::new(BufWriter::with_capacity(8192, write_half)),
            router,
            _reader_handle: handle,
        })
    }

    async fn handshake(&self, live: &Live) -> Result<(), ConnectionError> {
        let mut options = HashMap::new();
        options.insert(
            Cow::Borrowed(options::CQL_VERSION),
            Cow::Borrowed(options::DEFAULT_CQL_VERSION),
        );

        if let Some(compression) = self.config.compression {
            let supported = match live
                .request(&request::Options, self.next_stream_id(), false, false, &mut RawRowsBuilder)
                .await?
                .0
            {
                NonErrorResponse::Supported(supported) => supported,
                other => {
                    return Err(ConnectionError::UnexpectedHandshakeResponse(
                        other.to_response_kind(),
                    ))
                }
            };

            let compression_str = compression.as_str();
            if supported.supports(options::COMPRESSION, compression_str) {
                options.insert(
                    Cow::Borrowed(options::COMPRESSION),
                    Cow::Borrowed(compression_str),
                );
                // Responses may be compressed starting with the answer to STARTUP.
                live.router.set_compression(Some(compression));
            } else {
                warn!(
                    "[{}] Requested compression <{}> is not supported by the node. Falling back to no compression",
                    self.endpoint, compression_str
                );
            }
        }

        let startup = request::Startup { options };
        match live
            .request(&startup, self.next_stream_id(), false, false, &mut RawRowsBuilder)
            .await?
            .0
        {
            NonErrorResponse::Ready => {}
            NonErrorResponse::Authenticate(authenticate) => {
                self.authenticate(live, authenticate).await?
            }
            other => {
                return Err(ConnectionError::UnexpectedHandshakeResponse(
                    other.to_response_kind(),
                ))
            }
        }

        if self.config.event_sender.is_some() {
            let register = request::Register {
                event_types_to_register_for: EventType::ALL.to_vec(),
            };
            match live
                .request(&register, self.next_stream_id(), true, false, &mut RawRowsBuilder)
                .await?
                .0
            {
                NonErrorResponse::Ready => {}
                other => {
                    return Err(ConnectionError::UnexpectedHandshakeResponse(
                        other.to_response_kind(),
                    ))
                }
            }
        }

        Ok(())
    }

    async fn authenticate(
        &self,
        live: &Live,
        authenticate: Authenticate,
    ) -> Result<(), ConnectionError> {
        let Some(credentials) = &self.config.credentials else {
            return Err(ConnectionError::MissingCredentials {
                authenticator: authenticate.authenticator_name,
            });
        };
        debug!(
            "[{}] Authenticating with {} as {}",
            self.endpoint, authenticate.authenticator_name, credentials.username
        );

        let request = request::Credentials::plain(&credentials.username, &credentials.password);
        match live
            .request(&request, self.next_stream_id(), true, false, &mut RawRowsBuilder)
            .await?
            .0
        {
            NonErrorResponse::Ready => Ok(()),
            other => Err(ConnectionError::UnexpectedHandshakeResponse(
                other.to_response_kind(),
            )),
        }
    }
}

#[async_trait]
impl Connection for CqlConnection {
    fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    async fn open(&self) -> Result<(), ConnectionError> {
        let _opening = self.opening.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let live = self.connect().await?;
        if let Err(err) = self.handshake(&live).await {
            debug!("[{}] Handshake failed: {}", self.endpoint, err);
            live.router
                .break_connection(BrokenConnectionErrorKind::ClosedByClient.into());
            return Err(err);
        }

        *self.lock_live() = Some(Arc::new(live));
        trace!("[{}] Connection opened", self.endpoint);
        Ok(())
    }

    fn close(&self) {
        let live = self.lock_live().take();
        if let Some(live) = live {
            live.router
                .break_connection(BrokenConnectionErrorKind::ClosedByClient.into());
            trace!("[{}] Connection closed", self.endpoint);
        }
        *self.lock_keyspace() = None;
    }

    fn is_open(&self) -> bool {
        self.lock_live()
            .as_ref()
            .is_some_and(|live| !live.router.is_broken())
    }

    fn keyspace(&self) -> Option<String> {
        self.lock_keyspace().clone()
    }

    async fn use_keyspace(&self, keyspace: &str) -> Result<(), RequestError> {
        let keyspace = VerifiedKeyspaceName::new(keyspace)?;
        let statement = format!("USE {}", keyspace.as_str());
        match self.query(&statement, Consistency::One).await? {
            result::Result::SetKeyspace(set_keyspace) => {
                if !set_keyspace
                    .keyspace_name
                    .eq_ignore_ascii_case(keyspace.as_str())
                {
                    return Err(ProtocolError::KeyspaceNameMismatch {
                        expected_keyspace_name_lowercase: keyspace.as_str().to_lowercase(),
                        result_keyspace_name_lowercase: set_keyspace.keyspace_name.to_lowercase(),
                    }
                    .into());
                }
                *self.lock_keyspace() = Some(keyspace.as_str().to_owned());
                Ok(())
            }
            other => Err(ProtocolError::UnexpectedResult(result_kind(&other)).into()),
        }
    }

    async fn cluster_name(&self) -> Result<String, RequestError> {
        match self.query(CLUSTER_NAME_QUERY, Consistency::One).await? {
            result::Result::Rows(rows) => match rows.first_text() {
                Some(Ok(name)) => Ok(name.to_owned()),
                _ => Err(ProtocolError::MissingClusterName.into()),
            },
            other => Err(ProtocolError::UnexpectedResult(result_kind(&other)).into()),
        }
    }
}

fn result_kind<T>(result: &result::Result<T>) -> &'static str {
    match result {
        result::Result::Void => "Void",
        result::Result::Rows(_) => "Rows",
        result::Result::SetKeyspace(_) => "SetKeyspace",
        result::Result::Prepared(_) => "Prepared",
        result::Result::SchemaChange(_) => "SchemaChange",
    }
}

async fn reader(
    mut read_half: impl AsyncRead + Unpin,
    router: Arc<ResponseRouter>,
    event_sender: Option<mpsc::Sender<Event>>,
    endpoint: Arc<Endpoint>,
) {
    let error: BrokenConnectionError = loop {
        let (header, body) = match frame::read_response_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(err) => break BrokenConnectionErrorKind::FrameError(err).into(),
        };

        if header.is_event() {
            if let Some(event_sender) = event_sender.as_ref() {
                if let Err(err) = handle_event(header, body, router.compression(), event_sender) {
                    break err;
                }
            }
            continue;
        }

        if let Err(err) = router.deliver_response(header, body) {
            break err;
        }
    };

    debug!("[{}] Connection broken: {}", endpoint, error);
    router.break_connection(error);
}

fn handle_event(
    header: FrameHeader,
    body: Bytes,
    compression: Option<Compression>,
    event_sender: &mpsc::Sender<Event>,
) -> Result<(), BrokenConnectionError> {
    let body = frame::parse_response_body_extensions(header.flags, compression, body)
        .map_err(BrokenConnectionErrorKind::FrameError)?
        .body;
    let event = Event::deserialize(&mut &body[..])
        .map_err(BrokenConnectionErrorKind::CqlEventParseError)?;

    // The reader must not wait on a slow consumer.
    if let Err(err) = event_sender.try_send(event) {
        warn!("Dropping server event: {}", err);
    }
    Ok(())
}

async fn connect_to_endpoint(endpoint: &Endpoint) -> Result<TcpStream, ConnectionError> {
    let mut last_error = None;
    for addr in tokio::net::lookup_host((endpoint.address(), endpoint.port())).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }
    Err(match last_error {
        Some(err) => err.into(),
        None => ConnectionError::AddressResolution(endpoint.to_string()),
    })
}

fn setup_tcp_keepalive(stream: &TcpStream, tcp_keepalive_interval: Duration) -> std::io::Result<()> {
    // Our interval is the idle time before keepalives start, which socket2
    // calls "time". Its own interval is the time between probes.
    let mut tcp_keepalive = TcpKeepalive::new().with_time(tcp_keepalive_interval);

    #[cfg(any(
        target_os = "android",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "windows",
    ))]
    {
        tcp_keepalive = tcp_keepalive.with_interval(Duration::from_secs(1));
    }

    #[cfg(any(
        target_os = "android",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
    ))]
    {
        tcp_keepalive = tcp_keepalive.with_retries(10);
    }

    let sf = SockRef::from(&stream);
    sf.set_tcp_keepalive(&tcp_keepalive)
}

/// A keyspace name checked before it is spliced into a `USE` statement.
pub(crate) struct VerifiedKeyspaceName<'a> {
    name: &'a str,
}

impl<'a> VerifiedKeyspaceName<'a> {
    pub(crate) fn new(name: &'a str) -> Result<Self, BadKeyspaceName> {
        if name.is_empty() {
            return Err(BadKeyspaceName::Empty);
        }

        // Only ascii is allowed, so the char count is the byte length.
        let len = name.chars().count();
        if len > 48 {
            return Err(BadKeyspaceName::TooLong(name.to_string(), len));
        }

        if let Some(illegal) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(BadKeyspaceName::IllegalCharacter(name.to_string(), illegal));
        }

        Ok(Self { name })
    }

    pub(crate) fn as_str(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cassette_cql::frame::{Direction, PROTOCOL_VERSION};

    fn header(stream: i8) -> FrameHeader {
        FrameHeader {
            direction: Direction::Response,
            version: PROTOCOL_VERSION,
            flags: 0,
            stream,
            opcode: 0x02,
            length: 0,
        }
    }

    fn is_unexpected_stream(err: &BrokenConnectionError, received: i8, expected: Option<i8>) -> bool {
        matches!(
            err.downcast_ref::<BrokenConnectionErrorKind>(),
            Some(BrokenConnectionErrorKind::UnexpectedStreamId { received: r, expected: e })
                if *r == received && *e == expected
        )
    }

    #[tokio::test]
    async fn matching_frame_completes_waiter() {
        let router = ResponseRouter::default();
        let receiver = router.register(3).unwrap();
        router
            .deliver_response(header(3), Bytes::from_static(b"ok"))
            .unwrap();

        let frame = receiver.await.unwrap().unwrap();
        assert_eq!(frame.header.stream, 3);
        assert_eq!(&frame.body[..], b"ok");
        assert!(!router.is_broken());
    }

    #[tokio::test]
    async fn mismatched_stream_breaks_connection() {
        let router = ResponseRouter::default();
        let receiver = router.register(3).unwrap();

        let err = router.deliver_response(header(4), Bytes::new()).unwrap_err();
        assert!(is_unexpected_stream(&err, 4, Some(3)));

        let delivered = receiver.await.unwrap();
        assert_matches!(delivered, Err(err) if is_unexpected_stream(&err, 4, Some(3)));
        assert!(router.is_broken());
        assert!(router.register(5).is_err());
    }

    #[test]
    fn unsolicited_frame_breaks_connection() {
        let router = ResponseRouter::default();
        let err = router.deliver_response(header(0), Bytes::new()).unwrap_err();
        assert!(is_unexpected_stream(&err, 0, None));
        assert!(router.is_broken());
    }

    #[tokio::test]
    async fn dropped_request_breaks_connection() {
        let router = ResponseRouter::default();
        let _receiver = router.register(1).unwrap();
        drop(OrphanGuard {
            router: &router,
            armed: true,
        });
        assert!(router.is_broken());

        let router = ResponseRouter::default();
        OrphanGuard {
            router: &router,
            armed: true,
        }
        .disarm();
        assert!(!router.is_broken());
    }

    #[test]
    fn busy_flag_admits_one_request() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert_matches!(BusyGuard::acquire(&flag), Err(RequestError::Busy));
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn stream_ids_stay_non_negative() {
        let connection = CqlConnection::new(
            Arc::new(Endpoint::new("127.0.0.1", 9042, Duration::from_secs(1))),
            ConnectionConfig::default(),
        );
        for _ in 0..600 {
            assert!(connection.next_stream_id() >= 0);
        }
    }

    #[tokio::test]
    async fn closed_connection_rejects_requests() {
        let connection = CqlConnection::new(
            Arc::new(Endpoint::new("127.0.0.1", 9042, Duration::from_secs(1))),
            ConnectionConfig::default(),
        );
        assert!(!connection.is_open());
        assert_matches!(
            connection.query("SELECT 1", Consistency::One).await,
            Err(RequestError::Closed)
        );
        // Closing twice, and closing a never opened connection, is fine.
        connection.close();
        connection.close();
        assert!(!connection.is_open());
    }

    #[test]
    fn keyspace_names() {
        assert!(VerifiedKeyspaceName::new("analytics_2024").is_ok());
        assert_eq!(
            VerifiedKeyspaceName::new("").err(),
            Some(BadKeyspaceName::Empty)
        );
        let long = "a".repeat(49);
        assert_eq!(
            VerifiedKeyspaceName::new(&long).err(),
            Some(BadKeyspaceName::TooLong(long.clone(), 49))
        );
        assert_eq!(
            VerifiedKeyspaceName::new("ks; DROP").err(),
            Some(BadKeyspaceName::IllegalCharacter("ks; DROP".to_owned(), ';'))
        );
    }
}
