use crate::addressing::Address;
use crate::auth;
use crate::config::Config;
use crate::errors::{BoltError, BoltResult, ProtocolError};
use crate::buffer::Buffer;
use crate::logging;
use crate::protocol::v1::{self, ProtocolState};
use crate::protocol::{self, BoltProtocol, Message};
use crate::transport::Transport;
use crate::values::Value;
use byteorder::{BigEndian, ByteOrder};
use slog::Logger;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Initial size of the wire-level buffers, which carry chunk framing.
const INITIAL_WIRE_BUFFER_SIZE: usize = 8192;

static CONNECTION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Ready,
    Failed,
    Defunct,
}

/// Connection health: state plus the most recent error and where it was
/// raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: ConnectionState,
    pub error: Option<BoltError>,
    pub context: Option<String>,
}

impl Status {
    fn new() -> Status {
        Status { state: ConnectionState::Disconnected, error: None, context: None }
    }
}

/// What `fetch` pulled off the stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Fetched {
    /// A record belonging to the awaited request; fields are exposed via
    /// `field_values`.
    Record,
    /// The summary of the awaited request; metadata has been extracted.
    Summary,
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub time_opened: Option<Instant>,
    pub time_closed: Option<Instant>,
}

/// A single-owner connection to one server. All operations are blocking
/// and run on the caller's thread; concurrent use from multiple threads
/// is not supported.
pub struct Connection {
    id: String,
    address: Address,
    transport: Option<Transport>,
    protocol_version: u32,
    protocol: Option<Box<dyn BoltProtocol>>,
    state: ProtocolState,
    /// Wire-level transmit buffer holding chunked messages.
    tx_buffer: Buffer,
    /// Wire-level receive staging buffer.
    rx_buffer: Buffer,
    status: Status,
    metrics: Metrics,
    log: Logger,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("transport", &self.transport)
            .field("protocol_version", &self.protocol_version)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("metrics", &self.metrics)
            .finish()
    }
}

enum Template {
    Run,
    Begin,
    Commit,
    Rollback,
    DiscardAll,
    PullAll,
    Reset,
    AckFailure,
}

impl Connection {
    pub fn new(address: Address, log: &Logger) -> Connection {
        let sequence = CONNECTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let id = format!("connection-{}", sequence);
        let log = log.new(logging::o!("connection_id" => id.clone()));

        Connection {
            id,
            address,
            transport: None,
            protocol_version: 0,
            protocol: None,
            state: ProtocolState::new(),
            tx_buffer: Buffer::new(INITIAL_WIRE_BUFFER_SIZE),
            rx_buffer: Buffer::new(INITIAL_WIRE_BUFFER_SIZE),
            status: Status::new(),
            metrics: Metrics::default(),
            log,
        }
    }

    /// Connect, negotiate TLS when configured, and perform the version
    /// handshake. `Disconnected -> Connected`, or `-> Defunct` on any
    /// failure. A connection that has left `Disconnected` is never
    /// reopened.
    pub fn open(&mut self, config: &Config) -> BoltResult<()> {
        if self.status.state != ConnectionState::Disconnected {
            return Err(ProtocolError::Violation.into());
        }

        match Transport::open(&self.address, config) {
            Ok(transport) => self.handshake(transport),
            Err(error) => {
                self.set_defunct(error.clone(), "open");
                Err(error)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn open_with(&mut self, transport: Transport) -> BoltResult<()> {
        self.handshake(transport)
    }

    fn handshake(&mut self, mut transport: Transport) -> BoltResult<()> {
        let mut request = [0u8; 20];
        request[..4].copy_from_slice(&protocol::PREAMBLE);
        for (index, proposal) in crate::PROTOCOL_VERSIONS.iter().enumerate() {
            BigEndian::write_u32(&mut request[4 + index * 4..8 + index * 4], *proposal);
        }

        let mut response = [0u8; 4];
        let exchanged = transport.send(&request).and_then(|_| transport.receive_exact(&mut response));
        if let Err(error) = exchanged {
            self.set_defunct(error.clone(), "handshake");
            return Err(error);
        }
        self.metrics.bytes_sent += request.len() as u64;
        self.metrics.bytes_received += response.len() as u64;

        let version = BigEndian::read_u32(&response);
        match protocol::for_version(version) {
            Some(negotiated) => {
                logging::debug!(self.log, "protocol negotiated"; "protocol_version" => version);
                self.protocol = Some(negotiated);
                self.protocol_version = version;
                self.state = ProtocolState::new();
                self.transport = Some(transport);
                self.metrics.time_opened = Some(Instant::now());
                self.status = Status { state: ConnectionState::Connected, error: None, context: None };
                Ok(())
            }
            None => {
                let error: BoltError = ProtocolError::UnsupportedVersion(version).into();
                self.set_defunct(error.clone(), "handshake");
                Err(error)
            }
        }
    }

    /// Shut the transport down and return to `Disconnected`.
    pub fn close(&mut self) {
        logging::debug!(self.log, "closing connection";
                        "bytes_sent" => self.metrics.bytes_sent,
                        "bytes_received" => self.metrics.bytes_received);
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.metrics.time_closed = Some(Instant::now());
        self.status = Status::new();
    }

    /// Authenticate. `Connected -> Ready` on SUCCESS, `-> Defunct` on
    /// FAILURE. The token copy handed to the logger is masked; the wire
    /// copy is not.
    pub fn init(&mut self, user_agent: &str, auth_token: &Value) -> BoltResult<()> {
        if self.status.state != ConnectionState::Connected {
            return Err(ProtocolError::Violation.into());
        }

        let mut message = Message::new(protocol::MSG_INIT, 2);
        message.field_mut(0).expect("INIT user agent field").format_as_string(user_agent);
        *message.field_mut(1).expect("INIT auth token field") = auth_token.clone();

        let mut logged = message.clone();
        *logged.field_mut(1).expect("INIT auth token field") = auth::masked(auth_token);

        let request = {
            let protocol = self.protocol.as_deref().ok_or(BoltError::from(ProtocolError::Violation))?;
            protocol::log_message(&self.log, "C", self.state.next_request_id, &logged, protocol);
            v1::load_message(
                &message,
                protocol,
                &mut self.state.tx_buffer,
                &mut self.tx_buffer,
                &mut self.state.next_request_id,
                &self.log,
                true,
            )?
        };

        self.send()?;
        self.fetch_summary(request)?;

        match self.state.data_type {
            protocol::MSG_SUCCESS => Ok(()),
            protocol::MSG_FAILURE => {
                let error = self.server_failure_error();
                self.set_defunct(error.clone(), "init");
                Err(error)
            }
            _ => {
                let error: BoltError = ProtocolError::Violation.into();
                self.set_defunct(error.clone(), "init");
                Err(error)
            }
        }
    }

    /// Drain queued requests to the transport.
    pub fn send(&mut self) -> BoltResult<()> {
        let size = self.tx_buffer.unloadable();
        if size == 0 {
            return Ok(());
        }

        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Err(ProtocolError::Violation.into()),
        };
        let span = self.tx_buffer.unload_pointer(size).expect("Transmit buffer shrank mid-send");
        let sent = transport.send(span);

        match sent {
            Ok(count) => {
                self.metrics.bytes_sent += count as u64;
                logging::trace!(self.log, "data sent"; "bytes" => count);
                self.tx_buffer.compact();
                Ok(())
            }
            Err(error) => {
                self.set_defunct(error.clone(), "send");
                Err(error)
            }
        }
    }

    /// Advance the response stream on behalf of `request`. Payloads that
    /// belong to earlier, abandoned requests are discarded.
    pub fn fetch(&mut self, request: u64) -> BoltResult<Fetched> {
        if request >= self.state.next_request_id {
            return Err(ProtocolError::Violation.into());
        }

        loop {
            let response_id = self.state.response_counter;
            if let Err(error) = self.receive_message() {
                if error.is_fatal_for_connection() {
                    self.set_defunct(error.clone(), "fetch");
                }
                return Err(error);
            }

            if self.state.data_type != protocol::MSG_RECORD {
                self.state.response_counter += 1;
                self.state.result_metadata.format_as_dictionary(0);
                if let Some(metadata) = self.state.data.list_value(0).cloned() {
                    v1::extract_metadata(&mut self.state, &metadata, &self.log);
                }
                self.apply_summary_transition();
            }

            if response_id == request {
                return Ok(if self.state.data_type == protocol::MSG_RECORD {
                    Fetched::Record
                } else {
                    Fetched::Summary
                });
            }
        }
    }

    /// Fetch until the summary of `request` arrives; returns the number
    /// of records observed for it.
    pub fn fetch_summary(&mut self, request: u64) -> BoltResult<u64> {
        let mut records = 0;
        loop {
            match self.fetch(request)? {
                Fetched::Record => records += 1,
                Fetched::Summary => return Ok(records),
            }
        }
    }

    /// Receive one chunked message and decode it into the protocol
    /// state.
    fn receive_message(&mut self) -> BoltResult<()> {
        {
            let transport = match self.transport.as_mut() {
                Some(transport) => transport,
                None => return Err(ProtocolError::Violation.into()),
            };

            let mut header = [0u8; 2];
            transport.receive_exact(&mut header)?;
            self.metrics.bytes_received += 2;
            let mut chunk_size = BigEndian::read_u16(&header);

            self.state.rx_buffer.compact();
            while chunk_size != 0 {
                let staged = self.rx_buffer.load_pointer(usize::from(chunk_size));
                transport.receive_exact(staged)?;
                self.metrics.bytes_received += u64::from(chunk_size);

                let staged = self
                    .rx_buffer
                    .unload_pointer(usize::from(chunk_size))
                    .expect("Staged chunk missing from receive buffer");
                self.state.rx_buffer.load(staged);
                self.rx_buffer.compact();

                transport.receive_exact(&mut header)?;
                self.metrics.bytes_received += 2;
                chunk_size = BigEndian::read_u16(&header);
            }
        }

        let protocol = self.protocol.as_deref().ok_or(BoltError::from(ProtocolError::Violation))?;
        v1::unload(&mut self.state, protocol, &self.log)
    }

    fn apply_summary_transition(&mut self) {
        match self.state.data_type {
            protocol::MSG_SUCCESS => {
                if let Some(connection_id) = self.state.connection_id.take() {
                    if !connection_id.is_empty() {
                        self.id = format!("{}[{}]", self.id, connection_id);
                        self.log = self.log.new(logging::o!("server_connection_id" => connection_id));
                    }
                }
                self.status = Status { state: ConnectionState::Ready, error: None, context: None };
            }
            protocol::MSG_FAILURE => {
                self.status = Status {
                    state: ConnectionState::Failed,
                    error: Some(self.server_failure_error()),
                    context: Some("summary".to_owned()),
                };
            }
            // IGNORED leaves a latched failure latched and otherwise
            // changes nothing.
            _ => {}
        }
    }

    fn set_defunct(&mut self, error: BoltError, context: &str) {
        logging::warn!(self.log, "connection defunct"; "context" => context, "error" => %error);
        self.status = Status {
            state: ConnectionState::Defunct,
            error: Some(error),
            context: Some(context.to_owned()),
        };
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.metrics.time_closed = Some(Instant::now());
    }

    fn server_failure_error(&self) -> BoltError {
        match &self.state.failure_data {
            Some(failure) => BoltError::Server {
                code: failure
                    .value_by_key("code")
                    .and_then(Value::as_string)
                    .unwrap_or("")
                    .to_owned(),
                message: failure
                    .value_by_key("message")
                    .and_then(Value::as_string)
                    .unwrap_or("")
                    .to_owned(),
            },
            None => ProtocolError::Violation.into(),
        }
    }
}

/// Request composition. Each `load_*` serialises the corresponding
/// template, assigns it the next request id and queues it for `send`.
impl Connection {
    pub fn clear_run(&mut self) -> BoltResult<()> {
        self.state.clear_run();
        Ok(())
    }

    pub fn set_run_cypher(&mut self, statement: &str) -> BoltResult<()> {
        self.state.set_run_cypher(statement);
        Ok(())
    }

    pub fn set_run_cypher_parameter(&mut self, key: &str, value: Value) -> BoltResult<()> {
        self.state.set_run_parameter(key, value);
        Ok(())
    }

    /// RUN carries no bookmark slot in v1/v2.
    pub fn set_run_bookmarks(&mut self, _bookmarks: &[&str]) -> BoltResult<()> {
        Err(ProtocolError::UnsupportedType.into())
    }

    /// Transaction timeouts have no v1/v2 wire slot.
    pub fn set_run_tx_timeout(&mut self, _timeout_ms: i64) -> BoltResult<()> {
        Err(ProtocolError::UnsupportedType.into())
    }

    /// Transaction metadata has no v1/v2 wire slot.
    pub fn set_run_tx_metadata(&mut self, _metadata: &Value) -> BoltResult<()> {
        Err(ProtocolError::UnsupportedType.into())
    }

    pub fn clear_begin(&mut self) -> BoltResult<()> {
        self.state.clear_begin();
        Ok(())
    }

    pub fn set_begin_bookmarks(&mut self, bookmarks: &[&str]) -> BoltResult<()> {
        self.state.set_begin_bookmarks(bookmarks);
        Ok(())
    }

    /// Transaction timeouts have no v1/v2 wire slot.
    pub fn set_begin_tx_timeout(&mut self, _timeout_ms: i64) -> BoltResult<()> {
        Err(ProtocolError::UnsupportedType.into())
    }

    /// Transaction metadata has no v1/v2 wire slot.
    pub fn set_begin_tx_metadata(&mut self, _metadata: &Value) -> BoltResult<()> {
        Err(ProtocolError::UnsupportedType.into())
    }

    pub fn load_run(&mut self) -> BoltResult<u64> {
        self.load_template(Template::Run)
    }

    pub fn load_begin(&mut self) -> BoltResult<u64> {
        let request = self.load_template(Template::Begin)?;
        self.state.clear_begin();
        Ok(request)
    }

    pub fn load_commit(&mut self) -> BoltResult<u64> {
        self.load_template(Template::Commit)
    }

    pub fn load_rollback(&mut self) -> BoltResult<u64> {
        self.load_template(Template::Rollback)
    }

    pub fn load_discard(&mut self) -> BoltResult<u64> {
        self.load_template(Template::DiscardAll)
    }

    pub fn load_pull(&mut self) -> BoltResult<u64> {
        self.load_template(Template::PullAll)
    }

    /// Queue a RESET. The latched failure clears now; the connection
    /// returns to `Ready` when the RESET summary arrives.
    pub fn load_reset(&mut self) -> BoltResult<u64> {
        let request = self.load_template(Template::Reset)?;
        self.state.clear_failure();
        Ok(request)
    }

    pub fn load_ack_failure(&mut self) -> BoltResult<u64> {
        let request = self.load_template(Template::AckFailure)?;
        self.state.clear_failure();
        Ok(request)
    }

    fn load_template(&mut self, template: Template) -> BoltResult<u64> {
        let protocol = self.protocol.as_deref().ok_or(BoltError::from(ProtocolError::Violation))?;
        let message = match template {
            Template::Run => &self.state.run,
            Template::Begin => &self.state.begin,
            Template::Commit => &self.state.commit,
            Template::Rollback => &self.state.rollback,
            Template::DiscardAll => &self.state.discard_request,
            Template::PullAll => &self.state.pull_request,
            Template::Reset => &self.state.reset_request,
            Template::AckFailure => &self.state.ack_failure_request,
        };
        v1::load_message(
            message,
            protocol,
            &mut self.state.tx_buffer,
            &mut self.tx_buffer,
            &mut self.state.next_request_id,
            &self.log,
            false,
        )
    }

    /// RESET round-trip: queue, send, await the summary. `Ready` on
    /// SUCCESS.
    pub fn reset(&mut self) -> BoltResult<()> {
        let request = self.load_reset()?;
        self.send()?;
        self.fetch_summary(request)?;
        if self.summary_success() {
            Ok(())
        } else {
            Err(self.server_failure_error())
        }
    }
}

/// Read-only queries.
impl Connection {
    /// Id of the most recently queued request.
    #[inline]
    pub fn last_request(&self) -> Option<u64> {
        self.state.next_request_id.checked_sub(1)
    }

    /// Server identification from the most recent INIT SUCCESS.
    #[inline]
    pub fn server(&self) -> &str {
        &self.state.server
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(Transport::remote_endpoint)
    }

    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(Transport::local_endpoint)
    }

    /// Owned copy of the most recent bookmark; later summaries do not
    /// invalidate it.
    pub fn last_bookmark(&self) -> String {
        self.state.last_bookmark.clone()
    }

    /// True when the current summary is SUCCESS.
    #[inline]
    pub fn summary_success(&self) -> bool {
        self.state.data_type == protocol::MSG_SUCCESS
    }

    /// Failure details of the most recent FAILURE summary.
    pub fn failure(&self) -> Option<&Value> {
        self.state.failure_data.as_ref()
    }

    /// Result field names from the most recent RUN SUCCESS.
    #[inline]
    pub fn field_names(&self) -> &Value {
        &self.state.result_field_names
    }

    /// Fields of the current record or summary.
    #[inline]
    pub fn field_values(&self) -> &Value {
        &self.state.data
    }

    /// Unrecognised metadata of the most recent summary.
    #[inline]
    pub fn metadata(&self) -> &Value {
        &self.state.result_metadata
    }

    #[inline]
    pub fn status(&self) -> &Status {
        &self.status
    }

    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[inline]
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Option<Duration> {
        self.metrics.time_opened.map(|opened| opened.elapsed())
    }
}
