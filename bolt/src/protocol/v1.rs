use crate::buffer::Buffer;
use crate::errors::{BoltResult, ProtocolError};
use crate::logging;
use crate::packstream;
use crate::protocol::{self, BoltProtocol, Message};
use crate::values::Value;
use slog::Logger;

pub const MAX_BOOKMARK_SIZE: usize = 40;
pub const MAX_SERVER_SIZE: usize = 200;

const INITIAL_TX_BUFFER_SIZE: usize = 8192;
const INITIAL_RX_BUFFER_SIZE: usize = 8192;

/// Records of one result logged individually before the stream falls
/// silent until its summary.
const MAX_LOGGED_RECORDS: u64 = 3;

pub struct ProtocolV1;

impl BoltProtocol for ProtocolV1 {
    fn version(&self) -> u32 {
        1
    }

    fn message_name(&self, signature: u8) -> Option<&'static str> {
        match signature {
            protocol::MSG_INIT => Some("INIT"),
            protocol::MSG_ACK_FAILURE => Some("ACK_FAILURE"),
            protocol::MSG_RESET => Some("RESET"),
            protocol::MSG_RUN => Some("RUN"),
            protocol::MSG_DISCARD_ALL => Some("DISCARD_ALL"),
            protocol::MSG_PULL_ALL => Some("PULL_ALL"),
            protocol::MSG_SUCCESS => Some("SUCCESS"),
            protocol::MSG_RECORD => Some("RECORD"),
            protocol::MSG_IGNORED => Some("IGNORED"),
            protocol::MSG_FAILURE => Some("FAILURE"),
            _ => None,
        }
    }

    fn structure_name(&self, signature: u8) -> Option<&'static str> {
        match signature {
            protocol::STRUCT_NODE => Some("Node"),
            protocol::STRUCT_RELATIONSHIP => Some("Relationship"),
            protocol::STRUCT_UNBOUND_RELATIONSHIP => Some("UnboundRelationship"),
            protocol::STRUCT_PATH => Some("Path"),
            _ => None,
        }
    }

    fn check_readable_struct(&self, signature: u8) -> bool {
        match signature {
            protocol::MSG_SUCCESS
            | protocol::MSG_RECORD
            | protocol::MSG_IGNORED
            | protocol::MSG_FAILURE
            | protocol::STRUCT_NODE
            | protocol::STRUCT_RELATIONSHIP
            | protocol::STRUCT_UNBOUND_RELATIONSHIP
            | protocol::STRUCT_PATH => true,
            _ => false,
        }
    }

    fn check_writable_struct(&self, signature: u8) -> bool {
        match signature {
            protocol::MSG_INIT
            | protocol::MSG_ACK_FAILURE
            | protocol::MSG_RESET
            | protocol::MSG_RUN
            | protocol::MSG_DISCARD_ALL
            | protocol::MSG_PULL_ALL => true,
            _ => false,
        }
    }
}

/// Per-connection protocol state: request correlation counters, message
/// templates and the most recently received payload. The layout is the
/// same for v1 and v2; only the signature allow-lists differ.
#[derive(Debug)]
pub struct ProtocolState {
    /// Message-level buffer; complete bodies are chunked out of here
    /// into the connection's wire buffer.
    pub tx_buffer: Buffer,
    /// Message-level receive buffer, filled chunk by chunk.
    pub rx_buffer: Buffer,

    pub next_request_id: u64,
    pub response_counter: u64,
    pub record_counter: u64,

    pub server: String,
    pub connection_id: Option<String>,
    pub result_field_names: Value,
    pub result_metadata: Value,
    pub failure_data: Option<Value>,
    pub last_bookmark: String,

    /// Signature of the most recently received payload.
    pub data_type: u8,
    /// Fields of the most recently received payload.
    pub data: Value,

    pub run: Message,
    pub begin: Message,
    pub commit: Message,
    pub rollback: Message,
    pub discard_request: Message,
    pub pull_request: Message,
    pub reset_request: Message,
    pub ack_failure_request: Message,
}

/// RUN-shaped template with a pinned statement.
fn run_template(statement: &str) -> Message {
    let mut message = Message::new(protocol::MSG_RUN, 2);
    message.field_mut(0).expect("RUN template statement field").format_as_string(statement);
    message.field_mut(1).expect("RUN template parameter field").format_as_dictionary(0);
    message
}

impl ProtocolState {
    pub fn new() -> ProtocolState {
        let mut result_field_names = Value::Null;
        result_field_names.format_as_list(0);
        let mut result_metadata = Value::Null;
        result_metadata.format_as_dictionary(0);
        let mut data = Value::Null;
        data.format_as_list(0);

        ProtocolState {
            tx_buffer: Buffer::new(INITIAL_TX_BUFFER_SIZE),
            rx_buffer: Buffer::new(INITIAL_RX_BUFFER_SIZE),
            next_request_id: 0,
            response_counter: 0,
            record_counter: 0,
            server: String::new(),
            connection_id: None,
            result_field_names,
            result_metadata,
            failure_data: None,
            last_bookmark: String::new(),
            data_type: protocol::MSG_RECORD,
            data,
            run: run_template(""),
            begin: run_template("BEGIN"),
            commit: run_template("COMMIT"),
            rollback: run_template("ROLLBACK"),
            discard_request: Message::new(protocol::MSG_DISCARD_ALL, 0),
            pull_request: Message::new(protocol::MSG_PULL_ALL, 0),
            reset_request: Message::new(protocol::MSG_RESET, 0),
            ack_failure_request: Message::new(protocol::MSG_ACK_FAILURE, 0),
        }
    }

    pub fn set_run_cypher(&mut self, statement: &str) {
        self.run.field_mut(0).expect("RUN template statement field").format_as_string(statement);
    }

    /// Set a RUN parameter, replacing an existing entry with the same
    /// key.
    pub fn set_run_parameter(&mut self, key: &str, value: Value) {
        let parameters = self.run.field_mut(1).expect("RUN template parameter field");
        match parameters.value_by_key_mut(key) {
            Some(existing) => *existing = value,
            None => {
                parameters.insert(key, value);
            }
        }
    }

    pub fn clear_run(&mut self) {
        self.run = run_template("");
    }

    pub fn set_begin_bookmarks(&mut self, bookmarks: &[&str]) {
        let items: Vec<Value> = bookmarks.iter().map(|b| Value::from(*b)).collect();
        let parameters = self.begin.field_mut(1).expect("BEGIN template parameter field");
        match parameters.value_by_key_mut("bookmarks") {
            Some(existing) => *existing = Value::List(items),
            None => {
                parameters.insert("bookmarks", Value::List(items));
            }
        }
    }

    pub fn clear_begin(&mut self) {
        self.begin = run_template("BEGIN");
    }

    pub fn clear_failure(&mut self) {
        self.failure_data = None;
    }

    fn ensure_failure_data(&mut self) -> &mut Value {
        if self.failure_data.is_none() {
            self.failure_data = Some(Value::dictionary_of(vec![
                ("code", Value::from("")),
                ("message", Value::from("")),
            ]));
        }
        self.failure_data.as_mut().expect("Failure data just ensured")
    }
}

/// Serialise a message into the message buffer, then chunk it out into
/// the wire buffer, assigning it the next request id. A failed load
/// rolls the message buffer back and queues nothing.
pub fn load_message(
    message: &Message,
    protocol: &dyn BoltProtocol,
    message_buffer: &mut Buffer,
    wire_buffer: &mut Buffer,
    next_request_id: &mut u64,
    log: &Logger,
    quiet: bool,
) -> BoltResult<u64> {
    if !protocol.check_writable_struct(message.signature) {
        return Err(ProtocolError::UnsupportedType.into());
    }

    if !quiet {
        protocol::log_message(log, "C", *next_request_id, message, protocol);
    }

    let (cursor, extent) = message_buffer.cursors();
    let loaded = load_message_body(message, protocol, message_buffer);
    if let Err(error) = loaded {
        message_buffer.truncate_to(cursor, extent);
        return Err(error);
    }

    packstream::enqueue(message_buffer, wire_buffer);
    let request_id = *next_request_id;
    *next_request_id += 1;
    Ok(request_id)
}

fn load_message_body(message: &Message, protocol: &dyn BoltProtocol, buffer: &mut Buffer) -> BoltResult<()> {
    let fields = message.fields.as_list().unwrap_or(&[]);
    packstream::load_structure_header(buffer, message.signature, fields.len())?;
    for field in fields {
        packstream::load(buffer, field, protocol)?;
    }
    Ok(())
}

/// Parse one complete, dechunked message out of the receive buffer into
/// `data_type`/`data`.
pub fn unload(state: &mut ProtocolState, protocol: &dyn BoltProtocol, log: &Logger) -> BoltResult<()> {
    let marker = state.rx_buffer.unload_u8()?;
    if marker & 0xF0 != 0xB0 {
        return Err(ProtocolError::Violation.into());
    }
    let size = usize::from(marker & 0x0F);
    let code = state.rx_buffer.unload_u8()?;
    match code {
        protocol::MSG_SUCCESS | protocol::MSG_RECORD | protocol::MSG_IGNORED | protocol::MSG_FAILURE => {}
        _ => return Err(ProtocolError::Violation.into()),
    }

    state.data_type = code;
    let mut fields = Vec::with_capacity(size);
    for _ in 0..size {
        fields.push(packstream::unload(&mut state.rx_buffer, protocol)?);
    }
    state.data = Value::List(fields);

    if code == protocol::MSG_RECORD {
        if state.record_counter < MAX_LOGGED_RECORDS {
            log_server_message(state, protocol, log);
        }
        state.record_counter += 1;
    } else {
        if state.record_counter > MAX_LOGGED_RECORDS {
            logging::info!(log, "record stream tail elided";
                           "response_id" => state.response_counter,
                           "unlogged_records" => state.record_counter - MAX_LOGGED_RECORDS);
        }
        state.record_counter = 0;
        log_server_message(state, protocol, log);
    }

    Ok(())
}

fn log_server_message(state: &ProtocolState, protocol: &dyn BoltProtocol, log: &Logger) {
    logging::debug!(log, "message";
                    "direction" => "S",
                    "response_id" => state.response_counter,
                    "name" => protocol.message_name(state.data_type).unwrap_or("?"),
                    "fields" => %state.data.display(Some(protocol)));
}

/// Drain a summary's metadata dictionary into the protocol state.
pub fn extract_metadata(state: &mut ProtocolState, metadata: &Value, log: &Logger) {
    let entries = match metadata.as_entries() {
        Some(entries) => entries,
        None => return,
    };

    for (key, value) in entries {
        match key.as_str() {
            "bookmark" => {
                if let Some(bookmark) = value.as_string() {
                    state.last_bookmark = truncated(bookmark, MAX_BOOKMARK_SIZE);
                    logging::info!(log, "bookmark updated"; "last_bookmark" => &state.last_bookmark);
                }
            }
            "fields" => {
                if let Some(items) = value.as_list() {
                    let names: Vec<Value> = items
                        .iter()
                        .map(|item| match item.as_string() {
                            Some(name) => Value::from(name),
                            None => Value::Null,
                        })
                        .collect();
                    state.result_field_names = Value::List(names);
                    logging::info!(log, "result fields updated";
                                   "result_field_names" => %state.result_field_names);
                }
            }
            "server" => {
                if let Some(server) = value.as_string() {
                    state.server = truncated(server, MAX_SERVER_SIZE);
                    logging::info!(log, "server identified"; "server" => &state.server);
                }
            }
            "connection_id" => {
                if let Some(id) = value.as_string() {
                    state.connection_id = Some(id.to_owned());
                }
            }
            "code" if state.data_type == protocol::MSG_FAILURE => {
                if let Some(code) = value.as_string() {
                    let code = code.to_owned();
                    let failure = state.ensure_failure_data();
                    if let Some(slot) = failure.value_by_key_mut("code") {
                        slot.format_as_string(&code);
                    }
                }
            }
            "message" if state.data_type == protocol::MSG_FAILURE => {
                if let Some(message) = value.as_string() {
                    let message = message.to_owned();
                    let failure = state.ensure_failure_data();
                    if let Some(slot) = failure.value_by_key_mut("message") {
                        slot.format_as_string(&message);
                    }
                }
            }
            _ => {
                state.result_metadata.insert(key, value.clone());
            }
        }
    }
}

/// Truncate to at most `max_bytes` without splitting a code point.
fn truncated(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use crate::protocol::{MSG_FAILURE, MSG_RUN, MSG_SUCCESS};
    use crate::testkit;

    #[test]
    fn test_templates() {
        let state = ProtocolState::new();
        assert_eq!(state.run.signature, MSG_RUN);
        assert_eq!(state.begin.field(0).unwrap().as_string(), Some("BEGIN"));
        assert_eq!(state.commit.field(0).unwrap().as_string(), Some("COMMIT"));
        assert_eq!(state.rollback.field(0).unwrap().as_string(), Some("ROLLBACK"));
        assert_eq!(state.pull_request.signature, crate::protocol::MSG_PULL_ALL);
        assert_eq!(state.pull_request.fields.size(), 0);
    }

    #[test]
    fn test_set_run_parameter_replaces() {
        let mut state = ProtocolState::new();
        state.set_run_parameter("x", Value::Integer(1));
        state.set_run_parameter("y", Value::Integer(2));
        state.set_run_parameter("x", Value::Integer(3));

        let parameters = state.run.field(1).unwrap();
        assert_eq!(parameters.size(), 2);
        assert_eq!(parameters.value_by_key("x"), Some(&Value::Integer(3)));
        assert_eq!(parameters.value_by_key("y"), Some(&Value::Integer(2)));

        state.clear_run();
        assert_eq!(state.run.field(1).unwrap().size(), 0);
        assert_eq!(state.run.field(0).unwrap().as_string(), Some(""));
    }

    #[test]
    fn test_begin_bookmarks() {
        let mut state = ProtocolState::new();
        state.set_begin_bookmarks(&["bm-1", "bm-2"]);
        let bookmarks = state.begin.field(1).unwrap().value_by_key("bookmarks").unwrap();
        assert_eq!(bookmarks.size(), 2);
        assert_eq!(bookmarks.list_value(1).unwrap().as_string(), Some("bm-2"));

        state.clear_begin();
        assert_eq!(state.begin.field(1).unwrap().size(), 0);
    }

    #[test]
    fn test_load_message_assigns_request_ids() {
        let log = logging::null();
        let v1 = ProtocolV1;
        let mut state = ProtocolState::new();
        let mut wire = Buffer::new(64);

        state.set_run_cypher("RETURN 1");
        let message = state.run.clone();
        let first = load_message(&message, &v1, &mut state.tx_buffer, &mut wire, &mut state.next_request_id, &log, false)
            .unwrap();
        let second = load_message(&message, &v1, &mut state.tx_buffer, &mut wire, &mut state.next_request_id, &log, false)
            .unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(state.next_request_id, 2);
        // The message buffer has been fully drained into chunks.
        assert_eq!(state.tx_buffer.unloadable(), 0);

        // Each message is framed: chunk header, body, terminator.
        let header = wire.unload_u16().unwrap();
        let body = wire.unload_pointer(usize::from(header)).unwrap().to_vec();
        assert_eq!(body[0], 0xB2);
        assert_eq!(body[1], MSG_RUN);
        assert_eq!(wire.unload_u16().unwrap(), 0);
    }

    #[test]
    fn test_load_message_rejects_unwritable() {
        let log = logging::null();
        let v1 = ProtocolV1;
        let mut state = ProtocolState::new();
        let mut wire = Buffer::new(64);

        let bogus = Message::new(MSG_SUCCESS, 0);
        let error = load_message(&bogus, &v1, &mut state.tx_buffer, &mut wire, &mut state.next_request_id, &log, false)
            .unwrap_err();
        assert_eq!(error, ProtocolError::UnsupportedType.into());
        assert_eq!(state.next_request_id, 0);
        assert_eq!(wire.unloadable(), 0);
    }

    #[test]
    fn test_unload_success_message() {
        let log = logging::null();
        let v1 = ProtocolV1;
        let mut state = ProtocolState::new();

        let metadata = Value::dictionary_of(vec![("fields", Value::list_of(vec![Value::from("x")]))]);
        state.rx_buffer.load(&testkit::message_body(MSG_SUCCESS, vec![metadata.clone()]));

        unload(&mut state, &v1, &log).unwrap();
        assert_eq!(state.data_type, MSG_SUCCESS);
        assert_eq!(state.data.list_value(0), Some(&metadata));
    }

    #[test]
    fn test_unload_rejects_non_summary_code() {
        let log = logging::null();
        let v1 = ProtocolV1;
        let mut state = ProtocolState::new();

        state.rx_buffer.load(&testkit::message_body(0x55, vec![]));
        assert_eq!(unload(&mut state, &v1, &log).unwrap_err(), ProtocolError::Violation.into());
    }

    #[test]
    fn test_extract_metadata() {
        let log = logging::null();
        let mut state = ProtocolState::new();
        state.data_type = MSG_SUCCESS;

        let metadata = Value::dictionary_of(vec![
            ("fields", Value::list_of(vec![Value::from("a"), Value::from("b")])),
            ("bookmark", Value::from("bookmark-77")),
            ("server", Value::from("GraphServer/3.4.0")),
            ("connection_id", Value::from("bolt-123")),
            ("t_first", Value::Integer(12)),
        ]);
        extract_metadata(&mut state, &metadata, &log);

        assert_eq!(state.result_field_names.size(), 2);
        assert_eq!(state.result_field_names.list_value(1).unwrap().as_string(), Some("b"));
        assert_eq!(state.last_bookmark, "bookmark-77");
        assert_eq!(state.server, "GraphServer/3.4.0");
        assert_eq!(state.connection_id.as_deref(), Some("bolt-123"));
        assert_eq!(state.result_metadata.size(), 1);
        assert_eq!(state.result_metadata.value_by_key("t_first"), Some(&Value::Integer(12)));
    }

    #[test]
    fn test_extract_metadata_truncates_bookmark() {
        let log = logging::null();
        let mut state = ProtocolState::new();
        state.data_type = MSG_SUCCESS;

        let long = "b".repeat(MAX_BOOKMARK_SIZE + 25);
        let metadata = Value::dictionary_of(vec![("bookmark", Value::from(long.as_str()))]);
        extract_metadata(&mut state, &metadata, &log);
        assert_eq!(state.last_bookmark.len(), MAX_BOOKMARK_SIZE);
    }

    #[test]
    fn test_extract_metadata_failure() {
        let log = logging::null();
        let mut state = ProtocolState::new();
        state.data_type = MSG_FAILURE;

        let metadata = Value::dictionary_of(vec![
            ("code", Value::from("Neo.ClientError.Statement.SyntaxError")),
            ("message", Value::from("Invalid input")),
        ]);
        extract_metadata(&mut state, &metadata, &log);

        let failure = state.failure_data.as_ref().unwrap();
        assert_eq!(
            failure.value_by_key("code").unwrap().as_string(),
            Some("Neo.ClientError.Statement.SyntaxError")
        );
        assert_eq!(failure.value_by_key("message").unwrap().as_string(), Some("Invalid input"));

        state.clear_failure();
        assert!(state.failure_data.is_none());
    }

    #[test]
    fn test_failure_code_ignored_on_success() {
        let log = logging::null();
        let mut state = ProtocolState::new();
        state.data_type = MSG_SUCCESS;

        let metadata = Value::dictionary_of(vec![("code", Value::from("not-a-failure"))]);
        extract_metadata(&mut state, &metadata, &log);
        assert!(state.failure_data.is_none());
        // Unrecognised on SUCCESS, so it lands in the metadata dictionary.
        assert_eq!(state.result_metadata.value_by_key("code").unwrap().as_string(), Some("not-a-failure"));
    }
}
