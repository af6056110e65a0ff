//! Test fixtures: an in-memory scripted stream, canned server message
//! builders, and a TCP stub server that speaks just enough of the wire
//! protocol to exercise pools end to end.

use crate::buffer::Buffer;
use crate::packstream;
use crate::protocol::{self, BoltProtocol};
use crate::transport::{Stream, Transport};
use crate::values::Value;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use slog::Logger;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Protocol stand-in that accepts every structure signature. Used to
/// build server-side fixtures (the client-side protocols refuse to
/// encode SUCCESS and friends).
pub(crate) struct Permissive;

impl BoltProtocol for Permissive {
    fn version(&self) -> u32 {
        1
    }

    fn message_name(&self, _signature: u8) -> Option<&'static str> {
        None
    }

    fn structure_name(&self, _signature: u8) -> Option<&'static str> {
        None
    }

    fn check_readable_struct(&self, _signature: u8) -> bool {
        true
    }

    fn check_writable_struct(&self, _signature: u8) -> bool {
        true
    }
}

/// In-memory stream: reads from a canned script, captures writes.
pub(crate) struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().expect("Scripted output lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for ScriptedStream {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A transport over a scripted stream, plus a handle on everything the
/// client writes.
pub(crate) fn scripted_transport(script: Vec<u8>) -> (Transport, Arc<Mutex<Vec<u8>>>) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let stream = ScriptedStream { input: Cursor::new(script), output: output.clone() };
    (Transport::from_stream(Box::new(stream)), output)
}

/// Server handshake reply selecting `version`.
pub(crate) fn handshake_reply(version: u32) -> Vec<u8> {
    let mut reply = [0u8; 4];
    BigEndian::write_u32(&mut reply, version);
    reply.to_vec()
}

/// Raw (unchunked) message body.
pub(crate) fn message_body(signature: u8, fields: Vec<Value>) -> Vec<u8> {
    let mut buffer = Buffer::new(256);
    packstream::load_structure_header(&mut buffer, signature, fields.len()).expect("Fixture structure header");
    for field in &fields {
        packstream::load(&mut buffer, field, &Permissive).expect("Fixture field encoding");
    }
    drain(&mut buffer)
}

/// A complete chunked message as it appears on the wire.
pub(crate) fn message(signature: u8, fields: Vec<Value>) -> Vec<u8> {
    let mut body = Buffer::new(256);
    body.load(&message_body(signature, fields));
    let mut wire = Buffer::new(256);
    packstream::enqueue(&mut body, &mut wire);
    drain(&mut wire)
}

pub(crate) fn success(metadata: Value) -> Vec<u8> {
    message(protocol::MSG_SUCCESS, vec![metadata])
}

pub(crate) fn record(values: Vec<Value>) -> Vec<u8> {
    message(protocol::MSG_RECORD, vec![Value::list_of(values)])
}

pub(crate) fn failure(code: &str, text: &str) -> Vec<u8> {
    message(
        protocol::MSG_FAILURE,
        vec![Value::dictionary_of(vec![("code", Value::from(code)), ("message", Value::from(text))])],
    )
}

pub(crate) fn ignored() -> Vec<u8> {
    message(protocol::MSG_IGNORED, vec![])
}

fn drain(buffer: &mut Buffer) -> Vec<u8> {
    let size = buffer.unloadable();
    buffer.unload_pointer(size).expect("Fixture buffer drained twice").to_vec()
}

/// A capturing slog logger; every record is rendered to one line in the
/// shared vector.
pub(crate) fn capturing_logger(lines: &Arc<Mutex<Vec<String>>>) -> Logger {
    Logger::root(CaptureDrain { lines: lines.clone() }, slog::o!())
}

struct CaptureDrain {
    lines: Arc<Mutex<Vec<String>>>,
}

impl slog::Drain for CaptureDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &slog::Record, values: &slog::OwnedKVList) -> Result<(), slog::Never> {
        use slog::KV;

        let mut line = format!("{}", record.msg());
        let mut serializer = LineSerializer(&mut line);
        let _ = record.kv().serialize(record, &mut serializer);
        let _ = values.serialize(record, &mut serializer);
        self.lines.lock().expect("Capture lock poisoned").push(line);
        Ok(())
    }
}

struct LineSerializer<'a>(&'a mut String);

impl slog::Serializer for LineSerializer<'_> {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments) -> slog::Result {
        use std::fmt::Write;
        write!(self.0, " {}={}", key, val).map_err(|_| slog::Error::Other)
    }
}

/// Per-connection stub script: the byte blob to send back after each
/// complete client message.
pub(crate) type ConnectionScript = Vec<Vec<u8>>;

/// TCP server that accepts one connection per script, answers the
/// handshake with `version`, then replies to each client message with
/// the next scripted blob.
pub(crate) struct StubServer {
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    pub(crate) fn start(version: u32, scripts: Vec<ConnectionScript>) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Stub server bind");
        let port = listener.local_addr().expect("Stub server address").port();

        let handle = thread::spawn(move || {
            for script in scripts {
                let (stream, _) = match listener.accept() {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let _ = serve_connection(stream, version, script);
            }
        });

        StubServer { port, handle: Some(handle) }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn address(&self) -> crate::addressing::Address {
        crate::addressing::Address::new("127.0.0.1", &self.port.to_string())
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_connection(mut stream: TcpStream, version: u32, script: ConnectionScript) -> io::Result<()> {
    let mut handshake = [0u8; 20];
    stream.read_exact(&mut handshake)?;
    stream.write_u32::<BigEndian>(version)?;

    for reply in script {
        // One complete client message: chunks until the terminator.
        loop {
            let chunk_size = stream.read_u16::<BigEndian>()?;
            if chunk_size == 0 {
                break;
            }
            let mut chunk = vec![0u8; usize::from(chunk_size)];
            stream.read_exact(&mut chunk)?;
        }
        stream.write_all(&reply)?;
    }

    Ok(())
}
