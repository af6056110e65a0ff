//! PackStream, the self-describing binary serialisation used on the wire.
//! Every value starts with a marker byte whose high bits select the type
//! family and whose low bits carry either a tiny length or the width of
//! the length header that follows.

use crate::buffer::Buffer;
use crate::errors::{BoltResult, ProtocolError};
use crate::protocol::BoltProtocol;
use crate::values::Value;

const TINY_STRING: u8 = 0x80;
const TINY_LIST: u8 = 0x90;
const TINY_DICTIONARY: u8 = 0xA0;
const TINY_STRUCTURE: u8 = 0xB0;
const NULL: u8 = 0xC0;
const FLOAT_64: u8 = 0xC1;
const BOOLEAN_FALSE: u8 = 0xC2;
const BOOLEAN_TRUE: u8 = 0xC3;
const INT_8: u8 = 0xC8;
const INT_16: u8 = 0xC9;
const INT_32: u8 = 0xCA;
const INT_64: u8 = 0xCB;
const BYTES_8: u8 = 0xCC;
const BYTES_16: u8 = 0xCD;
const BYTES_32: u8 = 0xCE;
const STRING_8: u8 = 0xD0;
const STRING_16: u8 = 0xD1;
const STRING_32: u8 = 0xD2;
const LIST_8: u8 = 0xD4;
const LIST_16: u8 = 0xD5;
const LIST_32: u8 = 0xD6;
const DICTIONARY_8: u8 = 0xD8;
const DICTIONARY_16: u8 = 0xD9;
const DICTIONARY_32: u8 = 0xDA;

/// Maximum payload bytes of a single chunk on the wire.
pub const MAX_CHUNK_SIZE: usize = 65535;

/// Serialise one value into the buffer, shortest representation first.
/// Structure signatures are validated against the protocol's writable
/// allow-list.
pub fn load(buffer: &mut Buffer, value: &Value, protocol: &dyn BoltProtocol) -> BoltResult<()> {
    match value {
        Value::Null => {
            buffer.load_u8(NULL);
            Ok(())
        }
        Value::Boolean(x) => {
            buffer.load_u8(if *x { BOOLEAN_TRUE } else { BOOLEAN_FALSE });
            Ok(())
        }
        Value::Integer(x) => {
            load_integer(buffer, *x);
            Ok(())
        }
        Value::Float(x) => {
            buffer.load_u8(FLOAT_64);
            buffer.load_f64(*x);
            Ok(())
        }
        Value::String(s) => load_string(buffer, s),
        Value::Bytes(bytes) => {
            load_length_header(buffer, bytes.len(), None, BYTES_8, BYTES_16, BYTES_32)?;
            buffer.load(bytes);
            Ok(())
        }
        Value::List(items) => {
            load_length_header(buffer, items.len(), Some(TINY_LIST), LIST_8, LIST_16, LIST_32)?;
            for item in items {
                load(buffer, item, protocol)?;
            }
            Ok(())
        }
        Value::Dictionary(entries) => {
            load_length_header(
                buffer,
                entries.len(),
                Some(TINY_DICTIONARY),
                DICTIONARY_8,
                DICTIONARY_16,
                DICTIONARY_32,
            )?;
            for (key, entry_value) in entries {
                load_string(buffer, key)?;
                load(buffer, entry_value, protocol)?;
            }
            Ok(())
        }
        Value::Structure { signature, fields } => {
            if !protocol.check_writable_struct(*signature) {
                return Err(ProtocolError::UnsupportedType.into());
            }
            load_structure_header(buffer, *signature, fields.len())?;
            for field in fields {
                load(buffer, field, protocol)?;
            }
            Ok(())
        }
    }
}

/// Structure marker + signature byte. Structures are tiny-only: at most
/// 15 fields.
pub fn load_structure_header(buffer: &mut Buffer, signature: u8, size: usize) -> BoltResult<()> {
    if size > 15 {
        return Err(ProtocolError::UnsupportedType.into());
    }
    buffer.load_u8(TINY_STRUCTURE | size as u8);
    buffer.load_u8(signature);
    Ok(())
}

/// Integers in -16..=127 must take the one-byte tiny form.
fn load_integer(buffer: &mut Buffer, x: i64) {
    if (-16..=127).contains(&x) {
        buffer.load_i8(x as i8);
    } else if i64::from(x as i8) == x {
        buffer.load_u8(INT_8);
        buffer.load_i8(x as i8);
    } else if i64::from(x as i16) == x {
        buffer.load_u8(INT_16);
        buffer.load_i16(x as i16);
    } else if i64::from(x as i32) == x {
        buffer.load_u8(INT_32);
        buffer.load_i32(x as i32);
    } else {
        buffer.load_u8(INT_64);
        buffer.load_i64(x);
    }
}

fn load_string(buffer: &mut Buffer, s: &str) -> BoltResult<()> {
    load_length_header(buffer, s.len(), Some(TINY_STRING), STRING_8, STRING_16, STRING_32)?;
    buffer.load(s.as_bytes());
    Ok(())
}

/// Shortest length header for a sized family. `tiny` is absent for byte
/// arrays, which have no tiny form.
fn load_length_header(
    buffer: &mut Buffer,
    length: usize,
    tiny: Option<u8>,
    marker_8: u8,
    marker_16: u8,
    marker_32: u8,
) -> BoltResult<()> {
    match tiny {
        Some(tiny_marker) if length <= 15 => {
            buffer.load_u8(tiny_marker | length as u8);
            return Ok(());
        }
        _ => {}
    }
    if length <= 255 {
        buffer.load_u8(marker_8);
        buffer.load_u8(length as u8);
    } else if length <= 65535 {
        buffer.load_u8(marker_16);
        buffer.load_u16(length as u16);
    } else if length <= i32::max_value() as usize {
        buffer.load_u8(marker_32);
        buffer.load_i32(length as i32);
    } else {
        return Err(ProtocolError::UnsupportedType.into());
    }
    Ok(())
}

/// Deserialise one value. Any valid representation is accepted; unknown
/// markers are rejected, as are structure signatures outside the
/// protocol's readable allow-list.
pub fn unload(buffer: &mut Buffer, protocol: &dyn BoltProtocol) -> BoltResult<Value> {
    let marker = buffer.unload_u8()?;
    match marker {
        0x00..=0x7F => Ok(Value::Integer(i64::from(marker))),
        0xF0..=0xFF => Ok(Value::Integer(i64::from(marker as i8))),
        0x80..=0x8F => unload_string(buffer, usize::from(marker & 0x0F)),
        0x90..=0x9F => unload_list(buffer, usize::from(marker & 0x0F), protocol),
        0xA0..=0xAF => unload_dictionary(buffer, usize::from(marker & 0x0F), protocol),
        0xB0..=0xBF => unload_structure(buffer, usize::from(marker & 0x0F), protocol),
        NULL => Ok(Value::Null),
        FLOAT_64 => Ok(Value::Float(buffer.unload_f64()?)),
        BOOLEAN_FALSE => Ok(Value::Boolean(false)),
        BOOLEAN_TRUE => Ok(Value::Boolean(true)),
        INT_8 => Ok(Value::Integer(i64::from(buffer.unload_i8()?))),
        INT_16 => Ok(Value::Integer(i64::from(buffer.unload_i16()?))),
        INT_32 => Ok(Value::Integer(i64::from(buffer.unload_i32()?))),
        INT_64 => Ok(Value::Integer(buffer.unload_i64()?)),
        BYTES_8 => {
            let length = usize::from(buffer.unload_u8()?);
            unload_bytes(buffer, length)
        }
        BYTES_16 => {
            let length = usize::from(buffer.unload_u16()?);
            unload_bytes(buffer, length)
        }
        BYTES_32 => {
            let length = unload_length_32(buffer)?;
            unload_bytes(buffer, length)
        }
        STRING_8 => {
            let length = usize::from(buffer.unload_u8()?);
            unload_string(buffer, length)
        }
        STRING_16 => {
            let length = usize::from(buffer.unload_u16()?);
            unload_string(buffer, length)
        }
        STRING_32 => {
            let length = unload_length_32(buffer)?;
            unload_string(buffer, length)
        }
        LIST_8 => {
            let length = usize::from(buffer.unload_u8()?);
            unload_list(buffer, length, protocol)
        }
        LIST_16 => {
            let length = usize::from(buffer.unload_u16()?);
            unload_list(buffer, length, protocol)
        }
        LIST_32 => {
            let length = unload_length_32(buffer)?;
            unload_list(buffer, length, protocol)
        }
        DICTIONARY_8 => {
            let length = usize::from(buffer.unload_u8()?);
            unload_dictionary(buffer, length, protocol)
        }
        DICTIONARY_16 => {
            let length = usize::from(buffer.unload_u16()?);
            unload_dictionary(buffer, length, protocol)
        }
        DICTIONARY_32 => {
            let length = unload_length_32(buffer)?;
            unload_dictionary(buffer, length, protocol)
        }
        _ => Err(ProtocolError::UnexpectedMarker(marker).into()),
    }
}

fn unload_length_32(buffer: &mut Buffer) -> BoltResult<usize> {
    let length = buffer.unload_i32()?;
    if length < 0 {
        return Err(ProtocolError::Violation.into());
    }
    Ok(length as usize)
}

fn unload_string(buffer: &mut Buffer, length: usize) -> BoltResult<Value> {
    let span = buffer.unload_pointer(length).ok_or(ProtocolError::Underflow)?;
    let s = std::str::from_utf8(span).map_err(|_| ProtocolError::Violation)?;
    Ok(Value::String(s.to_owned()))
}

fn unload_bytes(buffer: &mut Buffer, length: usize) -> BoltResult<Value> {
    let span = buffer.unload_pointer(length).ok_or(ProtocolError::Underflow)?;
    Ok(Value::Bytes(span.to_vec()))
}

fn unload_list(buffer: &mut Buffer, length: usize, protocol: &dyn BoltProtocol) -> BoltResult<Value> {
    let mut items = Vec::with_capacity(length);
    for _ in 0..length {
        items.push(unload(buffer, protocol)?);
    }
    Ok(Value::List(items))
}

fn unload_dictionary(buffer: &mut Buffer, length: usize, protocol: &dyn BoltProtocol) -> BoltResult<Value> {
    let mut entries = Vec::with_capacity(length);
    for _ in 0..length {
        let key = match unload(buffer, protocol)? {
            Value::String(key) => key,
            _ => return Err(ProtocolError::Violation.into()),
        };
        entries.push((key, unload(buffer, protocol)?));
    }
    Ok(Value::Dictionary(entries))
}

fn unload_structure(buffer: &mut Buffer, length: usize, protocol: &dyn BoltProtocol) -> BoltResult<Value> {
    let signature = buffer.unload_u8()?;
    if !protocol.check_readable_struct(signature) {
        return Err(ProtocolError::Violation.into());
    }
    let mut fields = Vec::with_capacity(length);
    for _ in 0..length {
        fields.push(unload(buffer, protocol)?);
    }
    Ok(Value::Structure { signature, fields })
}

/// Move a complete message body from the message buffer into the wire
/// buffer, splitting it into chunks of at most [`MAX_CHUNK_SIZE`] bytes
/// and appending the zero-length terminator.
pub fn enqueue(message: &mut Buffer, wire: &mut Buffer) {
    let mut remaining = message.unloadable();
    while remaining > 0 {
        let chunk = remaining.min(MAX_CHUNK_SIZE);
        wire.load_u16(chunk as u16);
        let data = message.unload_pointer(chunk).expect("Chunk exceeds buffered message");
        wire.load(data);
        remaining -= chunk;
    }
    wire.load_u16(0);
    message.compact();
}
