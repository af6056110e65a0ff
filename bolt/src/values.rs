use crate::protocol::BoltProtocol;
use std::fmt;
use std::fmt::Write;

/// Tagged recursive value container. This is the unit of data exchanged
/// with the server: message fields, query parameters and result records
/// are all `Value` trees.
///
/// Containers own their children outright; the grammar has no
/// back-references, so trees are cycle free by construction and `Clone`
/// and `PartialEq` recurse safely.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered entry sequence. Duplicate keys are permitted on the wire;
    /// lookups resolve to the first match in insertion order.
    Dictionary(Vec<(String, Value)>),
    /// Composite with a protocol-interpreted signature byte.
    Structure { signature: u8, fields: Vec<Value> },
}

impl Default for Value {
    #[inline]
    fn default() -> Value {
        Value::Null
    }
}

impl Value {
    /// Element count for containers, byte length for strings, 1 for
    /// scalars and 0 for null.
    pub fn size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => 1,
            Value::String(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::List(items) => items.len(),
            Value::Dictionary(entries) => entries.len(),
            Value::Structure { fields, .. } => fields.len(),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// In-place reformatting. Assigning a new variant drops the children of
/// the previous one.
impl Value {
    #[inline]
    pub fn format_as_null(&mut self) {
        *self = Value::Null;
    }

    #[inline]
    pub fn format_as_boolean(&mut self, value: bool) {
        *self = Value::Boolean(value);
    }

    #[inline]
    pub fn format_as_integer(&mut self, value: i64) {
        *self = Value::Integer(value);
    }

    #[inline]
    pub fn format_as_float(&mut self, value: f64) {
        *self = Value::Float(value);
    }

    #[inline]
    pub fn format_as_string(&mut self, value: &str) {
        *self = Value::String(value.to_owned());
    }

    #[inline]
    pub fn format_as_bytes(&mut self, value: &[u8]) {
        *self = Value::Bytes(value.to_vec());
    }

    /// Reformat as a list of `size` null elements.
    #[inline]
    pub fn format_as_list(&mut self, size: usize) {
        *self = Value::List(vec![Value::Null; size]);
    }

    /// Reformat as a dictionary of `size` empty-keyed null entries; keys
    /// are filled in with `set_key`.
    #[inline]
    pub fn format_as_dictionary(&mut self, size: usize) {
        *self = Value::Dictionary(vec![(String::new(), Value::Null); size]);
    }

    /// Reformat as a structure of `size` null fields.
    #[inline]
    pub fn format_as_structure(&mut self, signature: u8, size: usize) {
        *self = Value::Structure { signature, fields: vec![Value::Null; size] };
    }
}

/// Variant accessors. Reading the wrong variant yields `None`.
impl Value {
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(value) => Some(value.as_slice()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn as_entries(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Dictionary(entries) => Some(entries.as_slice()),
            _ => None,
        }
    }

    #[inline]
    pub fn signature(&self) -> Option<u8> {
        match self {
            Value::Structure { signature, .. } => Some(*signature),
            _ => None,
        }
    }

    #[inline]
    pub fn fields(&self) -> Option<&[Value]> {
        match self {
            Value::Structure { fields, .. } => Some(fields.as_slice()),
            _ => None,
        }
    }

    #[inline]
    pub fn fields_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Structure { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

/// List and structure element access.
impl Value {
    #[inline]
    pub fn list_value(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            Value::Structure { fields, .. } => fields.get(index),
            _ => None,
        }
    }

    #[inline]
    pub fn list_value_mut(&mut self, index: usize) -> Option<&mut Value> {
        match self {
            Value::List(items) => items.get_mut(index),
            Value::Structure { fields, .. } => fields.get_mut(index),
            _ => None,
        }
    }

    /// Resize a list or dictionary. Elements beyond the new size are
    /// dropped; new elements are null.
    pub fn resize(&mut self, size: usize) -> bool {
        match self {
            Value::List(items) => {
                items.resize(size, Value::Null);
                true
            }
            Value::Dictionary(entries) => {
                entries.resize(size, (String::new(), Value::Null));
                true
            }
            _ => false,
        }
    }
}

/// Dictionary operations.
impl Value {
    /// Index of the first entry with `key` at or after `from_index`.
    pub fn get_key_index(&self, key: &str, from_index: usize) -> Option<usize> {
        match self {
            Value::Dictionary(entries) => entries
                .iter()
                .enumerate()
                .skip(from_index)
                .find(|(_, (entry_key, _))| entry_key == key)
                .map(|(index, _)| index),
            _ => None,
        }
    }

    /// First-match lookup by key.
    pub fn value_by_key(&self, key: &str) -> Option<&Value> {
        let index = self.get_key_index(key, 0)?;
        self.dictionary_value(index)
    }

    pub fn value_by_key_mut(&mut self, key: &str) -> Option<&mut Value> {
        let index = self.get_key_index(key, 0)?;
        self.dictionary_value_mut(index)
    }

    #[inline]
    pub fn key(&self, index: usize) -> Option<&str> {
        match self {
            Value::Dictionary(entries) => entries.get(index).map(|(key, _)| key.as_str()),
            _ => None,
        }
    }

    pub fn set_key(&mut self, index: usize, key: &str) -> bool {
        match self {
            Value::Dictionary(entries) => match entries.get_mut(index) {
                Some(entry) => {
                    entry.0 = key.to_owned();
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    #[inline]
    pub fn dictionary_value(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Dictionary(entries) => entries.get(index).map(|(_, value)| value),
            _ => None,
        }
    }

    #[inline]
    pub fn dictionary_value_mut(&mut self, index: usize) -> Option<&mut Value> {
        match self {
            Value::Dictionary(entries) => entries.get_mut(index).map(|(_, value)| value),
            _ => None,
        }
    }

    /// Append an entry. Duplicate keys are permitted; lookup keeps
    /// resolving to the first match.
    pub fn insert(&mut self, key: &str, value: Value) -> bool {
        match self {
            Value::Dictionary(entries) => {
                entries.push((key.to_owned(), value));
                true
            }
            _ => false,
        }
    }
}

/// Construction conveniences.
impl Value {
    pub fn list_of(items: Vec<Value>) -> Value {
        Value::List(items)
    }

    pub fn dictionary_of(entries: Vec<(&str, Value)>) -> Value {
        Value::Dictionary(entries.into_iter().map(|(key, value)| (key.to_owned(), value)).collect())
    }

    pub fn structure_of(signature: u8, fields: Vec<Value>) -> Value {
        Value::Structure { signature, fields }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::List(items)
    }
}

/// Printable rendering of a value, optionally naming structures through a
/// protocol.
pub struct ValueDisplay<'a> {
    value: &'a Value,
    protocol: Option<&'a dyn BoltProtocol>,
}

impl Value {
    /// Renderer that resolves structure signatures to the protocol's
    /// names (`$Node(…)` instead of `$#4E(…)`).
    pub fn display<'a>(&'a self, protocol: Option<&'a dyn BoltProtocol>) -> ValueDisplay<'a> {
        ValueDisplay { value: self, protocol }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_value(f, self, None)
    }
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_value(f, self.value, self.protocol)
    }
}

fn write_value(f: &mut fmt::Formatter, value: &Value, protocol: Option<&dyn BoltProtocol>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Boolean(true) => f.write_str("true"),
        Value::Boolean(false) => f.write_str("false"),
        Value::Integer(i) => write!(f, "{}", i),
        Value::Float(x) => write!(f, "{:?}", x),
        Value::String(s) => write_escaped_string(f, s),
        Value::Bytes(bytes) => {
            f.write_char('#')?;
            for (i, byte) in bytes.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write!(f, "{:02X}", byte)?;
            }
            Ok(())
        }
        Value::List(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_value(f, item, protocol)?;
            }
            f.write_char(']')
        }
        Value::Dictionary(entries) => {
            f.write_char('{')?;
            for (i, (key, entry_value)) in entries.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_escaped_string(f, key)?;
                f.write_str(": ")?;
                write_value(f, entry_value, protocol)?;
            }
            f.write_char('}')
        }
        Value::Structure { signature, fields } => {
            match protocol.and_then(|p| p.structure_name(*signature)) {
                Some(name) => write!(f, "${}", name)?,
                None => write!(f, "$#{:02X}", signature)?,
            }
            f.write_char('(')?;
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write_value(f, field, protocol)?;
            }
            f.write_char(')')
        }
    }
}

/// Quoted string with non-printable code points escaped as `\uXXXX` (BMP)
/// or `\UXXXXXXXX`.
fn write_escaped_string(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        let code = ch as u32;
        if ch != '"' && (0x20..=0x7E).contains(&code) {
            f.write_char(ch)?;
        } else if code < 0x10000 {
            write!(f, "\\u{:04X}", code)?;
        } else {
            write!(f, "\\U{:08X}", code)?;
        }
    }
    f.write_char('"')
}
