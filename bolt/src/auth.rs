//! Authentication token construction. Tokens travel as the second INIT
//! field; the `credentials` entry is masked before any token reaches a
//! logger.

use crate::values::Value;

pub const SCHEME_KEY: &str = "scheme";
pub const PRINCIPAL_KEY: &str = "principal";
pub const CREDENTIALS_KEY: &str = "credentials";

/// Replacement for the credentials entry in logged copies.
pub const MASKED_CREDENTIALS: &str = "********";

/// Basic authentication with principal and credentials.
pub fn basic(principal: &str, credentials: &str) -> Value {
    Value::dictionary_of(vec![
        (SCHEME_KEY, Value::from("basic")),
        (PRINCIPAL_KEY, Value::from(principal)),
        (CREDENTIALS_KEY, Value::from(credentials)),
    ])
}

/// Empty token for servers that do not require authentication.
pub fn none() -> Value {
    Value::dictionary_of(vec![])
}

/// A copy of the token safe to hand to a logger. The returned value
/// shares no storage with the original, so masking cannot leak into the
/// bytes that go on the wire.
pub fn masked(token: &Value) -> Value {
    let mut masked = token.clone();
    if let Some(credentials) = masked.value_by_key_mut(CREDENTIALS_KEY) {
        credentials.format_as_string(MASKED_CREDENTIALS);
    }
    masked
}
