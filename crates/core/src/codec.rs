//! String codec for mediums that only hold text.
//!
//! `decode` never fails loudly: malformed input comes back as `None`, which
//! callers treat exactly like a missing key.

use crate::StoredValue;

/// Serialize a value to its stored JSON text.
pub fn encode(value: &StoredValue) -> String {
    // Serializing a `Value` into a string cannot fail: every map key is a string.
    value.to_string()
}

/// Parse stored JSON text, or `None` when it is not valid JSON.
pub fn decode(raw: &str) -> Option<StoredValue> {
    serde_json::from_str(raw).ok()
}

/// Percent-encode a string for use inside a cookie value or file name.
pub fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Reverse [`encode_component`].
pub fn decode_component(s: &str) -> String {
    // A lone `=` is a pair separator for the form parser; it never appears in
    // our own output because `byte_serialize` escapes it.
    url::form_urlencoded::parse(s.as_bytes())
        .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{}={}", k, v) })
        .collect::<Vec<_>>()
        .join("&")
}
