//! Custom filters for manifest templating
//!
//! - `default`: fallback for undefined values
//! - `b64enc` / `b64dec`: base64 encode/decode
//! - `quote` / `squote`: wrap in double/single quotes
//! - `upper` / `lower` / `title`: case conversion

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use minijinja::{Error, ErrorKind, Value};

/// Returns the fallback when the value is undefined or none
pub fn default_filter(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

/// Base64 encode
pub fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Base64 decode
pub fn b64dec(value: &str) -> Result<String, Error> {
    let bytes = STANDARD.decode(value).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {e}"))
    })?;
    String::from_utf8(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode produced invalid UTF-8: {e}"),
        )
    })
}

/// Wrap in double quotes
pub fn quote(value: &str) -> String {
    format!("\"{value}\"")
}

/// Wrap in single quotes
pub fn squote(value: &str) -> String {
    format!("'{value}'")
}

/// Upper case
pub fn upper(value: &str) -> String {
    value.to_uppercase()
}

/// Lower case
pub fn lower(value: &str) -> String {
    value.to_lowercase()
}

/// Title case: first letter of each whitespace-separated word upper-cased
pub fn title(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_prefers_present_values() {
        assert_eq!(
            default_filter(Value::from("set"), Value::from("fallback")).to_string(),
            "set"
        );
        assert_eq!(
            default_filter(Value::UNDEFINED, Value::from("fallback")).to_string(),
            "fallback"
        );
    }

    #[test]
    fn default_filter_keeps_empty_string() {
        // Empty string is a value, not an absence
        assert_eq!(default_filter(Value::from(""), Value::from("x")).to_string(), "");
    }

    #[test]
    fn base64_round_trip() {
        let encoded = b64enc("10.21.0.1");
        assert_eq!(b64dec(&encoded).unwrap(), "10.21.0.1");
    }

    #[test]
    fn b64dec_rejects_garbage() {
        assert!(b64dec("!!not base64!!").is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("cluster.local"), "\"cluster.local\"");
        assert_eq!(squote("cluster.local"), "'cluster.local'");
    }

    #[test]
    fn case_conversion() {
        assert_eq!(upper("coredns"), "COREDNS");
        assert_eq!(lower("CoreDNS"), "coredns");
        assert_eq!(title("kube state metrics"), "Kube State Metrics");
    }
}
