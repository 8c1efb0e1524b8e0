//! ==============================================================================
//! http.rs - hand-built update request
//! ==============================================================================
//!
//! purpose:
//!     formats the `POST /update` request the telemetry endpoint expects,
//!     without an http library. pure: no i/o, same input -> same bytes.
//!
//! wire format:
//!
//!     POST /update HTTP/1.1
//!     Host: <host>
//!     THINGSPEAKAPIKEY: <write key>
//!     Content-Length: <body bytes>
//!
//!     field1=612&status=Someone is in your room!!!
//!
//! the body is NOT url-encoded. keys and values go out exactly as given, which
//! is what the device firmware always sent and what the endpoint accepts.
//! callers must not put `&` or `=` inside values.
//!
//! ==============================================================================

use std::fmt;

/// resource every update is posted to
pub const UPDATE_PATH: &str = "/update";

/// header carrying the channel write key
pub const API_KEY_HEADER: &str = "THINGSPEAKAPIKEY";

/// ordered key/value pairs that make up one update body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPayload {
    pairs: Vec<(String, String)>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// number of fields
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// `k1=v1&k2=v2`, in insertion order
    pub fn serialize(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// a complete request, ready to be written to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    bytes: Vec<u8>,
    body_len: usize,
}

impl HttpRequest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[cfg(test)]
    pub fn body(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - self.body_len..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Build the update request for `payload`.
///
/// `Content-Length` is the body's byte length, so multi-byte values are
/// counted correctly.
pub fn build_request(host: &str, api_key: &str, payload: &UploadPayload) -> HttpRequest {
    let body = payload.serialize();

    let mut text = String::with_capacity(128 + body.len());
    text.push_str(&format!("POST {} HTTP/1.1\r\n", UPDATE_PATH));
    text.push_str(&format!("Host: {}\r\n", host));
    text.push_str(&format!("{}: {}\r\n", API_KEY_HEADER, api_key));
    text.push_str(&format!("Content-Length: {}\r\n", body.len()));
    text.push_str("\r\n");
    text.push_str(&body);

    HttpRequest {
        bytes: text.into_bytes(),
        body_len: body.len(),
    }
}
