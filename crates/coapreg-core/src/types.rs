//! Transport-neutral message types.
//!
//! The registration workflow reasons about methods, message kinds and
//! response codes only. Encoding these to and from the wire is the job of
//! the transport adapter, so nothing in here depends on a CoAP codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// CoAP message kind (RFC 7252 section 3, `T` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageKind {
    /// Whether the sender expects an acknowledgement.
    pub fn is_confirmable(&self) -> bool {
        matches!(self, MessageKind::Confirmable)
    }
}

/// Request method codes (class 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    /// Any other method detail (FETCH, PATCH, ...) or an unknown one.
    Other(u8),
}

impl Method {
    /// Maps a raw code byte of class 0 to a method.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Method::Get,
            0x02 => Method::Post,
            0x03 => Method::Put,
            0x04 => Method::Delete,
            other => Method::Other(other),
        }
    }

    /// Raw code byte.
    pub fn code(&self) -> u8 {
        match self {
            Method::Get => 0x01,
            Method::Post => 0x02,
            Method::Put => 0x03,
            Method::Delete => 0x04,
            Method::Other(code) => *code,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
            Method::Other(code) => write!(f, "0.{:02}", code & 0x1f),
        }
    }
}

/// Response code, stored as the raw `c.dd` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseCode(u8);

impl ResponseCode {
    pub const CONTENT: ResponseCode = ResponseCode::new(2, 5);
    pub const NOT_FOUND: ResponseCode = ResponseCode::new(4, 4);
    pub const METHOD_NOT_ALLOWED: ResponseCode = ResponseCode::new(4, 5);

    /// Builds a code from its class and detail (`4.04` is `new(4, 4)`).
    pub const fn new(class: u8, detail: u8) -> Self {
        Self(((class & 0x07) << 5) | (detail & 0x1f))
    }

    /// Wraps a raw code byte.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub const fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    /// 2.xx codes.
    pub const fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// An inbound request as seen by the registration listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub kind: MessageKind,
    pub method: Method,
    /// Absolute path assembled from the Uri-Path options, e.g. `/here_i_am`.
    pub path: String,
    pub source: SocketAddr,
}

impl InboundRequest {
    pub fn new(
        kind: MessageKind,
        method: Method,
        path: impl Into<String>,
        source: SocketAddr,
    ) -> Self {
        Self {
            kind,
            method,
            path: path.into(),
            source,
        }
    }
}

/// Reply produced synchronously for an inbound request.
///
/// The transport sends it piggybacked on an ACK for confirmable requests and
/// as a non-confirmable message otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ResponseCode,
    pub payload: Bytes,
}

impl Reply {
    /// Reply without payload.
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }
}

/// Response to a `/.well-known/core` discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub code: ResponseCode,
    /// Content-Format option, 40 for `application/link-format`.
    pub content_format: Option<u16>,
    pub payload: Bytes,
}

impl DiscoveryResponse {
    /// Content-Format number of `application/link-format`.
    pub const LINK_FORMAT: u16 = 40;

    pub fn new(code: ResponseCode, content_format: Option<u16>, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            content_format,
            payload: payload.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
