use crate::config::IpProtocol;
use std::fmt;
use std::io;
use std::net::IpAddr;
use thiserror::Error;

pub const STATUS_OK: u16 = 200;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Destination for a finished probe: rendered metric text plus a status code.
pub trait ProbeSink {
    fn set_status(&mut self, code: u16);
    fn write_text(&mut self, text: &str);
}

/// In-memory sink, mostly for tests and the one-shot CLI.
#[derive(Clone, Debug)]
pub struct ResponseRecorder {
    pub status: u16,
    pub body: String,
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self {
            status: STATUS_OK,
            body: String::new(),
        }
    }
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProbeSink for ResponseRecorder {
    fn set_status(&mut self, code: u16) {
        self.status = code;
    }

    fn write_text(&mut self, text: &str) {
        self.body.push_str(text);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResponseVersion {
    Http10,
    Http11,
    Http2,
    Http3,
}

impl ResponseVersion {
    pub fn label(self) -> &'static str {
        match self {
            ResponseVersion::Http10 => "HTTP/1.0",
            ResponseVersion::Http11 => "HTTP/1.1",
            ResponseVersion::Http2 => "HTTP/2.0",
            ResponseVersion::Http3 => "HTTP/3.0",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "HTTP/1.0" => Some(ResponseVersion::Http10),
            "HTTP/1.1" => Some(ResponseVersion::Http11),
            "HTTP/2" | "HTTP/2.0" => Some(ResponseVersion::Http2),
            "HTTP/3" | "HTTP/3.0" => Some(ResponseVersion::Http3),
            _ => None,
        }
    }

    /// Major.minor encoded as a number: 1, 1.1, 2, 3.
    pub fn gauge_value(self) -> f64 {
        match self {
            ResponseVersion::Http10 => 1.0,
            ResponseVersion::Http11 => 1.1,
            ResponseVersion::Http2 => 2.0,
            ResponseVersion::Http3 => 3.0,
        }
    }
}

impl fmt::Display for ResponseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub protocol: IpProtocol,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup returned empty list of addresses")]
    Empty,
    #[error("lookup of {host} timed out")]
    Timeout { host: String },
    #[error("lookup of {host} was cancelled")]
    Cancelled { host: String },
    #[error("lookup of {host} failed: {source}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProbeErrorKind {
    InvalidTarget,
    Dns,
    ConnectRefused,
    ConnectOther,
    Timeout,
    TlsHandshakeFailed,
    Cancelled,
    BodyTooLarge,
    HttpProtocolError,
    Decode,
    IoError,
}

impl ProbeErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeErrorKind::InvalidTarget => "invalid_target",
            ProbeErrorKind::Dns => "dns",
            ProbeErrorKind::ConnectRefused => "connect_refused",
            ProbeErrorKind::ConnectOther => "connect_other",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::TlsHandshakeFailed => "tls_handshake_failed",
            ProbeErrorKind::Cancelled => "cancelled",
            ProbeErrorKind::BodyTooLarge => "body_too_large",
            ProbeErrorKind::HttpProtocolError => "http_protocol_error",
            ProbeErrorKind::Decode => "decode",
            ProbeErrorKind::IoError => "io_error",
        }
    }
}

#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
