use crate::common::net::domain_of;
use crate::config::SecretString;
use crate::probe::{ProbeError, ProbeErrorKind, ResponseVersion};
use curl::Error as CurlError;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

// CURLINFO constants not exposed by curl-sys
// See: https://curl.se/libcurl/c/CURLINFO_HTTP_VERSION.html
// Use curl_sys::CURLINFO type for cross-platform compatibility (i32 on Windows, u32 on Unix)
const CURLINFO_LONG: curl_sys::CURLINFO = 0x200000;
const CURLINFO_HTTP_VERSION: curl_sys::CURLINFO = CURLINFO_LONG + 46;

// HTTP version codes returned by CURLINFO_HTTP_VERSION
const CURL_HTTP_VERSION_1_0: i64 = 1;
const CURL_HTTP_VERSION_1_1: i64 = 2;
const CURL_HTTP_VERSION_2_0: i64 = 3;
const CURL_HTTP_VERSION_3: i64 = 30;

pub(super) fn map_curl_error(err: &CurlError) -> ProbeError {
    let message = err.to_string();

    let kind = if err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
        ProbeErrorKind::Dns
    } else if err.is_operation_timedout() {
        ProbeErrorKind::Timeout
    } else if err.is_couldnt_connect() {
        if is_refused_message(&message) {
            ProbeErrorKind::ConnectRefused
        } else {
            ProbeErrorKind::ConnectOther
        }
    } else if err.is_ssl_connect_error()
        || err.is_ssl_cacert()
        || err.is_peer_failed_verification()
        || err.is_ssl_certproblem()
        || err.is_ssl_cipher()
        || err.is_ssl_cacert_badfile()
    {
        ProbeErrorKind::TlsHandshakeFailed
    } else if err.is_unsupported_protocol()
        || err.is_url_malformed()
        || err.is_too_many_redirects()
    {
        ProbeErrorKind::HttpProtocolError
    } else if err.is_bad_content_encoding() {
        ProbeErrorKind::Decode
    } else {
        ProbeErrorKind::IoError
    };

    ProbeError { kind, message }
}

fn is_refused_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("refused")
}

pub(super) fn saturating_sub(left: Duration, right: Duration) -> Duration {
    left.checked_sub(right).unwrap_or(Duration::from_millis(0))
}

/// Cumulative libcurl timestamps for one transfer, all measured from its start.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct TransferTimes {
    pub namelookup: Duration,
    pub connect: Duration,
    pub appconnect: Duration,
    pub pretransfer: Duration,
    pub starttransfer: Duration,
    pub total: Duration,
}

/// Per-phase durations reported under `probe_http_duration_seconds`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct PhaseTimings {
    pub resolve: Duration,
    pub connect: Duration,
    pub tls: Duration,
    pub processing: Duration,
    pub transfer: Duration,
}

impl PhaseTimings {
    pub(super) fn entries(&self) -> [(&'static str, Duration); 5] {
        [
            ("resolve", self.resolve),
            ("connect", self.connect),
            ("tls", self.tls),
            ("processing", self.processing),
            ("transfer", self.transfer),
        ]
    }
}

/// libcurl reports zero for phases that never ran (no TLS on plain HTTP,
/// connection reuse); each phase is clamped so later stamps never go negative.
pub(super) fn phase_timings(times: TransferTimes) -> PhaseTimings {
    let connect_end = times.connect.max(times.namelookup);
    let tls_end = if times.appconnect.is_zero() {
        connect_end
    } else {
        times.appconnect.max(connect_end)
    };
    let request_sent = times.pretransfer.max(tls_end);
    let first_byte = times.starttransfer.max(request_sent);
    let total = times.total.max(first_byte);

    PhaseTimings {
        resolve: times.namelookup,
        connect: saturating_sub(connect_end, times.namelookup),
        tls: saturating_sub(tls_end, connect_end),
        processing: saturating_sub(first_byte, tls_end),
        transfer: saturating_sub(total, first_byte),
    }
}

pub(super) fn fetch_http_version(handle: *mut curl_sys::CURL) -> Option<ResponseVersion> {
    if handle.is_null() {
        return None;
    }

    unsafe {
        let mut version: std::os::raw::c_long = 0;
        let rc = curl_sys::curl_easy_getinfo(
            handle,
            CURLINFO_HTTP_VERSION,
            &mut version as *mut std::os::raw::c_long,
        );

        if rc != curl_sys::CURLE_OK {
            return None;
        }

        match version as i64 {
            CURL_HTTP_VERSION_1_0 => Some(ResponseVersion::Http10),
            CURL_HTTP_VERSION_1_1 => Some(ResponseVersion::Http11),
            CURL_HTTP_VERSION_2_0 => Some(ResponseVersion::Http2),
            CURL_HTTP_VERSION_3 => Some(ResponseVersion::Http3),
            _ => None,
        }
    }
}

/// Separates a `Host` entry (any case) from the remaining request headers.
pub(super) fn split_host_header(
    headers: &HashMap<String, SecretString>,
) -> (Option<&str>, Vec<(&str, &str)>) {
    let mut host = None;
    let mut rest = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            host = Some(value.expose());
        } else {
            rest.push((name.as_str(), value.expose()));
        }
    }
    rest.sort_unstable();
    (host, rest)
}

/// A curl `--resolve` entry pinning the URL's host name to `ip`. `None` when
/// the URL already names an address.
pub(super) fn resolve_entry(url: &Url, ip: IpAddr) -> Option<String> {
    let host = domain_of(url)?;
    let port = url.port_or_known_default()?;
    Some(match ip {
        IpAddr::V4(addr) => format!("{host}:{port}:{addr}"),
        IpAddr::V6(addr) => format!("{host}:{port}:[{addr}]"),
    })
}
