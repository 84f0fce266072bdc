use super::helpers::{
    TransferTimes, fetch_http_version, map_curl_error, resolve_entry, split_host_header,
};
use crate::common::time::{CancelToken, ProbeContext};
use crate::config::HttpProbeConfig;
use crate::features::probe::validate::parse_header_line;
use crate::probe::{ProbeError, ProbeErrorKind, ResponseVersion};
use curl::Error as CurlError;
use curl::easy::{Easy2, Handler, List, WriteError};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use url::Url;

const MAX_REDIRECTS: u32 = 10;
const USER_AGENT: &str = concat!("blackprobe/", env!("CARGO_PKG_VERSION"));

#[derive(Default)]
struct BodyCollector {
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    bytes: u64,
    limit: u64,
    limit_reached: bool,
    cancel: CancelToken,
    deadline: Option<Instant>,
    interrupted: Option<ProbeErrorKind>,
}

impl BodyCollector {
    fn reset(&mut self, limit: u64, ctx: &ProbeContext) {
        self.body.clear();
        self.headers.clear();
        self.bytes = 0;
        self.limit = limit;
        self.limit_reached = false;
        self.cancel = ctx.cancel_token().clone();
        self.deadline = Some(ctx.deadline());
        self.interrupted = None;
    }
}

impl Handler for BodyCollector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let len = data.len() as u64;
        let take = if self.limit == 0 {
            len
        } else {
            let remaining = self.limit.saturating_sub(self.bytes);
            if len > remaining {
                self.limit_reached = true;
            }
            len.min(remaining)
        };

        self.body.extend_from_slice(&data[..take as usize]);
        self.bytes = self.bytes.saturating_add(take);

        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        // Each hop of a redirect chain starts with a fresh status line.
        if data.starts_with(b"HTTP/") {
            self.headers.clear();
            self.body.clear();
            self.bytes = 0;
            return true;
        }
        if let Some(header) = parse_header_line(data) {
            self.headers.push(header);
        }
        true
    }

    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        if self.cancel.is_cancelled() {
            self.interrupted = Some(ProbeErrorKind::Cancelled);
            return false;
        }

        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.interrupted = Some(ProbeErrorKind::Timeout);
            return false;
        }

        !self.limit_reached
    }
}

/// What one probe asks of the client.
pub struct ProbeRequest<'a> {
    pub url: &'a Url,
    pub config: &'a HttpProbeConfig,
    /// Address the host name is pinned to, bypassing libcurl's own lookup.
    pub pinned_ip: Option<IpAddr>,
}

/// The final response of a transfer, after any redirects were followed.
#[derive(Clone, Debug, Default)]
pub struct HttpExchange {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body exactly as received, before any content decoding.
    pub body: Vec<u8>,
    pub version: Option<ResponseVersion>,
    pub redirects: u32,
    pub over_tls: bool,
    pub(super) times: TransferTimes,
}

pub struct ProbeClient {
    easy: Easy2<BodyCollector>,
}

impl ProbeClient {
    pub fn new() -> Result<Self, CurlError> {
        let mut easy = Easy2::new(BodyCollector::default());
        easy.follow_location(true)?;
        easy.progress(true)?;
        Ok(Self { easy })
    }

    /// Runs one transfer bounded by the context's deadline and cancel token.
    pub fn execute(
        &mut self,
        ctx: &ProbeContext,
        request: &ProbeRequest<'_>,
    ) -> Result<HttpExchange, ProbeError> {
        if ctx.is_cancelled() {
            return Err(ProbeError::new(ProbeErrorKind::Cancelled, "probe cancelled"));
        }
        if ctx.is_expired() {
            return Err(ProbeError::new(
                ProbeErrorKind::Timeout,
                "deadline exceeded before the request was sent",
            ));
        }

        self.easy.reset();
        self.easy
            .get_mut()
            .reset(request.config.body_size_limit.unwrap_or(0), ctx);
        self.configure(request, ctx.remaining())
            .map_err(|err| map_curl_error(&err))?;

        let perform_result = self.easy.perform();
        let collector = self.easy.get_ref();
        if collector.limit_reached {
            return Err(ProbeError::new(
                ProbeErrorKind::BodyTooLarge,
                format!(
                    "response body exceeds the {} byte limit",
                    collector.limit
                ),
            ));
        }
        if let Err(err) = perform_result {
            if let Some(kind) = collector.interrupted.clone() {
                return Err(ProbeError::new(kind, err.to_string()));
            }
            return Err(map_curl_error(&err));
        }

        let status = self
            .easy
            .response_code()
            .ok()
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(0);
        let redirects = self.easy.redirect_count().unwrap_or(0);
        let over_tls = self
            .easy
            .effective_url()
            .ok()
            .flatten()
            .and_then(|effective| Url::parse(effective).ok())
            .map(|effective| effective.scheme() == "https")
            .unwrap_or(false);
        let version = fetch_http_version(self.easy.raw());
        let times = TransferTimes {
            namelookup: self.easy.namelookup_time().unwrap_or_default(),
            connect: self.easy.connect_time().unwrap_or_default(),
            appconnect: self.easy.appconnect_time().unwrap_or_default(),
            pretransfer: self.easy.pretransfer_time().unwrap_or_default(),
            starttransfer: self.easy.starttransfer_time().unwrap_or_default(),
            total: self.easy.total_time().unwrap_or_default(),
        };

        let collector = self.easy.get_mut();
        Ok(HttpExchange {
            status,
            headers: std::mem::take(&mut collector.headers),
            body: std::mem::take(&mut collector.body),
            version,
            redirects,
            over_tls,
            times,
        })
    }

    fn configure(&mut self, request: &ProbeRequest<'_>, remaining: Duration) -> Result<(), CurlError> {
        let config = request.config;
        let easy = &mut self.easy;

        easy.url(request.url.as_str())?;
        // A zero timeout means "none" to libcurl.
        easy.timeout(remaining.max(Duration::from_millis(1)))?;
        easy.progress(true)?;
        easy.useragent(USER_AGENT)?;
        easy.follow_location(!config.no_follow_redirects)?;
        easy.max_redirections(MAX_REDIRECTS)?;

        let tls = &config.tls_config;
        easy.ssl_verify_peer(!tls.insecure_skip_verify)?;
        easy.ssl_verify_host(!tls.insecure_skip_verify)?;
        if let Some(ca_file) = &tls.ca_file {
            easy.cainfo(ca_file)?;
        }
        if let Some(cert_file) = &tls.cert_file {
            easy.ssl_cert(cert_file)?;
        }
        if let Some(key_file) = &tls.key_file {
            easy.ssl_key(key_file)?;
        }

        let method = config.method.trim().to_ascii_uppercase();
        match (method.as_str(), config.body.as_deref()) {
            ("HEAD", _) => easy.nobody(true)?,
            ("GET", None) => {}
            (method, Some(body)) => {
                easy.post_fields_copy(body.as_bytes())?;
                if method != "POST" {
                    easy.custom_request(method)?;
                }
            }
            ("POST", None) => {
                easy.post(true)?;
                easy.post_fields_copy(&[])?;
            }
            ("PUT" | "PATCH", None) => {
                easy.post(true)?;
                easy.post_fields_copy(&[])?;
                easy.custom_request(&method)?;
            }
            (method, None) => easy.custom_request(method)?,
        }

        let (host, extra) = split_host_header(&config.headers);
        let mut list = List::new();
        if let Some(host) = host {
            list.append(&format!("Host: {host}"))?;
        }
        let mut accept_encoding_set = false;
        for (name, value) in extra {
            accept_encoding_set |= name.eq_ignore_ascii_case("accept-encoding");
            list.append(&format!("{name}: {value}"))?;
        }
        if !config.disable_gzip_encoding && !accept_encoding_set {
            list.append("Accept-Encoding: gzip")?;
        }
        easy.http_headers(list)?;

        if let Some(ip) = request.pinned_ip
            && let Some(entry) = resolve_entry(request.url, ip)
        {
            let mut list = List::new();
            list.append(&entry)?;
            easy.resolve(list)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
