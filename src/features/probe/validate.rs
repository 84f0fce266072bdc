//! Success criteria applied to a finished HTTP exchange.

use crate::config::{HeaderMatch, HttpProbeConfig};
use crate::probe::{ProbeErrorKind, ResponseVersion};
use flate2::read::GzDecoder;
use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use std::io::{self, Read};
use thiserror::Error;
use tracing::error;

/// An empty allow-list accepts any 2xx.
pub fn status_code_ok(status: u16, valid: &[u16]) -> bool {
    if valid.is_empty() {
        return (200..300).contains(&status);
    }
    valid.contains(&status)
}

/// An empty allow-list accepts any version, including an unknown one.
pub fn http_version_ok(version: Option<ResponseVersion>, valid: &[String]) -> bool {
    if valid.is_empty() {
        return true;
    }
    let Some(version) = version else {
        return false;
    };
    valid
        .iter()
        .filter_map(|label| ResponseVersion::from_label(label))
        .any(|allowed| allowed == version)
}

/// Body patterns, compiled once per probe.
#[derive(Debug, Default)]
pub struct BodyRules {
    fail_if_matches: Vec<BytesRegex>,
    fail_if_not_matches: Vec<BytesRegex>,
}

impl BodyRules {
    pub fn compile(config: &HttpProbeConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            fail_if_matches: compile_bytes(&config.fail_if_matches_regexp)?,
            fail_if_not_matches: compile_bytes(&config.fail_if_not_matches_regexp)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fail_if_matches.is_empty() && self.fail_if_not_matches.is_empty()
    }

    /// Any forbidden match fails; every required pattern must match.
    pub fn check(&self, body: &[u8]) -> bool {
        for re in &self.fail_if_matches {
            if re.is_match(body) {
                error!(regexp = %re, "Body matched regular expression");
                return false;
            }
        }
        for re in &self.fail_if_not_matches {
            if !re.is_match(body) {
                error!(regexp = %re, "Body did not match regular expression");
                return false;
            }
        }
        true
    }
}

#[derive(Debug)]
struct HeaderRule {
    header: String,
    regexp: Regex,
    allow_missing: bool,
}

impl HeaderRule {
    fn compile(rule: &HeaderMatch) -> Result<Self, regex::Error> {
        Ok(Self {
            header: rule.header.clone(),
            regexp: Regex::new(&rule.regexp)?,
            allow_missing: rule.allow_missing,
        })
    }
}

/// Header patterns, compiled once per probe.
#[derive(Debug, Default)]
pub struct HeaderRules {
    fail_if_matches: Vec<HeaderRule>,
    fail_if_not_matches: Vec<HeaderRule>,
}

impl HeaderRules {
    pub fn compile(config: &HttpProbeConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            fail_if_matches: config
                .fail_if_header_matches
                .iter()
                .map(HeaderRule::compile)
                .collect::<Result<_, _>>()?,
            fail_if_not_matches: config
                .fail_if_header_not_matches
                .iter()
                .map(HeaderRule::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fail_if_matches.is_empty() && self.fail_if_not_matches.is_empty()
    }

    /// A missing header fails either rule kind unless the rule allows it.
    pub fn check(&self, headers: &[(String, String)]) -> bool {
        for rule in &self.fail_if_matches {
            let values = header_values(headers, &rule.header);
            if values.is_empty() {
                if rule.allow_missing {
                    continue;
                }
                error!(header = %rule.header, "Missing required header");
                return false;
            }
            if values.iter().any(|value| rule.regexp.is_match(value)) {
                error!(header = %rule.header, regexp = %rule.regexp, "Header matched regular expression");
                return false;
            }
        }
        for rule in &self.fail_if_not_matches {
            let values = header_values(headers, &rule.header);
            if values.is_empty() {
                if rule.allow_missing {
                    continue;
                }
                error!(header = %rule.header, "Missing required header");
                return false;
            }
            if !values.iter().any(|value| rule.regexp.is_match(value)) {
                error!(header = %rule.header, regexp = %rule.regexp, "Header did not match regular expression");
                return false;
            }
        }
        true
    }
}

fn compile_bytes(patterns: &[String]) -> Result<Vec<BytesRegex>, regex::Error> {
    patterns.iter().map(|pattern| BytesRegex::new(pattern)).collect()
}

/// Every value of `name`, compared case-insensitively.
pub fn header_values<'a>(headers: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .collect()
}

/// Splits a raw `Name: value` header line. Status lines and blanks yield `None`.
pub fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.contains(' ') {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Why a response body could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoded body exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("invalid gzip body: {0}")]
    Gzip(#[from] io::Error),
}

impl DecodeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::TooLarge { .. } => ProbeErrorKind::BodyTooLarge,
            Self::Gzip(_) => ProbeErrorKind::Decode,
        }
    }
}

/// Inflates a gzip body, holding the decoded size to `limit` when one is set.
/// Returns the decoded bytes and whether the wire form was compressed. An
/// empty body is left as is: HEAD, 204 and 304 replies carry the encoding
/// header without any bytes to inflate.
pub fn decode_body(
    headers: &[(String, String)],
    body: Vec<u8>,
    limit: Option<u64>,
) -> Result<(Vec<u8>, bool), DecodeError> {
    let gzip = header_values(headers, "Content-Encoding")
        .iter()
        .any(|value| value.trim().eq_ignore_ascii_case("gzip"));
    if !gzip {
        return Ok((body, false));
    }
    if body.is_empty() {
        return Ok((body, true));
    }
    let mut decoded = Vec::with_capacity(body.len().saturating_mul(2));
    let mut decoder = GzDecoder::new(body.as_slice());
    match limit {
        Some(limit) => {
            decoder
                .by_ref()
                .take(limit.saturating_add(1))
                .read_to_end(&mut decoded)?;
            if decoded.len() as u64 > limit {
                return Err(DecodeError::TooLarge { limit });
            }
        }
        None => {
            decoder.read_to_end(&mut decoded)?;
        }
    }
    Ok((decoded, true))
}
