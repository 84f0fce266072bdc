use crate::probe::ResponseVersion;
use regex::bytes::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MODULE: &str = "http_2xx";
pub const DEFAULT_METHOD: &str = "GET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse modules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("module {module:?} is invalid: {reason}")]
    InvalidModule { module: String, reason: String },
}

/// Full configuration for one probe invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    #[serde(default)]
    pub prober: ProberKind,
    #[serde(default = "default_timeout", with = "duration_text")]
    pub timeout: Duration,
    #[serde(default)]
    pub http: HttpProbeConfig,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            prober: ProberKind::Http,
            timeout: DEFAULT_TIMEOUT,
            http: HttpProbeConfig::default(),
        }
    }
}

impl Module {
    pub fn http(timeout: Duration, http: HttpProbeConfig) -> Self {
        Self {
            prober: ProberKind::Http,
            timeout,
            http,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        self.http.validate()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProberKind {
    #[default]
    Http,
}

impl ProberKind {
    pub fn label(self) -> &'static str {
        match self {
            ProberKind::Http => "http",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IpProtocol {
    Ip4,
    Ip6,
}

impl IpProtocol {
    /// Empty input means "prefer ip6".
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "" | "ip6" => Some(IpProtocol::Ip6),
            "ip4" => Some(IpProtocol::Ip4),
            _ => None,
        }
    }

    pub fn fallback(self) -> Self {
        match self {
            IpProtocol::Ip4 => IpProtocol::Ip6,
            IpProtocol::Ip6 => IpProtocol::Ip4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IpProtocol::Ip4 => "ip4",
            IpProtocol::Ip6 => "ip6",
        }
    }

    pub fn gauge_value(self) -> f64 {
        match self {
            IpProtocol::Ip4 => 4.0,
            IpProtocol::Ip6 => 6.0,
        }
    }

    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            IpProtocol::Ip4 => ip.is_ipv4(),
            IpProtocol::Ip6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for IpProtocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for IpProtocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        IpProtocol::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown ip protocol {raw:?}")))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpProbeConfig {
    pub method: String,
    pub body: Option<String>,
    pub valid_status_codes: Vec<u16>,
    pub valid_http_versions: Vec<String>,
    pub no_follow_redirects: bool,
    pub fail_if_ssl: bool,
    pub fail_if_not_ssl: bool,
    pub fail_if_matches_regexp: Vec<String>,
    pub fail_if_not_matches_regexp: Vec<String>,
    pub fail_if_header_matches: Vec<HeaderMatch>,
    pub fail_if_header_not_matches: Vec<HeaderMatch>,
    pub headers: HashMap<String, SecretString>,
    pub tls_config: TlsConfig,
    pub disable_gzip_encoding: bool,
    pub preferred_ip_protocol: Option<IpProtocol>,
    pub ip_protocol_fallback: bool,
    /// Upper bound on the wire body in bytes.
    pub body_size_limit: Option<u64>,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            body: None,
            valid_status_codes: Vec::new(),
            valid_http_versions: Vec::new(),
            no_follow_redirects: false,
            fail_if_ssl: false,
            fail_if_not_ssl: false,
            fail_if_matches_regexp: Vec::new(),
            fail_if_not_matches_regexp: Vec::new(),
            fail_if_header_matches: Vec::new(),
            fail_if_header_not_matches: Vec::new(),
            headers: HashMap::new(),
            tls_config: TlsConfig::default(),
            disable_gzip_encoding: false,
            preferred_ip_protocol: None,
            ip_protocol_fallback: true,
            body_size_limit: None,
        }
    }
}

impl HttpProbeConfig {
    fn validate(&self) -> Result<(), String> {
        if !is_token(&self.method) {
            return Err(format!("invalid HTTP method {:?}", self.method));
        }

        if let Some(code) = self
            .valid_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(format!("status code {code} is out of range"));
        }

        if let Some(version) = self
            .valid_http_versions
            .iter()
            .find(|version| ResponseVersion::from_label(version).is_none())
        {
            return Err(format!("unknown HTTP version {version:?}"));
        }

        if self.fail_if_ssl && self.fail_if_not_ssl {
            return Err("fail_if_ssl and fail_if_not_ssl are mutually exclusive".to_string());
        }

        for pattern in self
            .fail_if_matches_regexp
            .iter()
            .chain(&self.fail_if_not_matches_regexp)
        {
            Regex::new(pattern).map_err(|err| format!("invalid regexp {pattern:?}: {err}"))?;
        }

        for rule in self
            .fail_if_header_matches
            .iter()
            .chain(&self.fail_if_header_not_matches)
        {
            if rule.header.trim().is_empty() {
                return Err("header rule without a header name".to_string());
            }
            Regex::new(&rule.regexp)
                .map_err(|err| format!("invalid regexp {:?}: {err}", rule.regexp))?;
        }

        if let Some(name) = self.headers.keys().find(|name| !is_token(name)) {
            return Err(format!("invalid header name {name:?}"));
        }

        self.tls_config.validate()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderMatch {
    pub header: String,
    pub regexp: String,
    #[serde(default)]
    pub allow_missing: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    pub insecure_skip_verify: bool,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsConfig {
    fn validate(&self) -> Result<(), String> {
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => Err("cert_file requires key_file".to_string()),
            (None, Some(_)) => Err("key_file requires cert_file".to_string()),
            _ => Ok(()),
        }
    }
}

/// Named modules loaded from the modules file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSet {
    #[serde(default)]
    pub modules: HashMap<String, Module>,
}

impl ModuleSet {
    pub fn builtin() -> Self {
        let mut modules = HashMap::new();
        modules.insert(DEFAULT_MODULE.to_string(), Module::default());
        Self { modules }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let set: ModuleSet = serde_json::from_str(content)?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, module) in &self.modules {
            module
                .validate()
                .map_err(|reason| ConfigError::InvalidModule {
                    module: name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("blackprobe").join("modules.json"))
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Module timeouts are written as humantime strings such as `250ms`,
/// `5s` or `1m 30s`.
mod duration_text {
    use humantime::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
