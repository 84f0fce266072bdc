//! The HTTP prober: one request, validated against a module's rules.

mod client;
mod helpers;

pub use client::{HttpExchange, ProbeClient, ProbeRequest};

use super::resolver::{HostLookup, SystemLookup, choose_protocol_with};
use super::validate::{BodyRules, HeaderRules, decode_body, http_version_ok, status_code_ok};
use crate::common::net::{lookup_name, parse_target_url};
use crate::common::time::ProbeContext;
use crate::config::Module;
use crate::metrics::{Gauge, GaugeVec, Registry, RegistryError};
use crate::probe::{ProbeError, ProbeErrorKind};
use helpers::phase_timings;
use std::time::Duration;
use tracing::{Span, error, info};
use url::Url;

struct HttpGauges {
    durations: GaugeVec,
    content_length: Gauge,
    redirects: Gauge,
    is_ssl: Gauge,
    status_code: Gauge,
    http_version: Gauge,
    content_compressed: Gauge,
    failed_due_to_regex: Gauge,
}

impl HttpGauges {
    fn register(registry: &Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            durations: registry.register_gauge_vec(
                "probe_http_duration_seconds",
                "Duration of http request by phase, summed over all redirects",
                "phase",
            )?,
            content_length: registry.register_gauge(
                "probe_http_content_length",
                "Length of http content response",
            )?,
            redirects: registry
                .register_gauge("probe_http_redirects", "The number of redirects")?,
            is_ssl: registry.register_gauge(
                "probe_http_ssl",
                "Indicates if SSL was used for the final redirect",
            )?,
            status_code: registry
                .register_gauge("probe_http_status_code", "Response HTTP status code")?,
            http_version: registry
                .register_gauge("probe_http_version", "Returns the version of HTTP of the probe response")?,
            content_compressed: registry.register_gauge(
                "probe_http_content_compressed",
                "Indicates if the response body was gzip compressed on the wire",
            )?,
            failed_due_to_regex: registry.register_gauge(
                "probe_failed_due_to_regex",
                "Indicates if probe failed due to regex",
            )?,
        })
    }
}

/// Probes `target` over HTTP with the platform resolver. See [`run_http_probe_with`].
pub fn run_http_probe(
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    registry: &Registry,
    logger: &Span,
) -> bool {
    run_http_probe_with(&SystemLookup, ctx, target, module, registry, logger)
}

/// Issues one request to `target` and reports whether every configured rule
/// held. Gauges are registered up front and filled in as far as the probe got;
/// failures are logged on `logger`, never returned.
pub fn run_http_probe_with(
    lookup: &dyn HostLookup,
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    registry: &Registry,
    logger: &Span,
) -> bool {
    let _enter = logger.enter();
    let config = &module.http;

    let gauges = match HttpGauges::register(registry) {
        Ok(gauges) => gauges,
        Err(err) => {
            error!(error = %err, "Could not register HTTP metrics");
            return false;
        }
    };

    let url = match target_url(target) {
        Ok(url) => url,
        Err(err) => {
            error!(kind = err.kind.label(), error = %err, "Invalid target");
            return false;
        }
    };

    let body_rules = match BodyRules::compile(config) {
        Ok(rules) => rules,
        Err(err) => {
            error!(error = %err, "Could not compile body regular expression");
            return false;
        }
    };
    let header_rules = match HeaderRules::compile(config) {
        Ok(rules) => rules,
        Err(err) => {
            error!(error = %err, "Could not compile header regular expression");
            return false;
        }
    };

    let mut pinned_ip = None;
    let mut lookup_time = None;
    if config.preferred_ip_protocol.is_some() {
        let Some(host) = lookup_name(&url) else {
            error!(target = %target, "Target URL has no host");
            return false;
        };
        match choose_protocol_with(
            lookup,
            ctx,
            config.preferred_ip_protocol,
            config.ip_protocol_fallback,
            &host,
            registry,
            logger,
        ) {
            Ok((address, secs)) => {
                pinned_ip = Some(address.ip);
                lookup_time = Some(secs);
            }
            Err(err) => {
                error!(error = %err, "Error resolving address");
                return false;
            }
        }
    }

    let mut client = match ProbeClient::new() {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "Could not create HTTP client");
            return false;
        }
    };

    info!(url = %url, method = %config.method, "Making HTTP request");
    let request = ProbeRequest {
        url: &url,
        config,
        pinned_ip,
    };
    let exchange = match client.execute(ctx, &request) {
        Ok(exchange) => exchange,
        Err(err) => {
            error!(kind = err.kind.label(), error = %err, "Error for HTTP request");
            return false;
        }
    };
    info!(status_code = exchange.status, "Received HTTP response");

    let mut phases = phase_timings(exchange.times);
    if let Some(secs) = lookup_time {
        phases.resolve = Duration::from_secs_f64(secs);
    }
    for (phase, elapsed) in phases.entries() {
        gauges
            .durations
            .with_label_value(phase)
            .set(elapsed.as_secs_f64());
    }

    gauges.status_code.set(f64::from(exchange.status));
    gauges.redirects.set(f64::from(exchange.redirects));
    gauges.is_ssl.set(if exchange.over_tls { 1.0 } else { 0.0 });
    if let Some(version) = exchange.version {
        gauges.http_version.set(version.gauge_value());
    }

    let mut success = status_code_ok(exchange.status, &config.valid_status_codes);
    if !success {
        info!(
            status_code = exchange.status,
            valid_status_codes = ?config.valid_status_codes,
            "Invalid HTTP response status code"
        );
    }

    if success && !http_version_ok(exchange.version, &config.valid_http_versions) {
        error!(
            version = exchange.version.map(|version| version.label()),
            valid_http_versions = ?config.valid_http_versions,
            "Invalid HTTP version number"
        );
        success = false;
    }

    if exchange.over_tls && config.fail_if_ssl {
        error!("Final request was over SSL");
        success = false;
    }
    if !exchange.over_tls && config.fail_if_not_ssl {
        error!("Final request was not over SSL");
        success = false;
    }

    if success && !header_rules.is_empty() && !header_rules.check(&exchange.headers) {
        gauges.failed_due_to_regex.set(1.0);
        success = false;
    }

    let body = match decode_body(&exchange.headers, exchange.body, config.body_size_limit) {
        Ok((body, compressed)) => {
            gauges
                .content_compressed
                .set(if compressed { 1.0 } else { 0.0 });
            body
        }
        Err(err) => {
            error!(kind = err.kind().label(), error = %err, "Failed to decode response body");
            gauges.content_compressed.set(1.0);
            success = false;
            Vec::new()
        }
    };
    gauges.content_length.set(body.len() as f64);

    if success && !body_rules.is_empty() && !body_rules.check(&body) {
        gauges.failed_due_to_regex.set(1.0);
        success = false;
    }

    success
}

fn target_url(target: &str) -> Result<Url, ProbeError> {
    parse_target_url(target).ok_or_else(|| {
        ProbeError::new(
            ProbeErrorKind::InvalidTarget,
            format!("could not parse target URL {target:?}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpProbeConfig, IpProtocol};
    use crate::probe::LookupError;
    use std::net::IpAddr;

    struct NoAnswer;

    impl HostLookup for NoAnswer {
        fn lookup_ip(
            &self,
            _ctx: &ProbeContext,
            _host: &str,
            _protocol: IpProtocol,
        ) -> Result<Vec<IpAddr>, LookupError> {
            Ok(Vec::new())
        }
    }

    fn module(http: HttpProbeConfig) -> Module {
        Module::http(Duration::from_secs(1), http)
    }

    #[test]
    fn unparseable_target_fails_with_gauges_registered() {
        let registry = Registry::new();
        let ctx = ProbeContext::with_timeout(Duration::from_secs(1));
        let ok = run_http_probe(
            &ctx,
            "ftp://example.test",
            &module(HttpProbeConfig::default()),
            &registry,
            &Span::none(),
        );
        assert!(!ok);
        assert_eq!(registry.gauge_value("probe_http_status_code"), Some(0.0));
        assert_eq!(registry.gauge_value("probe_http_ssl"), Some(0.0));
    }

    #[test]
    fn unparseable_target_is_an_invalid_target_error() {
        let err = target_url("ftp://example.test").expect_err("ftp scheme");
        assert_eq!(err.kind, ProbeErrorKind::InvalidTarget);
        assert!(err.message.contains("ftp://example.test"));
        assert!(target_url("example.test:8080").is_ok());
    }

    #[test]
    fn bad_regexp_fails_before_any_request() {
        let registry = Registry::new();
        let ctx = ProbeContext::with_timeout(Duration::from_secs(1));
        let config = HttpProbeConfig {
            fail_if_not_matches_regexp: vec!["(".into()],
            ..HttpProbeConfig::default()
        };
        assert!(!run_http_probe(
            &ctx,
            "http://127.0.0.1:9/",
            &module(config),
            &registry,
            &Span::none(),
        ));
    }

    #[test]
    fn resolution_failure_fails_the_probe() {
        let registry = Registry::new();
        let ctx = ProbeContext::with_timeout(Duration::from_secs(1));
        let config = HttpProbeConfig {
            preferred_ip_protocol: Some(IpProtocol::Ip4),
            ip_protocol_fallback: false,
            ..HttpProbeConfig::default()
        };
        assert!(!run_http_probe_with(
            &NoAnswer,
            &ctx,
            "http://unresolvable.test/",
            &module(config),
            &registry,
            &Span::none(),
        ));
        assert_eq!(registry.gauge_value("probe_ip_protocol"), Some(0.0));
        assert!(registry.gauge_value("probe_dns_lookup_time_seconds").is_some());
    }

    #[test]
    fn expired_context_fails_without_status() {
        let registry = Registry::new();
        let ctx = ProbeContext::with_timeout(Duration::ZERO);
        assert!(!run_http_probe(
            &ctx,
            "http://127.0.0.1:9/",
            &module(HttpProbeConfig::default()),
            &registry,
            &Span::none(),
        ));
        assert_eq!(registry.gauge_value("probe_http_status_code"), Some(0.0));
    }
}
