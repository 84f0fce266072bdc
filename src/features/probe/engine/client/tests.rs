use super::{BodyCollector, ProbeClient, ProbeRequest};
use crate::common::time::{CancelToken, ProbeContext};
use crate::config::HttpProbeConfig;
use crate::probe::ProbeErrorKind;
use curl::easy::Handler;
use std::time::Duration;
use url::Url;

fn collector(limit: u64) -> BodyCollector {
    let mut collector = BodyCollector::default();
    collector.reset(limit, &ProbeContext::with_timeout(Duration::from_secs(5)));
    collector
}

#[test]
fn body_collector_no_limit_keeps_everything() {
    let mut collector = collector(0);
    let data = vec![7u8; 8];
    let wrote = collector.write(&data).expect("write");
    assert_eq!(wrote, data.len());
    assert_eq!(collector.bytes, 8);
    assert_eq!(collector.body, data);
    assert!(!collector.limit_reached);
}

#[test]
fn body_collector_caps_bytes_when_limit_exceeded() {
    let mut collector = collector(5);
    let data = vec![0u8; 10];
    let wrote = collector.write(&data).expect("write");
    assert_eq!(wrote, data.len());
    assert_eq!(collector.bytes, 5);
    assert_eq!(collector.body.len(), 5);
    assert!(collector.limit_reached);
}

#[test]
fn body_collector_exact_limit_is_allowed() {
    let mut collector = collector(5);
    let _ = collector.write(&[0u8; 5]).expect("write");
    assert_eq!(collector.bytes, 5);
    assert!(!collector.limit_reached);
    assert!(collector.progress(0.0, 5.0, 0.0, 0.0));
}

#[test]
fn body_collector_caps_bytes_after_partial() {
    let mut collector = collector(5);
    let first = vec![0u8; 3];
    let wrote_first = collector.write(&first).expect("write");
    assert_eq!(wrote_first, 3);
    assert_eq!(collector.bytes, 3);
    assert!(!collector.limit_reached);

    let second = vec![0u8; 4];
    let wrote_second = collector.write(&second).expect("write");
    assert_eq!(wrote_second, second.len());
    assert_eq!(collector.bytes, 5);
    assert!(collector.limit_reached);
}

#[test]
fn body_collector_progress_aborts_after_limit() {
    let mut collector = collector(5);
    let _ = collector.write(&[0u8; 6]).expect("write");
    assert!(collector.limit_reached);
    assert!(!collector.progress(0.0, 6.0, 0.0, 0.0));
    assert_eq!(collector.interrupted, None);
}

#[test]
fn body_collector_progress_allows_below_limit() {
    let mut collector = collector(5);
    assert!(collector.progress(0.0, 2.0, 0.0, 0.0));
}

#[test]
fn body_collector_progress_aborts_on_cancel() {
    let ctx = ProbeContext::with_timeout(Duration::from_secs(5));
    let mut collector = BodyCollector::default();
    collector.reset(0, &ctx);
    ctx.cancel_token().cancel();
    assert!(!collector.progress(0.0, 0.0, 0.0, 0.0));
    assert_eq!(collector.interrupted, Some(ProbeErrorKind::Cancelled));
}

#[test]
fn body_collector_progress_aborts_past_deadline() {
    let mut collector = BodyCollector::default();
    collector.reset(0, &ProbeContext::with_timeout(Duration::ZERO));
    assert!(!collector.progress(0.0, 0.0, 0.0, 0.0));
    assert_eq!(collector.interrupted, Some(ProbeErrorKind::Timeout));
}

#[test]
fn body_collector_restarts_on_each_status_line() {
    let mut collector = collector(0);
    assert!(collector.header(b"HTTP/1.1 302 Found\r\n"));
    assert!(collector.header(b"Location: /next\r\n"));
    let _ = collector.write(b"moved").expect("write");

    assert!(collector.header(b"HTTP/1.1 200 OK\r\n"));
    assert!(collector.header(b"Content-Type: text/plain\r\n"));
    assert!(collector.header(b"\r\n"));
    assert_eq!(
        collector.headers,
        vec![("Content-Type".to_string(), "text/plain".to_string())]
    );
    assert!(collector.body.is_empty());
    assert_eq!(collector.bytes, 0);
}

#[test]
fn execute_refuses_an_expired_deadline() {
    let url = Url::parse("http://127.0.0.1:9/").expect("url");
    let config = HttpProbeConfig::default();
    let request = ProbeRequest {
        url: &url,
        config: &config,
        pinned_ip: None,
    };
    let mut client = ProbeClient::new().expect("client");
    let err = client
        .execute(&ProbeContext::with_timeout(Duration::ZERO), &request)
        .expect_err("expired");
    assert_eq!(err.kind, ProbeErrorKind::Timeout);
}

#[test]
fn execute_refuses_a_cancelled_context() {
    let url = Url::parse("http://127.0.0.1:9/").expect("url");
    let config = HttpProbeConfig::default();
    let request = ProbeRequest {
        url: &url,
        config: &config,
        pinned_ip: None,
    };
    let token = CancelToken::new();
    token.cancel();
    let mut client = ProbeClient::new().expect("client");
    let err = client
        .execute(&ProbeContext::with_cancel(Duration::from_secs(5), token), &request)
        .expect_err("cancelled");
    assert_eq!(err.kind, ProbeErrorKind::Cancelled);
}
