//! Scrape-level entry point: one module, one target, one rendered result.

use crate::common::time::{CancelToken, ProbeContext};
use crate::config::{Module, ProberKind};
use crate::features::probe::engine::run_http_probe;
use crate::metrics::Registry;
use crate::probe::{ProbeSink, STATUS_SERVICE_UNAVAILABLE};
use std::time::Instant;
use tracing::{error, info, info_span};
use uuid::Uuid;

/// Probes `target` with `module` and writes the metrics into `sink`.
pub fn probe_http(target: &str, sink: &mut dyn ProbeSink, module: &Module) -> bool {
    run_probe(target, module, sink, CancelToken::new())
}

/// Runs the module's prober against a fresh registry, then appends
/// `probe_success` and `probe_duration_seconds`. The sink's status becomes
/// 503 when the probe fails.
pub fn run_probe(
    target: &str,
    module: &Module,
    sink: &mut dyn ProbeSink,
    cancel: CancelToken,
) -> bool {
    let registry = Registry::new();
    let probe_id = Uuid::new_v4();
    let span = info_span!(
        "probe",
        %probe_id,
        module = module.prober.label(),
        target = %target
    );
    let ctx = ProbeContext::with_cancel(module.timeout, cancel);
    let start = Instant::now();

    span.in_scope(|| info!(timeout = ?module.timeout, "Beginning probe"));
    let success = match module.prober {
        ProberKind::Http => run_http_probe(&ctx, target, module, &registry, &span),
    };
    let elapsed = start.elapsed().as_secs_f64();

    let summary = registry
        .register_gauge("probe_duration_seconds", "Returns how long the probe took to complete in seconds")
        .and_then(|duration| {
            duration.set(elapsed);
            registry.register_gauge("probe_success", "Displays whether or not the probe was a success")
        });
    let success = match summary {
        Ok(probe_success) => {
            probe_success.set(if success { 1.0 } else { 0.0 });
            success
        }
        Err(err) => {
            span.in_scope(|| error!(error = %err, "Could not register probe summary metrics"));
            false
        }
    };

    span.in_scope(|| {
        if success {
            info!(duration_seconds = elapsed, "Probe succeeded");
        } else {
            error!(duration_seconds = elapsed, "Probe failed");
        }
    });

    sink.write_text(&registry.render());
    if !success {
        sink.set_status(STATUS_SERVICE_UNAVAILABLE);
    }
    success
}
