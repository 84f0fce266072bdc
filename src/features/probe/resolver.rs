//! Dual-stack name resolution with a single fallback to the other IP family.

use crate::common::time::ProbeContext;
use crate::config::IpProtocol;
use crate::metrics::{Gauge, Registry, RegistryError};
use crate::probe::{LookupError, ResolvedAddress};
use crossbeam_channel::RecvTimeoutError;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Span, error, info};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unable to find ip; no fallback: {0}")]
    NoFallback(LookupError),
    #[error("unable to find ip; exhausted fallback: {0}")]
    ExhaustedFallback(LookupError),
    #[error(transparent)]
    Metrics(#[from] RegistryError),
}

/// Name lookup restricted to one IP family.
pub trait HostLookup: Send + Sync {
    /// Every address of `host` in `protocol`'s family. May be empty.
    fn lookup_ip(
        &self,
        ctx: &ProbeContext,
        host: &str,
        protocol: IpProtocol,
    ) -> Result<Vec<IpAddr>, LookupError>;
}

/// The platform resolver, bounded by the probe deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup_ip(
        &self,
        ctx: &ProbeContext,
        host: &str,
        protocol: IpProtocol,
    ) -> Result<Vec<IpAddr>, LookupError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let query = host.to_string();
        // getaddrinfo cannot be interrupted; the thread is left to finish on its own.
        thread::Builder::new()
            .name("blackprobe-lookup".to_string())
            .spawn(move || {
                let result = (query.as_str(), 0)
                    .to_socket_addrs()
                    .map(|addrs| addrs.map(|addr| addr.ip()).collect::<Vec<_>>());
                let _ = tx.send(result);
            })
            .map_err(|source| LookupError::Io {
                host: host.to_string(),
                source,
            })?;

        loop {
            if ctx.is_cancelled() {
                return Err(LookupError::Cancelled {
                    host: host.to_string(),
                });
            }
            let remaining = ctx.remaining();
            if remaining.is_zero() {
                return Err(LookupError::Timeout {
                    host: host.to_string(),
                });
            }

            match rx.recv_timeout(remaining.min(CANCEL_POLL_INTERVAL)) {
                Ok(Ok(ips)) => {
                    return Ok(ips.into_iter().filter(|ip| protocol.matches(ip)).collect());
                }
                Ok(Err(source)) => {
                    return Err(LookupError::Io {
                        host: host.to_string(),
                        source,
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LookupError::Io {
                        host: host.to_string(),
                        source: io::Error::other("lookup thread exited without a result"),
                    });
                }
            }
        }
    }
}

fn resolve(
    lookup: &dyn HostLookup,
    ctx: &ProbeContext,
    target: &str,
    protocol: IpProtocol,
) -> Result<ResolvedAddress, LookupError> {
    let ips = lookup.lookup_ip(ctx, target, protocol)?;
    ips.into_iter()
        .next()
        .map(|ip| ResolvedAddress { ip, protocol })
        .ok_or(LookupError::Empty)
}

struct ResolverGauges {
    ip_protocol: Gauge,
    lookup_time: Gauge,
    ip_addr_hash: Gauge,
}

impl ResolverGauges {
    fn register(registry: &Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            ip_protocol: registry.register_gauge(
                "probe_ip_protocol",
                "Specifies whether probe ip protocol is IP4 or IP6",
            )?,
            lookup_time: registry.register_gauge(
                "probe_dns_lookup_time_seconds",
                "Returns the time taken for probe dns lookup in seconds",
            )?,
            ip_addr_hash: registry.register_gauge(
                "probe_ip_addr_hash",
                "Specifies the hash of IP address. It's useful to detect if the IP address changes.",
            )?,
        })
    }

    fn record(&self, address: ResolvedAddress) -> ResolvedAddress {
        info!(ip = %address.ip, "Resolved target address");
        self.ip_protocol.set(address.protocol.gauge_value());
        self.ip_addr_hash.set(ip_hash(&address.ip));
        address
    }
}

/// Adds the elapsed time to the lookup gauge exactly once, on whichever path
/// the resolution leaves by.
struct LookupTimer {
    start: Instant,
    gauge: Gauge,
    recorded: bool,
}

impl LookupTimer {
    fn start(gauge: Gauge) -> Self {
        Self {
            start: Instant::now(),
            gauge,
            recorded: false,
        }
    }

    fn finish(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if !self.recorded {
            self.gauge.add(secs);
            self.recorded = true;
        }
        secs
    }
}

impl Drop for LookupTimer {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
        }
    }
}

/// Resolves `target` with the system resolver. See [`choose_protocol_with`].
pub fn choose_protocol(
    ctx: &ProbeContext,
    preferred: Option<IpProtocol>,
    allow_fallback: bool,
    target: &str,
    registry: &Registry,
    logger: &Span,
) -> Result<(ResolvedAddress, f64), ResolveError> {
    choose_protocol_with(
        &SystemLookup,
        ctx,
        preferred,
        allow_fallback,
        target,
        registry,
        logger,
    )
}

/// Resolves `target` to one address, preferring `preferred` (ip6 when unset)
/// and trying the other family once when allowed. Returns the address and
/// the lookup time in seconds.
pub fn choose_protocol_with(
    lookup: &dyn HostLookup,
    ctx: &ProbeContext,
    preferred: Option<IpProtocol>,
    allow_fallback: bool,
    target: &str,
    registry: &Registry,
    logger: &Span,
) -> Result<(ResolvedAddress, f64), ResolveError> {
    let _enter = logger.enter();
    let gauges = ResolverGauges::register(registry)?;
    let protocol = preferred.unwrap_or(IpProtocol::Ip6);
    let fallback = protocol.fallback();
    let timer = LookupTimer::start(gauges.lookup_time.clone());

    info!(ip_protocol = %protocol, "Resolving target address");
    let err = match resolve(lookup, ctx, target, protocol) {
        Ok(address) => return Ok((gauges.record(address), timer.finish())),
        Err(err) => err,
    };

    if !allow_fallback {
        error!(error = %err, "Resolution with IP protocol failed");
        return Err(ResolveError::NoFallback(err));
    }

    info!(ip_protocol = %fallback, "Resolving target address");
    match resolve(lookup, ctx, target, fallback) {
        Ok(address) => Ok((gauges.record(address), timer.finish())),
        Err(err) => {
            // Happens for names with neither A nor AAAA records.
            error!(error = %err, "Resolution with IP protocol failed");
            Err(ResolveError::ExhaustedFallback(err))
        }
    }
}

/// 32-bit FNV-1a over the address octets.
pub fn ip_hash(ip: &IpAddr) -> f64 {
    let hash = match ip {
        IpAddr::V4(addr) => fnv1a_32(&addr.octets()),
        IpAddr::V6(addr) => fnv1a_32(&addr.octets()),
    };
    f64::from(hash)
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}
