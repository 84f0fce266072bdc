//! Gauge registry shared by the probers.
//!
//! Every probe gets a fresh [`Registry`]; handles are cheap clones around
//! atomic cells so they can be set from whichever thread runs the probe.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RegistryError {
    #[error("metric {name} is already registered")]
    AlreadyRegistered { name: String },
    #[error("invalid metric name {name:?}")]
    InvalidName { name: String },
}

/// A single numeric value. Starts at zero.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    bits: Arc<AtomicU64>,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Gauges sharing a name, told apart by one label.
#[derive(Clone, Debug)]
pub struct GaugeVec {
    label: String,
    children: Arc<Mutex<BTreeMap<String, Gauge>>>,
}

impl GaugeVec {
    pub fn with_label_value(&self, value: &str) -> Gauge {
        lock(&self.children)
            .entry(value.to_string())
            .or_default()
            .clone()
    }
}

#[derive(Debug)]
enum Collector {
    Single(Gauge),
    Labelled(GaugeVec),
}

#[derive(Debug)]
struct Family {
    name: String,
    help: String,
    collector: Collector,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    families: Arc<Mutex<Vec<Family>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<Gauge, RegistryError> {
        let gauge = Gauge::default();
        self.register(name, help, Collector::Single(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn register_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label: &str,
    ) -> Result<GaugeVec, RegistryError> {
        if !is_valid_name(label) {
            return Err(RegistryError::InvalidName {
                name: label.to_string(),
            });
        }
        let gauges = GaugeVec {
            label: label.to_string(),
            children: Arc::default(),
        };
        self.register(name, help, Collector::Labelled(gauges.clone()))?;
        Ok(gauges)
    }

    fn register(&self, name: &str, help: &str, collector: Collector) -> Result<(), RegistryError> {
        if !is_valid_name(name) {
            return Err(RegistryError::InvalidName {
                name: name.to_string(),
            });
        }
        let mut families = lock(&self.families);
        if families.iter().any(|family| family.name == name) {
            return Err(RegistryError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        families.push(Family {
            name: name.to_string(),
            help: help.to_string(),
            collector,
        });
        Ok(())
    }

    /// Current value of an unlabelled gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        lock(&self.families)
            .iter()
            .find(|family| family.name == name)
            .and_then(|family| match &family.collector {
                Collector::Single(gauge) => Some(gauge.get()),
                Collector::Labelled(_) => None,
            })
    }

    /// Current value of one child of a labelled gauge.
    pub fn labelled_value(&self, name: &str, label_value: &str) -> Option<f64> {
        lock(&self.families)
            .iter()
            .find(|family| family.name == name)
            .and_then(|family| match &family.collector {
                Collector::Single(_) => None,
                Collector::Labelled(gauges) => {
                    lock(&gauges.children).get(label_value).map(Gauge::get)
                }
            })
    }

    /// Text form, one family after another in registration order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in lock(&self.families).iter() {
            let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {} gauge", family.name);
            match &family.collector {
                Collector::Single(gauge) => {
                    let _ = writeln!(out, "{} {}", family.name, gauge.get());
                }
                Collector::Labelled(gauges) => {
                    for (value, gauge) in lock(&gauges.children).iter() {
                        let _ = writeln!(
                            out,
                            "{}{{{}=\"{}\"}} {}",
                            family.name,
                            gauges.label,
                            escape_label_value(value),
                            gauge.get()
                        );
                    }
                }
            }
        }
        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
