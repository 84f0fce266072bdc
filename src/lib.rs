mod common;
mod features;

pub mod config;
pub mod data_model;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod runtime;
pub mod settings;

pub use common::time::{CancelToken, ProbeContext};
pub use features::probe::{engine, resolver, validate};
