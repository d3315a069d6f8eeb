//! Process-wide metrics for queries, the job queue and worker lifecycles.
//!
//! Every recording function compiles to nothing unless the `telemetry`
//! feature is enabled. With the feature on, values accumulate in one
//! in-memory table that [`snapshot`] copies out and [`reset`] clears.
//! Metric names live in [`tags`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod tags;
pub mod worker;

/// Summary of the samples recorded under one histogram name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

#[cfg(feature = "telemetry")]
impl HistogramSnapshot {
    fn absorb(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count = self.count.saturating_add(1);
        self.total = self.total.saturating_add(value);
        self.mean = self.total as f64 / self.count as f64;
    }
}

/// Copy of every metric recorded since the last [`reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).copied()
    }
}

#[inline]
#[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
pub fn increment_counter(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::update(|metrics| {
        let counter = metrics.counters.entry(name).or_insert(0);
        *counter = counter.saturating_add(value);
    });
}

#[inline]
#[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
pub fn record_histogram(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::update(|metrics| metrics.histograms.entry(name).or_default().absorb(value));
}

#[inline]
#[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
pub fn set_gauge(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::update(|metrics| {
        metrics.gauges.insert(name, value);
    });
}

/// Moves a gauge up or down by `delta`. Gauges never drop below zero.
#[inline]
#[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
pub fn adjust_gauge(name: &'static str, delta: i64) {
    #[cfg(feature = "telemetry")]
    registry::update(|metrics| {
        let gauge = metrics.gauges.entry(name).or_insert(0);
        *gauge = gauge.saturating_add_signed(delta);
    });
}

/// Returns the recorded metrics. Always empty without the `telemetry`
/// feature.
pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    {
        registry::snapshot()
    }

    #[cfg(not(feature = "telemetry"))]
    {
        TelemetrySnapshot::default()
    }
}

pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::update(|metrics| *metrics = registry::Metrics::default());
}

pub(crate) fn elapsed_us(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::{Mutex, OnceLock};

    use super::{HistogramSnapshot, TelemetrySnapshot};
    use crate::lock_unpoisoned;

    #[derive(Default)]
    pub(super) struct Metrics {
        pub(super) counters: BTreeMap<&'static str, u64>,
        pub(super) gauges: BTreeMap<&'static str, u64>,
        pub(super) histograms: BTreeMap<&'static str, HistogramSnapshot>,
    }

    fn metrics() -> &'static Mutex<Metrics> {
        static METRICS: OnceLock<Mutex<Metrics>> = OnceLock::new();
        METRICS.get_or_init(Mutex::default)
    }

    pub(super) fn update(apply: impl FnOnce(&mut Metrics)) {
        apply(&mut lock_unpoisoned(metrics()));
    }

    pub(super) fn snapshot() -> TelemetrySnapshot {
        fn owned<V: Copy>(map: &BTreeMap<&'static str, V>) -> BTreeMap<String, V> {
            map.iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect()
        }

        let metrics = lock_unpoisoned(metrics());
        TelemetrySnapshot {
            counters: owned(&metrics.counters),
            gauges: owned(&metrics.gauges),
            histograms: owned(&metrics.histograms),
        }
    }
}
