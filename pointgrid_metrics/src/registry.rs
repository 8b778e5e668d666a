//! The process-wide metric catalog.
//!
//! Every metric body lives in the binary; run configs refer to metrics by
//! name and re-bind here at load time. The catalog is read-only after
//! startup.

use crate::metric::{Metric, MetricDtype, MetricSpec, SENTINEL};
use crate::stats;
use anyhow::{Result, bail};
use lazy_static::lazy_static;
use std::collections::BTreeMap;

/// Cover-fraction threshold used by the stock `allcover` metric.
pub const DEFAULT_COVER_THRESHOLD: f64 = 2.0;

/// L-moment metrics guard against samples too small to support the
/// statistic.
const LMOM_MIN_LEN: usize = 4;

fn fraction_above(values: &[f64], threshold: f64) -> f64 {
	values.iter().filter(|&&x| x > threshold).count() as f64 / values.len() as f64
}

fn percentile_metric(q: u32) -> Metric {
	Metric::new(&format!("p{q:02}"), MetricDtype::Float64, &[], move |v, _| {
		stats::percentile(v, f64::from(q))
	})
}

/// Cover metric with a custom height threshold; the registry's `allcover`
/// uses [`DEFAULT_COVER_THRESHOLD`].
#[must_use]
pub fn allcover_with(threshold: f64) -> Metric {
	Metric::new("allcover", MetricDtype::Float64, &[], move |v, _| {
		fraction_above(v, threshold)
	})
}

fn build_catalog() -> BTreeMap<String, Metric> {
	let mut metrics: Vec<Metric> = vec![
		Metric::new("count", MetricDtype::Int32, &[], |v, _| v.len() as f64),
		Metric::new("mean", MetricDtype::Float64, &[], |v, _| stats::mean(v)),
		Metric::new("mode", MetricDtype::Float64, &[], |v, _| stats::histogram_mode(v)),
		Metric::new("median", MetricDtype::Float64, &[], |v, _| stats::median(v)),
		Metric::new("min", MetricDtype::Float64, &[], |v, _| stats::min(v)),
		Metric::new("max", MetricDtype::Float64, &[], |v, _| stats::max(v)),
		Metric::new("stddev", MetricDtype::Float64, &[], |v, _| stats::stddev(v)),
		Metric::new("variance", MetricDtype::Float64, &[], |v, _| stats::variance(v)),
		Metric::new("cv", MetricDtype::Float64, &["mean", "stddev"], |_, d| {
			if d[0] == 0.0 { SENTINEL } else { d[1] / d[0] }
		}),
		Metric::new("abovemean", MetricDtype::Float64, &["mean"], |v, d| {
			fraction_above(v, d[0])
		}),
		Metric::new("abovemode", MetricDtype::Float64, &["mode"], |v, d| {
			fraction_above(v, d[0])
		}),
		Metric::new("skewness", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN {
				return SENTINEL;
			}
			let (m2, m3, _) = stats::central_moments(v);
			if m2 == 0.0 { SENTINEL } else { m3 / m2.powf(1.5) }
		}),
		Metric::new("kurtosis", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN {
				return SENTINEL;
			}
			let (m2, _, m4) = stats::central_moments(v);
			if m2 == 0.0 { SENTINEL } else { m4 / (m2 * m2) - 3.0 }
		}),
		Metric::new("aad", MetricDtype::Float64, &["mean"], |v, d| {
			v.iter().map(|x| (x - d[0]).abs()).sum::<f64>() / v.len() as f64
		}),
		Metric::new("madmedian", MetricDtype::Float64, &["median"], |v, d| {
			stats::median(&v.iter().map(|x| (x - d[0]).abs()).collect::<Vec<f64>>())
		}),
		Metric::new("madmean", MetricDtype::Float64, &["mean"], |v, d| {
			stats::median(&v.iter().map(|x| (x - d[0]).abs()).collect::<Vec<f64>>())
		}),
		Metric::new("madmode", MetricDtype::Float64, &["mode"], |v, d| {
			stats::median(&v.iter().map(|x| (x - d[0]).abs()).collect::<Vec<f64>>())
		}),
		Metric::new("iq", MetricDtype::Float64, &["p25", "p75"], |_, d| d[1] - d[0]),
		Metric::new("crr", MetricDtype::Float64, &["mean", "min", "max"], |_, d| {
			let (mean, minv, maxv) = (d[0], d[1], d[2]);
			if minv == maxv {
				SENTINEL
			} else {
				(mean - minv) / (maxv - minv)
			}
		}),
		Metric::new("sqmean", MetricDtype::Float64, &[], |v, _| {
			(v.iter().map(|x| x * x).sum::<f64>() / v.len() as f64).sqrt()
		}),
		Metric::new("cumean", MetricDtype::Float64, &[], |v, _| {
			(v.iter().map(|x| x.abs().powi(3)).sum::<f64>() / v.len() as f64).cbrt()
		}),
		Metric::new("l1", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN { SENTINEL } else { stats::mean(v) }
		}),
		Metric::new("l2", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN { SENTINEL } else { stats::lmom4(v)[1] }
		}),
		Metric::new("l3", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN { SENTINEL } else { stats::lmom4(v)[2] }
		}),
		Metric::new("l4", MetricDtype::Float64, &[], |v, _| {
			if v.len() < LMOM_MIN_LEN { SENTINEL } else { stats::lmom4(v)[3] }
		}),
		Metric::new("lcv", MetricDtype::Float64, &["l1", "l2"], |v, d| {
			if v.len() < LMOM_MIN_LEN || d[0] == 0.0 {
				SENTINEL
			} else {
				d[1] / d[0]
			}
		}),
		Metric::new("lskewness", MetricDtype::Float64, &["l2", "l3"], |v, d| {
			if v.len() < LMOM_MIN_LEN || d[0] == 0.0 {
				SENTINEL
			} else {
				d[1] / d[0]
			}
		}),
		Metric::new("lkurtosis", MetricDtype::Float64, &["l2", "l4"], |v, d| {
			if v.len() < LMOM_MIN_LEN || d[0] == 0.0 {
				SENTINEL
			} else {
				d[1] / d[0]
			}
		}),
		Metric::new("90m10", MetricDtype::Float64, &["p10", "p90"], |_, d| d[1] - d[0]),
		Metric::new("95m05", MetricDtype::Float64, &["p05", "p95"], |_, d| d[1] - d[0]),
		allcover_with(DEFAULT_COVER_THRESHOLD),
		Metric::new("profilearea", MetricDtype::Float64, &[], |v, _| stats::profile_area(v)),
	];

	for q in [1, 5, 10, 20, 25, 30, 40, 50, 60, 70, 75, 80, 90, 95, 99] {
		metrics.push(percentile_metric(q));
	}

	metrics.into_iter().map(|m| (m.name.clone(), m)).collect()
}

lazy_static! {
	/// Every curated metric, keyed by name.
	pub static ref ALL_METRICS: BTreeMap<String, Metric> = build_catalog();
}

/// Looks up a single metric by name.
pub fn find(name: &str) -> Result<Metric> {
	match ALL_METRICS.get(name) {
		Some(metric) => Ok(metric.clone()),
		None => bail!("unknown metric '{name}'"),
	}
}

/// The full curated catalog in deterministic (name) order.
#[must_use]
pub fn grid_metrics() -> Vec<Metric> {
	ALL_METRICS.values().cloned().collect()
}

/// The four l-moments plus their ratios.
#[must_use]
pub fn l_moments() -> Vec<Metric> {
	["l1", "l2", "l3", "l4", "lcv", "lskewness", "lkurtosis"]
		.iter()
		.map(|name| ALL_METRICS[*name].clone())
		.collect()
}

/// The fifteen percentile metrics.
#[must_use]
pub fn percentiles() -> Vec<Metric> {
	ALL_METRICS
		.values()
		.filter(|m| m.name.starts_with('p') && m.name[1..].chars().all(|c| c.is_ascii_digit()))
		.cloned()
		.collect()
}

/// Resolves a list of metric names against the catalog.
pub fn resolve_names(names: &[String]) -> Result<Vec<Metric>> {
	names.iter().map(|name| find(name)).collect()
}

/// Re-binds a persisted [`MetricSpec`] to its registry body, applying the
/// spec's dependency override and filter.
pub fn resolve_spec(spec: &MetricSpec) -> Result<Metric> {
	let mut metric = find(&spec.name)?;
	spec.check_against(&metric)?;
	metric.deps = spec.dependencies.clone();
	metric.filter = spec.filter.clone();
	Ok(metric)
}
