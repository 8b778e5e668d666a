//! Run configuration.
//!
//! A `ShatterConfig` describes one shatter run and is persisted as JSON
//! under the run's time slot, so interrupted runs can be inspected and
//! resumed. Metric bodies are not serialized; specs re-bind to the registry
//! at load time.

use anyhow::{Context, Result};
use pointgrid_core::{CellMbr, GeoRect};
use pointgrid_metrics::{Metric, MetricSpec, registry};
use serde::{Deserialize, Serialize};

/// Default leaf size, in cells per axis.
pub const DEFAULT_TILE_SIZE: u32 = 16;

/// Current unix time in milliseconds.
#[must_use]
pub fn unix_millis_now() -> i64 {
	(time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Configuration and result record of a shatter run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShatterConfig {
	/// Source point cloud.
	pub filename: String,
	/// Layer bounds override; when absent the reader's quick-info is used.
	#[serde(default)]
	pub bounds: Option<GeoRect>,
	/// Cell size in layer units.
	pub resolution: f64,
	/// Leaf size in cells per axis.
	pub tile_size: u32,
	/// Raw attributes to retain per cell.
	pub attributes: Vec<String>,
	/// Metrics to evaluate, as registry-bound specs.
	pub metrics: Vec<MetricSpec>,
	/// Time slot of the run; reserved at startup when absent, supplied to
	/// resume an interrupted run.
	#[serde(default)]
	pub time_slot: Option<u64>,
	#[serde(default)]
	pub start_time: i64,
	#[serde(default)]
	pub end_time: i64,
	#[serde(default)]
	pub point_count: u64,
	#[serde(default)]
	pub finished: bool,
	/// MBRs of the tiles completed by this run.
	#[serde(default)]
	pub mbrs: Vec<CellMbr>,
}

impl ShatterConfig {
	/// Creates a run config with default tile size and empty result fields.
	pub fn new(filename: &str, resolution: f64, attributes: &[String], metrics: &[Metric]) -> ShatterConfig {
		ShatterConfig {
			filename: filename.to_string(),
			bounds: None,
			resolution,
			tile_size: DEFAULT_TILE_SIZE,
			attributes: attributes.to_vec(),
			metrics: metrics.iter().map(Metric::spec).collect(),
			time_slot: None,
			start_time: 0,
			end_time: 0,
			point_count: 0,
			finished: false,
			mbrs: Vec::new(),
		}
	}

	/// The attribute set LiDAR runs retain by default.
	#[must_use]
	pub fn default_attributes() -> Vec<String> {
		["Z", "Intensity", "NumberOfReturns", "Classification"]
			.into_iter()
			.map(String::from)
			.collect()
	}

	/// Re-binds the metric specs to their registry bodies.
	pub fn resolved_metrics(&self) -> Result<Vec<Metric>> {
		self
			.metrics
			.iter()
			.map(registry::resolve_spec)
			.collect::<Result<Vec<Metric>>>()
			.context("run config names metrics the registry does not provide")
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	pub fn from_json(json: &str) -> Result<ShatterConfig> {
		serde_json::from_str(json).context("invalid shatter config")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> ShatterConfig {
		ShatterConfig::new(
			"points.las",
			1.0,
			&ShatterConfig::default_attributes(),
			&registry::resolve_names(&["count", "mean", "cv"].map(String::from)).unwrap(),
		)
	}

	#[test]
	fn json_roundtrip() {
		let mut original = config();
		original.time_slot = Some(3);
		original.point_count = 1234;
		original.finished = true;
		original.mbrs = vec![CellMbr::new(0, 0, 15, 15)];

		let parsed = ShatterConfig::from_json(&original.to_json().unwrap()).unwrap();
		assert_eq!(parsed, original);
	}

	#[test]
	fn metrics_rebind_to_registry() {
		let metrics = config().resolved_metrics().unwrap();
		assert_eq!(metrics.len(), 3);
		assert_eq!(metrics[2].deps, vec!["mean", "stddev"]);
		// bound bodies evaluate
		assert_eq!(metrics[0].eval(&[1.0, 2.0], &[]), 2.0);
	}

	#[test]
	fn unknown_metric_fails_at_load() {
		let mut broken = config();
		broken.metrics[0].name = "definitely_not_registered".to_string();
		assert!(broken.resolved_metrics().is_err());
	}

	#[test]
	fn partial_json_fills_defaults() {
		let json = r#"{
			"filename": "points.las",
			"resolution": 0.5,
			"tile_size": 8,
			"attributes": ["Z"],
			"metrics": [{"name": "mean", "dtype": "float64"}]
		}"#;
		let parsed = ShatterConfig::from_json(json).unwrap();
		assert_eq!(parsed.time_slot, None);
		assert_eq!(parsed.point_count, 0);
		assert!(!parsed.finished);
		assert!(parsed.mbrs.is_empty());
		assert!(parsed.metrics[0].dependencies.is_empty());
	}
}
