//! Metric descriptors.
//!
//! A metric is a named pure reduction from a cell's value vector to a
//! scalar. Bodies live in the binary (a closed registry); run configs carry
//! only the name, dtype, dependency list and optional filter, and re-bind
//! to the registry on load.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Valid output for statistically under-supported input. A contract, not an
/// error: cells with too few points store this value.
pub const SENTINEL: f64 = -9999.0;

/// Output type of a metric column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDtype {
	Float64,
	Int32,
}

/// Comparison operator of an [`AttributeFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
	#[serde(rename = "==")]
	Eq,
	#[serde(rename = "!=")]
	Ne,
	#[serde(rename = "<")]
	Lt,
	#[serde(rename = "<=")]
	Le,
	#[serde(rename = ">")]
	Gt,
	#[serde(rename = ">=")]
	Ge,
}

impl FilterOp {
	#[must_use]
	pub fn matches(&self, lhs: f64, rhs: f64) -> bool {
		match self {
			FilterOp::Eq => lhs == rhs,
			FilterOp::Ne => lhs != rhs,
			FilterOp::Lt => lhs < rhs,
			FilterOp::Le => lhs <= rhs,
			FilterOp::Gt => lhs > rhs,
			FilterOp::Ge => lhs >= rhs,
		}
	}
}

/// Simple attribute predicate masking a metric's input, e.g.
/// `NumberOfReturns == 1`. The predicate is evaluated against the named
/// sibling attribute of the same cell; rows failing it are dropped before
/// the metric sees its vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
	pub attr: String,
	pub op: FilterOp,
	pub value: f64,
}

impl AttributeFilter {
	pub fn new(attr: &str, op: FilterOp, value: f64) -> AttributeFilter {
		AttributeFilter {
			attr: attr.to_string(),
			op,
			value,
		}
	}
}

/// Body of a metric: the cell's (possibly filtered) value vector plus the
/// values of the declared dependencies, in declaration order.
pub type MetricFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// A named per-cell reduction with an output dtype, optional metric
/// dependencies and an optional input filter. Its canonical storage column
/// for attribute `attr` is `m_{attr}_{name}`.
#[derive(Clone)]
pub struct Metric {
	pub name: String,
	pub dtype: MetricDtype,
	pub deps: Vec<String>,
	pub filter: Option<AttributeFilter>,
	func: MetricFn,
}

impl Metric {
	pub fn new<F>(name: &str, dtype: MetricDtype, deps: &[&str], func: F) -> Metric
	where
		F: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
	{
		Metric {
			name: name.to_string(),
			dtype,
			deps: deps.iter().map(|d| (*d).to_string()).collect(),
			filter: None,
			func: Arc::new(func),
		}
	}

	/// Canonical storage column name for this metric over `attr`.
	#[must_use]
	pub fn entry_name(&self, attr: &str) -> String {
		format!("m_{attr}_{}", self.name)
	}

	/// Applies the metric body. `deps` must follow the order of
	/// [`Metric::deps`].
	#[must_use]
	pub fn eval(&self, values: &[f64], deps: &[f64]) -> f64 {
		(self.func)(values, deps)
	}

	/// Returns a copy carrying an input filter.
	#[must_use]
	pub fn with_filter(mut self, filter: AttributeFilter) -> Metric {
		self.filter = Some(filter);
		self
	}

	/// Returns a copy with a replaced dependency list (scheduling override,
	/// the body is unchanged).
	#[must_use]
	pub fn with_deps(mut self, deps: &[&str]) -> Metric {
		self.deps = deps.iter().map(|d| (*d).to_string()).collect();
		self
	}

	/// The serializable form persisted in run configs.
	#[must_use]
	pub fn spec(&self) -> MetricSpec {
		MetricSpec {
			name: self.name.clone(),
			dtype: self.dtype,
			dependencies: self.deps.clone(),
			filter: self.filter.clone(),
		}
	}
}

impl Debug for Metric {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Metric({}, {:?}, deps {:?})", self.name, self.dtype, self.deps)
	}
}

impl PartialEq for Metric {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name && self.dtype == other.dtype && self.deps == other.deps && self.filter == other.filter
	}
}

/// Registry-bound metric description as persisted in a run config:
/// name + dtype + dependencies + filter. The body is looked up by name at
/// load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
	pub name: String,
	pub dtype: MetricDtype,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub filter: Option<AttributeFilter>,
}

impl MetricSpec {
	/// Checks the spec against the registry metric it names.
	pub fn check_against(&self, registered: &Metric) -> Result<()> {
		ensure!(
			self.dtype == registered.dtype,
			"metric '{}' declares dtype {:?} but the registry provides {:?}",
			self.name,
			self.dtype,
			registered.dtype
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entry_name_format() {
		let metric = Metric::new("mean", MetricDtype::Float64, &[], |v, _| {
			v.iter().sum::<f64>() / v.len() as f64
		});
		assert_eq!(metric.entry_name("Z"), "m_Z_mean");
		assert_eq!(metric.entry_name("NumberOfReturns"), "m_NumberOfReturns_mean");
	}

	#[test]
	fn filter_ops() {
		assert!(FilterOp::Eq.matches(1.0, 1.0));
		assert!(FilterOp::Ne.matches(1.0, 2.0));
		assert!(FilterOp::Lt.matches(1.0, 2.0));
		assert!(FilterOp::Le.matches(2.0, 2.0));
		assert!(FilterOp::Gt.matches(3.0, 2.0));
		assert!(FilterOp::Ge.matches(2.0, 2.0));
		assert!(!FilterOp::Eq.matches(f64::NAN, f64::NAN));
	}

	#[test]
	fn spec_roundtrip() {
		let metric = Metric::new("mean", MetricDtype::Float64, &["median"], |_, d| d[0])
			.with_filter(AttributeFilter::new("NumberOfReturns", FilterOp::Eq, 1.0));
		let json = serde_json::to_string(&metric.spec()).unwrap();
		let spec: MetricSpec = serde_json::from_str(&json).unwrap();
		assert_eq!(spec, metric.spec());
		assert_eq!(spec.dependencies, vec!["median"]);
		assert_eq!(spec.filter.unwrap().op, FilterOp::Eq);
	}
}
