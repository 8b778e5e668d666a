//! Dependency-graph evaluation of metrics over grouped cells.
//!
//! The requested metrics and their transitive dependencies form a DAG whose
//! nodes are evaluated in a deterministic topological order, once per cell
//! and attribute. Metrics sharing an attribute are computed in a single
//! pass over the cell's vector; dependency values are handed to dependents
//! alongside the raw vector.

use crate::metric::{Metric, MetricDtype, SENTINEL};
use crate::registry;
use anyhow::{Context, Result, bail, ensure};
use pointgrid_core::GroupedCells;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One scalar output column, named `m_{attr}_{metric}`.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricColumn {
	pub name: String,
	pub dtype: MetricDtype,
	pub values: Vec<f64>,
}

/// The executor's output for one tile: cell indices, per-cell point counts,
/// the raw attribute vectors, and every computed metric column. Row order
/// across all vectors is identical; it is otherwise unspecified.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTable {
	pub xs: Vec<u32>,
	pub ys: Vec<u32>,
	pub count: Vec<i64>,
	/// Ragged per-cell value vectors, one entry per retained attribute.
	pub raw: Vec<(String, Vec<Vec<f64>>)>,
	pub metrics: Vec<MetricColumn>,
}

impl MetricTable {
	/// Number of cell rows.
	#[must_use]
	pub fn len(&self) -> usize {
		self.xs.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.xs.is_empty()
	}

	/// Total point count over all cells.
	#[must_use]
	pub fn point_count(&self) -> u64 {
		self.count.iter().map(|&c| c as u64).sum()
	}

	/// Looks up a metric column by its full storage name.
	#[must_use]
	pub fn metric_column(&self, name: &str) -> Option<&MetricColumn> {
		self.metrics.iter().find(|c| c.name == name)
	}

	/// Row index of a cell.
	#[must_use]
	pub fn row_of(&self, xi: u32, yi: u32) -> Option<usize> {
		self.xs.iter().zip(&self.ys).position(|(&x, &y)| x == xi && y == yi)
	}
}

/// A validated, topologically ordered metric DAG, reusable across tiles.
///
/// Dependencies pulled in from the registry become full nodes: their values
/// are materialized as columns of the output table alongside the requested
/// metrics, so dependents always find their inputs next to them.
#[derive(Debug)]
pub struct MetricGraph {
	/// Evaluation order; requested metrics and pulled-in dependencies.
	order: Vec<Metric>,
}

impl MetricGraph {
	/// Builds the graph for the requested metrics: pulls in transitive
	/// dependencies from the registry, verifies acyclicity, and fixes a
	/// deterministic topological order (ties broken by metric name).
	pub fn build(requested: &[Metric]) -> Result<MetricGraph> {
		ensure!(!requested.is_empty(), "no metrics requested");

		// transitive closure over dependency names
		let mut nodes: BTreeMap<String, Metric> = BTreeMap::new();
		let mut todo: Vec<Metric> = requested.to_vec();
		while let Some(metric) = todo.pop() {
			if nodes.contains_key(&metric.name) {
				continue;
			}
			for dep in &metric.deps {
				if !nodes.contains_key(dep) {
					let pulled = registry::find(dep)
						.with_context(|| format!("metric '{}' depends on '{dep}'", metric.name))?;
					todo.push(pulled);
				}
			}
			nodes.insert(metric.name.clone(), metric);
		}

		// Kahn's algorithm; the ready set is name-ordered so the order is
		// stable for a given node set
		let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
		let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
		for metric in nodes.values() {
			indegree.entry(&metric.name).or_insert(0);
			for dep in &metric.deps {
				*indegree.entry(&metric.name).or_insert(0) += 1;
				dependents.entry(dep).or_default().push(&metric.name);
			}
		}

		let mut ready: BTreeSet<&str> = indegree
			.iter()
			.filter(|&(_, &d)| d == 0)
			.map(|(&name, _)| name)
			.collect();
		let mut order: Vec<Metric> = Vec::with_capacity(nodes.len());

		while let Some(name) = ready.pop_first() {
			if let Some(deps) = dependents.get(name) {
				for &dependent in deps {
					let d = indegree.get_mut(dependent).unwrap();
					*d -= 1;
					if *d == 0 {
						ready.insert(dependent);
					}
				}
			}
			order.push(nodes[name].clone());
		}

		if order.len() != nodes.len() {
			let stuck: Vec<&str> = indegree
				.iter()
				.filter(|&(_, &d)| d > 0)
				.map(|(&name, _)| name)
				.collect();
			bail!("metric dependency cycle involving {stuck:?}");
		}

		Ok(MetricGraph { order })
	}

	/// The evaluation order (dependencies before dependents).
	#[must_use]
	pub fn order(&self) -> Vec<&str> {
		self.order.iter().map(|m| m.name.as_str()).collect()
	}

	/// Every node of the graph in evaluation order; this is also the metric
	/// set a store schema must provide columns for.
	#[must_use]
	pub fn metrics(&self) -> &[Metric] {
		&self.order
	}

	/// Evaluates every (metric, attr) node over the grouped cells of one
	/// tile and assembles the output table.
	pub fn run(&self, grouped: &GroupedCells) -> Result<MetricTable> {
		let attrs = &grouped.attrs;

		let mut table = MetricTable {
			xs: Vec::with_capacity(grouped.cells.len()),
			ys: Vec::with_capacity(grouped.cells.len()),
			count: Vec::with_capacity(grouped.cells.len()),
			raw: attrs
				.iter()
				.map(|a| (a.clone(), Vec::with_capacity(grouped.cells.len())))
				.collect(),
			metrics: Vec::new(),
		};
		for attr in attrs {
			for metric in &self.order {
				table.metrics.push(MetricColumn {
					name: metric.entry_name(attr),
					dtype: metric.dtype,
					values: Vec::with_capacity(grouped.cells.len()),
				});
			}
		}

		for cell in &grouped.cells {
			table.xs.push(cell.xi);
			table.ys.push(cell.yi);
			table.count.push(cell.count() as i64);
			for (ai, (_, ragged)) in table.raw.iter_mut().enumerate() {
				ragged.push(cell.values[ai].clone());
			}

			let mut column = 0;
			for (ai, _attr) in attrs.iter().enumerate() {
				let vector = &cell.values[ai];

				// all metrics of one attribute share this pass over the cell
				let mut computed: HashMap<&str, f64> = HashMap::with_capacity(self.order.len());
				for metric in &self.order {
					let deps: Vec<f64> = metric.deps.iter().map(|d| computed[d.as_str()]).collect();

					let value = match &metric.filter {
						None => metric.eval(vector, &deps),
						Some(filter) => {
							let fi = grouped
								.attr_index(&filter.attr)
								.with_context(|| format!("filter attribute '{}' not retained", filter.attr))?;
							let mask = &cell.values[fi];
							let input: Vec<f64> = vector
								.iter()
								.zip(mask)
								.filter(|&(_, &m)| filter.op.matches(m, filter.value))
								.map(|(&v, _)| v)
								.collect();
							if input.is_empty() {
								SENTINEL
							} else {
								metric.eval(&input, &deps)
							}
						}
					};
					computed.insert(&metric.name, value);
					table.metrics[column].values.push(value);
					column += 1;
				}
			}
		}

		Ok(table)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metric::{AttributeFilter, FilterOp};
	use approx::assert_relative_eq;
	use pointgrid_core::{CellGroup, GroupedCells};

	fn grouped_one_cell(attrs: &[&str], values: &[&[f64]]) -> GroupedCells {
		GroupedCells {
			attrs: attrs.iter().map(|a| (*a).to_string()).collect(),
			cells: vec![CellGroup {
				xi: 3,
				yi: 4,
				values: values.iter().map(|v| v.to_vec()).collect(),
			}],
		}
	}

	#[test]
	fn constant_z_cell() {
		let z = vec![42.0; 10];
		let grouped = grouped_one_cell(&["Z"], &[&z]);
		let metrics = registry::resolve_names(
			&["count", "mean", "stddev", "min", "max", "crr"].map(String::from),
		)
		.unwrap();
		let table = MetricGraph::build(&metrics).unwrap().run(&grouped).unwrap();

		assert_eq!(table.len(), 1);
		assert_eq!((table.xs[0], table.ys[0]), (3, 4));
		assert_eq!(table.count[0], 10);
		assert_eq!(table.metric_column("m_Z_count").unwrap().values[0], 10.0);
		assert_eq!(table.metric_column("m_Z_mean").unwrap().values[0], 42.0);
		assert_eq!(table.metric_column("m_Z_stddev").unwrap().values[0], 0.0);
		assert_eq!(table.metric_column("m_Z_min").unwrap().values[0], 42.0);
		assert_eq!(table.metric_column("m_Z_max").unwrap().values[0], 42.0);
		assert_eq!(table.metric_column("m_Z_crr").unwrap().values[0], SENTINEL);
	}

	#[test]
	fn count_matches_vector_length() {
		let grouped = GroupedCells {
			attrs: vec!["Z".to_string()],
			cells: vec![
				CellGroup {
					xi: 0,
					yi: 0,
					values: vec![vec![1.0; 6]],
				},
				CellGroup {
					xi: 1,
					yi: 0,
					values: vec![vec![2.0; 4]],
				},
			],
		};
		let metrics = registry::resolve_names(&["count".to_string()]).unwrap();
		let table = MetricGraph::build(&metrics).unwrap().run(&grouped).unwrap();

		assert_eq!(table.len(), 2);
		for row in 0..table.len() {
			assert_eq!(
				table.count[row] as usize,
				table.raw[0].1[row].len(),
				"count must equal the raw vector length"
			);
			assert_eq!(table.metric_column("m_Z_count").unwrap().values[row], table.count[row] as f64);
		}
		assert_eq!(table.point_count(), 10);
	}

	#[test]
	fn dependencies_are_pulled_in_and_ordered() {
		let metrics = registry::resolve_names(&["cv".to_string()]).unwrap();
		let graph = MetricGraph::build(&metrics).unwrap();
		let order = graph.order();

		assert!(order.contains(&"mean") && order.contains(&"stddev"));
		let cv = order.iter().position(|&n| n == "cv").unwrap();
		assert!(order.iter().position(|&n| n == "mean").unwrap() < cv);
		assert!(order.iter().position(|&n| n == "stddev").unwrap() < cv);

		// pulled-in dependencies materialize as columns next to the
		// requested metric
		let grouped = grouped_one_cell(&["Z"], &[&[1.0, 2.0, 3.0, 4.0]]);
		let table = graph.run(&grouped).unwrap();
		assert_eq!(table.metrics.len(), 3);
		assert!(table.metric_column("m_Z_cv").is_some());
		assert!(table.metric_column("m_Z_mean").is_some());
		assert!(table.metric_column("m_Z_stddev").is_some());
	}

	#[test]
	fn dependency_values_match_direct_evaluation() {
		let v = [1.0, 2.0, 4.0, 8.0, 16.0];
		let grouped = grouped_one_cell(&["Z"], &[&v]);
		let metrics = registry::resolve_names(&["cv", "mean", "stddev"].map(String::from)).unwrap();
		let table = MetricGraph::build(&metrics).unwrap().run(&grouped).unwrap();

		let mean = table.metric_column("m_Z_mean").unwrap().values[0];
		let stddev = table.metric_column("m_Z_stddev").unwrap().values[0];
		let cv = table.metric_column("m_Z_cv").unwrap().values[0];
		assert_relative_eq!(cv, stddev / mean, epsilon = 1e-12);
	}

	#[test]
	fn deterministic_order() {
		let metrics = registry::grid_metrics();
		let a = MetricGraph::build(&metrics).unwrap().order().join(",");
		let b = MetricGraph::build(&metrics).unwrap().order().join(",");
		assert_eq!(a, b);
	}

	#[test]
	fn cycle_is_rejected() {
		let a = registry::find("mean").unwrap().with_deps(&["median"]);
		let b = registry::find("median").unwrap().with_deps(&["mean"]);
		let err = MetricGraph::build(&[a, b]).unwrap_err();
		assert!(err.to_string().contains("cycle"));
	}

	#[test]
	fn missing_dependency_is_rejected() {
		let broken = registry::find("mean").unwrap().with_deps(&["no_such_metric"]);
		assert!(MetricGraph::build(&[broken]).is_err());
	}

	#[test]
	fn filtered_metric_masks_input_but_not_raw_column() {
		let nor = [1.0, 1.0, 2.0, 3.0];
		let grouped = grouped_one_cell(&["NumberOfReturns"], &[&nor]);

		let filtered = registry::find("mean")
			.unwrap()
			.with_filter(AttributeFilter::new("NumberOfReturns", FilterOp::Eq, 1.0));
		let table = MetricGraph::build(&[filtered]).unwrap().run(&grouped).unwrap();

		assert_eq!(table.metric_column("m_NumberOfReturns_mean").unwrap().values[0], 1.0);
		// the raw column keeps all four values
		assert_eq!(table.raw[0].1[0], nor.to_vec());
	}

	#[test]
	fn fully_filtered_cell_yields_sentinel() {
		let grouped = grouped_one_cell(&["Z"], &[&[5.0, 5.0]]);
		let filtered = registry::find("mean")
			.unwrap()
			.with_filter(AttributeFilter::new("Z", FilterOp::Gt, 100.0));
		let table = MetricGraph::build(&[filtered]).unwrap().run(&grouped).unwrap();
		assert_eq!(table.metric_column("m_Z_mean").unwrap().values[0], SENTINEL);
	}

	#[test]
	fn multiple_attributes_get_their_own_columns() {
		let grouped = grouped_one_cell(&["Z", "Intensity"], &[&[1.0, 3.0], &[10.0, 30.0]]);
		let metrics = registry::resolve_names(&["mean".to_string()]).unwrap();
		let table = MetricGraph::build(&metrics).unwrap().run(&grouped).unwrap();

		assert_eq!(table.metric_column("m_Z_mean").unwrap().values[0], 2.0);
		assert_eq!(table.metric_column("m_Intensity_mean").unwrap().values[0], 20.0);
	}
}
