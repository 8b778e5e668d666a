use anyhow::{Result, ensure};
use std::fmt::Debug;

/// A columnar table of points: one dense `f64` vector per attribute, all of
/// equal length. Column order is stable and matches the order in which
/// columns were pushed (the configured attribute order).
///
/// A batch always carries at least `X` and `Y`; readers add `Z` and any
/// further per-point attributes (Intensity, Classification, ...).
#[derive(Clone, PartialEq)]
pub struct PointBatch {
	columns: Vec<(String, Vec<f64>)>,
	len: usize,
}

impl PointBatch {
	#[must_use]
	pub fn new() -> PointBatch {
		PointBatch {
			columns: Vec::new(),
			len: 0,
		}
	}

	/// Appends a column. The first column fixes the row count; every later
	/// column must match it, and names must be unique.
	pub fn push_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
		ensure!(
			self.column(name).is_none(),
			"duplicate column '{name}' in point batch"
		);
		if self.columns.is_empty() {
			self.len = values.len();
		} else {
			ensure!(
				values.len() == self.len,
				"column '{name}' has {} rows, expected {}",
				values.len(),
				self.len
			);
		}
		self.columns.push((name.to_string(), values));
		Ok(())
	}

	/// Number of points in the batch.
	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Looks up a column by attribute name.
	#[must_use]
	pub fn column(&self, name: &str) -> Option<&[f64]> {
		self
			.columns
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, v)| v.as_slice())
	}

	/// Column names in stable order.
	#[must_use]
	pub fn column_names(&self) -> Vec<&str> {
		self.columns.iter().map(|(n, _)| n.as_str()).collect()
	}

	/// The mandatory X column.
	pub fn x(&self) -> Result<&[f64]> {
		self.column("X").ok_or_else(|| anyhow::anyhow!("point batch has no X column"))
	}

	/// The mandatory Y column.
	pub fn y(&self) -> Result<&[f64]> {
		self.column("Y").ok_or_else(|| anyhow::anyhow!("point batch has no Y column"))
	}
}

impl Default for PointBatch {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for PointBatch {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "PointBatch({} points, {:?})", self.len, self.column_names())
	}
}
