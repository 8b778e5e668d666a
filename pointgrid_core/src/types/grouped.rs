use std::fmt::Debug;

/// The point values of one grid cell: parallel vectors, one per retained
/// attribute, in the order of [`GroupedCells::attrs`]. All vectors of a cell
/// have identical length and every cell holds at least one point.
#[derive(Clone, PartialEq)]
pub struct CellGroup {
	pub xi: u32,
	pub yi: u32,
	pub values: Vec<Vec<f64>>,
}

impl CellGroup {
	/// Number of points in the cell.
	#[must_use]
	pub fn count(&self) -> usize {
		self.values.first().map_or(0, Vec::len)
	}
}

impl Debug for CellGroup {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "CellGroup(({}, {}), {} points)", self.xi, self.yi, self.count())
	}
}

/// The arranger's output for one tile: every non-empty cell with its
/// per-attribute value vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedCells {
	/// Retained attribute names; `CellGroup::values` is parallel to this.
	pub attrs: Vec<String>,
	pub cells: Vec<CellGroup>,
}

impl GroupedCells {
	/// Index of an attribute within the per-cell value vectors.
	#[must_use]
	pub fn attr_index(&self, name: &str) -> Option<usize> {
		self.attrs.iter().position(|a| a == name)
	}

	/// Total point count over all cells.
	#[must_use]
	pub fn point_count(&self) -> u64 {
		self.cells.iter().map(|c| c.count() as u64).sum()
	}
}
