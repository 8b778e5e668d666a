use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Minimum bounding rectangle of a completed tile, in inclusive cell
/// indices. Persisted per time slot so an interrupted run can be resumed by
/// skipping every leaf whose rectangle intersects a recorded MBR.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMbr {
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
}

impl CellMbr {
	#[must_use]
	pub fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> CellMbr {
		CellMbr {
			x_min,
			y_min,
			x_max,
			y_max,
		}
	}

	/// Returns true if the two rectangles share at least one cell.
	#[must_use]
	pub fn intersects(&self, other: &CellMbr) -> bool {
		self.x_min <= other.x_max && other.x_min <= self.x_max && self.y_min <= other.y_max && other.y_min <= self.y_max
	}
}

impl Debug for CellMbr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"CellMbr([{}..{}]x[{}..{}])",
			self.x_min, self.x_max, self.y_min, self.y_max
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intersection() {
		let a = CellMbr::new(0, 0, 3, 3);
		assert!(a.intersects(&CellMbr::new(3, 3, 5, 5)));
		assert!(a.intersects(&CellMbr::new(1, 1, 2, 2)));
		assert!(!a.intersects(&CellMbr::new(4, 0, 5, 3)));
		assert!(!a.intersects(&CellMbr::new(0, 4, 3, 5)));
	}

	#[test]
	fn serde_roundtrip() {
		let mbr = CellMbr::new(2, 4, 8, 16);
		let json = serde_json::to_string(&mbr).unwrap();
		assert_eq!(serde_json::from_str::<CellMbr>(&json).unwrap(), mbr);
	}
}
