use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A rectangle (`GeoRect`) in the layer's spatial reference system, defined
/// by its minimum and maximum x and y coordinates.
///
/// Rectangles are used both as the overall layer extent and as per-tile
/// query windows for the point reader. Point containment follows the
/// half-open convention: minimum edges are inclusive, maximum edges are
/// exclusive.
///
/// # Examples
///
/// ```
/// use pointgrid_core::GeoRect;
///
/// let rect = GeoRect::new(0.0, 0.0, 10.0, 5.0).unwrap();
/// assert_eq!(rect.as_tuple(), (0.0, 0.0, 10.0, 5.0));
/// assert!(rect.contains_point(0.0, 0.0));
/// assert!(!rect.contains_point(10.0, 0.0));
/// ```
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRect {
	pub minx: f64,
	pub miny: f64,
	pub maxx: f64,
	pub maxy: f64,
}

impl GeoRect {
	/// Creates a new `GeoRect` from `minx, miny, maxx, maxy`.
	///
	/// # Errors
	///
	/// Returns an error if any coordinate is not finite or if a minimum
	/// exceeds its maximum.
	pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Result<GeoRect> {
		GeoRect { minx, miny, maxx, maxy }.checked()
	}

	/// Returns the rectangle as a tuple `(minx, miny, maxx, maxy)`.
	#[must_use]
	pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
		(self.minx, self.miny, self.maxx, self.maxy)
	}

	/// Returns the rectangle as a fixed-size array `[minx, miny, maxx, maxy]`.
	#[must_use]
	pub fn as_array(&self) -> [f64; 4] {
		[self.minx, self.miny, self.maxx, self.maxy]
	}

	/// Width of the rectangle.
	#[must_use]
	pub fn width(&self) -> f64 {
		self.maxx - self.minx
	}

	/// Height of the rectangle.
	#[must_use]
	pub fn height(&self) -> f64 {
		self.maxy - self.miny
	}

	/// Half-open containment test: minimum edges inclusive, maximum edges
	/// exclusive. `NaN` coordinates are never contained.
	#[must_use]
	pub fn contains_point(&self, x: f64, y: f64) -> bool {
		x >= self.minx && x < self.maxx && y >= self.miny && y < self.maxy
	}

	/// Returns true if the two rectangles share any area.
	#[must_use]
	pub fn overlaps(&self, other: &GeoRect) -> bool {
		self.minx < other.maxx && other.minx < self.maxx && self.miny < other.maxy && other.miny < self.maxy
	}

	fn checked(self) -> Result<Self> {
		ensure!(self.minx.is_finite(), "minx ({}) must be finite", self.minx);
		ensure!(self.miny.is_finite(), "miny ({}) must be finite", self.miny);
		ensure!(self.maxx.is_finite(), "maxx ({}) must be finite", self.maxx);
		ensure!(self.maxy.is_finite(), "maxy ({}) must be finite", self.maxy);
		ensure!(
			self.minx <= self.maxx,
			"minx ({}) must be <= maxx ({})",
			self.minx,
			self.maxx
		);
		ensure!(
			self.miny <= self.maxy,
			"miny ({}) must be <= maxy ({})",
			self.miny,
			self.maxy
		);
		Ok(self)
	}
}

impl Debug for GeoRect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "GeoRect({}, {}, {}, {})", self.minx, self.miny, self.maxx, self.maxy)
	}
}

impl TryFrom<[f64; 4]> for GeoRect {
	type Error = anyhow::Error;

	fn try_from(input: [f64; 4]) -> Result<Self> {
		GeoRect::new(input[0], input[1], input[2], input[3])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creation() {
		let rect = GeoRect::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		assert_eq!(rect.minx, -10.0);
		assert_eq!(rect.miny, -5.0);
		assert_eq!(rect.maxx, 10.0);
		assert_eq!(rect.maxy, 5.0);
		assert_eq!(rect.width(), 20.0);
		assert_eq!(rect.height(), 10.0);
	}

	#[test]
	fn invalid_ranges() {
		assert!(GeoRect::new(10.0, 0.0, -10.0, 5.0).is_err());
		assert!(GeoRect::new(0.0, 5.0, 10.0, -5.0).is_err());
		assert!(GeoRect::new(f64::NAN, 0.0, 1.0, 1.0).is_err());
		assert!(GeoRect::new(0.0, 0.0, f64::INFINITY, 1.0).is_err());
	}

	#[test]
	fn half_open_containment() {
		let rect = GeoRect::new(0.0, 0.0, 2.0, 2.0).unwrap();
		assert!(rect.contains_point(0.0, 0.0));
		assert!(rect.contains_point(1.999, 1.999));
		assert!(!rect.contains_point(2.0, 1.0));
		assert!(!rect.contains_point(1.0, 2.0));
		assert!(!rect.contains_point(f64::NAN, 1.0));
	}

	#[test]
	fn overlaps() {
		let a = GeoRect::new(0.0, 0.0, 2.0, 2.0).unwrap();
		let b = GeoRect::new(1.0, 1.0, 3.0, 3.0).unwrap();
		let c = GeoRect::new(2.0, 0.0, 4.0, 2.0).unwrap();
		assert!(a.overlaps(&b));
		// Touching edges share no area.
		assert!(!a.overlaps(&c));
	}

	#[test]
	fn debug_format() {
		let rect = GeoRect::new(-10.0, -5.0, 10.0, 5.0).unwrap();
		assert_eq!(format!("{rect:?}"), "GeoRect(-10, -5, 10, 5)");
	}
}
