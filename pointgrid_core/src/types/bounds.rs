use super::GeoRect;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// The root layer rectangle together with the cell size, deriving the
/// integer raster grid every cell index is computed against.
///
/// `xi_count` and `yi_count` are the ceilings of the x/y ranges divided by
/// the cell size, so partial cells at the maximum edges are counted as full
/// grid columns/rows. `Bounds` is immutable after construction and is
/// shared read-only by every worker; cell indices MUST always be derived
/// from the root bounds, never from a tile's local origin, so that indices
/// stay identical across runs and tilings.
///
/// # Examples
///
/// ```
/// use pointgrid_core::{Bounds, GeoRect};
///
/// let bounds = Bounds::new(GeoRect::new(0.0, 0.0, 10.0, 10.0).unwrap(), 1.0).unwrap();
/// assert_eq!((bounds.xi_count, bounds.yi_count), (10, 10));
/// assert_eq!(bounds.cell_of(2.5, 7.0), Some((2, 7)));
/// assert_eq!(bounds.cell_of(10.0, 0.0), None);
/// ```
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
	pub rect: GeoRect,
	pub cell_size: f64,
	/// Number of grid columns.
	pub xi_count: u32,
	/// Number of grid rows.
	pub yi_count: u32,
}

impl Bounds {
	/// Creates new `Bounds` from a layer rectangle and a cell size.
	///
	/// # Errors
	///
	/// Returns an error if the cell size is not strictly positive and
	/// finite, or if the rectangle has zero width or height.
	pub fn new(rect: GeoRect, cell_size: f64) -> Result<Bounds> {
		ensure!(
			cell_size.is_finite() && cell_size > 0.0,
			"cell size ({cell_size}) must be positive"
		);
		ensure!(rect.width() > 0.0, "layer width ({}) must be > 0", rect.width());
		ensure!(rect.height() > 0.0, "layer height ({}) must be > 0", rect.height());

		let xi_count = (rect.width() / cell_size).ceil() as u32;
		let yi_count = (rect.height() / cell_size).ceil() as u32;

		Ok(Bounds {
			rect,
			cell_size,
			xi_count,
			yi_count,
		})
	}

	/// Returns the integer cell index `(xi, yi)` of a point, or `None` if
	/// the point is `NaN`, left/below the layer, or at/right of the maximum
	/// grid edge.
	///
	/// Coordinates exactly on an interior cell boundary land in the higher
	/// cell (standard floor semantics).
	#[must_use]
	pub fn cell_of(&self, x: f64, y: f64) -> Option<(u32, u32)> {
		if !x.is_finite() || !y.is_finite() {
			return None;
		}
		let xi = ((x - self.rect.minx) / self.cell_size).floor();
		let yi = ((y - self.rect.miny) / self.cell_size).floor();
		if xi < 0.0 || yi < 0.0 {
			return None;
		}
		let (xi, yi) = (xi as u32, yi as u32);
		if xi >= self.xi_count || yi >= self.yi_count {
			return None;
		}
		Some((xi, yi))
	}

	/// Total number of grid cells.
	#[must_use]
	pub fn cell_count(&self) -> u64 {
		u64::from(self.xi_count) * u64::from(self.yi_count)
	}
}

impl Debug for Bounds {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"Bounds({:?}, cell {}, {}x{})",
			self.rect, self.cell_size, self.xi_count, self.yi_count
		)
	}
}
