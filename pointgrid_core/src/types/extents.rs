//! Tile extents over the root cell grid.
//!
//! An [`Extents`] is a rectangular, grid-aligned sub-region of the root
//! [`Bounds`], addressed in inclusive cell indices. Tiling subdivides the
//! root into row-major leaves of at most `tile_size` × `tile_size` cells;
//! every cell of the root belongs to exactly one leaf.

use super::{Bounds, CellMbr, GeoRect};
use anyhow::{Result, ensure};
use std::fmt::Debug;

/// A rectangular batch of cells within the root grid, processed atomically.
///
/// Coordinates are inclusive cell indices: an `Extents` spans
/// `[x_min..=x_max] × [y_min..=y_max]`. Tile ownership of points follows
/// the half-open rule — a point on a tile's maximum geographic edge belongs
/// to the neighboring tile.
#[derive(Clone, Copy, PartialEq)]
pub struct Extents {
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
	bounds: Bounds,
}

impl Extents {
	/// Creates an `Extents` from inclusive cell-index ranges within `bounds`.
	///
	/// # Errors
	///
	/// Returns an error if a minimum exceeds its maximum or a maximum lies
	/// outside the grid.
	pub fn new(bounds: Bounds, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<Extents> {
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		ensure!(
			x_max < bounds.xi_count,
			"x_max ({x_max}) must be < xi_count ({})",
			bounds.xi_count
		);
		ensure!(
			y_max < bounds.yi_count,
			"y_max ({y_max}) must be < yi_count ({})",
			bounds.yi_count
		);
		Ok(Extents {
			x_min,
			y_min,
			x_max,
			y_max,
			bounds,
		})
	}

	/// The extents covering the whole root grid.
	pub fn full(bounds: Bounds) -> Result<Extents> {
		Extents::new(bounds, 0, 0, bounds.xi_count - 1, bounds.yi_count - 1)
	}

	/// The root bounds this extents is addressed against.
	#[must_use]
	pub fn bounds(&self) -> &Bounds {
		&self.bounds
	}

	/// Number of cell columns covered.
	#[must_use]
	pub fn width(&self) -> u32 {
		self.x_max - self.x_min + 1
	}

	/// Number of cell rows covered.
	#[must_use]
	pub fn height(&self) -> u32 {
		self.y_max - self.y_min + 1
	}

	/// Number of cells covered.
	#[must_use]
	pub fn cell_count(&self) -> u64 {
		u64::from(self.width()) * u64::from(self.height())
	}

	/// Maps the extents back to layer coordinates for the reader query.
	///
	/// The maximum edges are the geographic upper boundaries of the covered
	/// cells, so for edge tiles they may exceed the layer rectangle by the
	/// partial-cell remainder.
	#[must_use]
	pub fn geo_rect(&self) -> GeoRect {
		let b = &self.bounds;
		GeoRect {
			minx: b.rect.minx + f64::from(self.x_min) * b.cell_size,
			miny: b.rect.miny + f64::from(self.y_min) * b.cell_size,
			maxx: b.rect.minx + f64::from(self.x_max + 1) * b.cell_size,
			maxy: b.rect.miny + f64::from(self.y_max + 1) * b.cell_size,
		}
	}

	/// The minimum bounding rectangle recorded for this tile.
	#[must_use]
	pub fn mbr(&self) -> CellMbr {
		CellMbr::new(self.x_min, self.y_min, self.x_max, self.y_max)
	}

	/// Resume test: true iff this tile shares no cell with a previously
	/// written MBR.
	#[must_use]
	pub fn disjoint_by_mbr(&self, mbr: &CellMbr) -> bool {
		!self.mbr().intersects(mbr)
	}

	/// Subdivides into leaves of at most `tile_size` × `tile_size` cells,
	/// covering this extents exactly once. Edge leaves are clipped to the
	/// remaining cell range. The traversal happens to be row-major, but
	/// callers must not rely on the order.
	pub fn leaves(&self, tile_size: u32) -> Result<Leaves> {
		ensure!(tile_size > 0, "tile size must be > 0");
		Ok(Leaves {
			extents: *self,
			tile_size,
			x: self.x_min,
			y: self.y_min,
			done: false,
		})
	}
}

impl Debug for Extents {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"Extents([{}..{}]x[{}..{}])",
			self.x_min, self.x_max, self.y_min, self.y_max
		)
	}
}

/// Row-major iterator over the leaf tiles of an [`Extents`].
pub struct Leaves {
	extents: Extents,
	tile_size: u32,
	x: u32,
	y: u32,
	done: bool,
}

impl Iterator for Leaves {
	type Item = Extents;

	fn next(&mut self) -> Option<Extents> {
		if self.done {
			return None;
		}

		let e = &self.extents;
		let x_max = (self.x + self.tile_size - 1).min(e.x_max);
		let y_max = (self.y + self.tile_size - 1).min(e.y_max);
		let leaf = Extents {
			x_min: self.x,
			y_min: self.y,
			x_max,
			y_max,
			bounds: e.bounds,
		};

		// advance row-major
		if x_max < e.x_max {
			self.x = x_max + 1;
		} else if y_max < e.y_max {
			self.x = e.x_min;
			self.y = y_max + 1;
		} else {
			self.done = true;
		}

		Some(leaf)
	}
}
