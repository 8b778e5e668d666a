//! Cell indexing and group-by for one tile.
//!
//! Takes the tile's point batch, drops points outside the tile's half-open
//! ownership, computes globally consistent cell indices from the *root*
//! bounds, and groups the retained attributes by cell.

use crate::types::{CellGroup, Extents, GroupedCells, PointBatch};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Arranges a tile's point batch into grouped cells.
///
/// Rules:
/// - points with `X >= tile.maxx` or `Y >= tile.maxy` belong to a neighbor
///   tile and are dropped (half-open ownership, no double counting);
/// - `NaN` coordinates are dropped;
/// - indices are floored against the root bounds so they are identical no
///   matter which tiling produced the tile;
/// - per-cell vectors keep input-row order and are parallel across
///   attributes.
///
/// Returns `Ok(None)` when no points remain.
pub fn arrange(batch: &PointBatch, tile: &Extents, attrs: &[String]) -> Result<Option<GroupedCells>> {
	let xs = batch.x()?;
	let ys = batch.y()?;

	let mut columns: Vec<&[f64]> = Vec::with_capacity(attrs.len());
	for name in attrs {
		let column = batch
			.column(name)
			.with_context(|| format!("unexpected attribute '{name}' missing from point batch"))?;
		columns.push(column);
	}

	let bounds = tile.bounds();
	let geo = tile.geo_rect();

	let mut cells: Vec<CellGroup> = Vec::new();
	let mut index: HashMap<(u32, u32), usize> = HashMap::new();

	for row in 0..batch.len() {
		let (x, y) = (xs[row], ys[row]);
		if x.is_nan() || y.is_nan() {
			continue;
		}
		if x >= geo.maxx || y >= geo.maxy {
			continue;
		}
		let Some((xi, yi)) = bounds.cell_of(x, y) else {
			continue;
		};

		let slot = *index.entry((xi, yi)).or_insert_with(|| {
			cells.push(CellGroup {
				xi,
				yi,
				values: vec![Vec::new(); attrs.len()],
			});
			cells.len() - 1
		});
		for (ai, column) in columns.iter().enumerate() {
			cells[slot].values[ai].push(column[row]);
		}
	}

	if cells.is_empty() {
		return Ok(None);
	}

	Ok(Some(GroupedCells {
		attrs: attrs.to_vec(),
		cells,
	}))
}
