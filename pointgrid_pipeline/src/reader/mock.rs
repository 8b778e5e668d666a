//! Mock point reader for tests and demos.
//!
//! Serves a fixed in-memory batch, filtered per query window, so pipeline
//! behavior can be verified without any file I/O.

use super::{PointReader, QuickInfo};
use anyhow::{Result, bail};
use async_trait::async_trait;
use pointgrid_core::{GeoRect, PointBatch};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory implementation of [`PointReader`].
pub struct MockPointReader {
	batch: PointBatch,
	bounds: GeoRect,
	srs: Option<String>,
	fail_reads: AtomicBool,
}

impl MockPointReader {
	/// Creates a mock reader over explicit columns. `bounds` doubles as the
	/// quick-info answer.
	pub fn new(bounds: GeoRect, columns: Vec<(String, Vec<f64>)>) -> Result<MockPointReader> {
		let mut batch = PointBatch::new();
		for (name, values) in columns {
			batch.push_column(&name, values)?;
		}
		batch.x()?;
		batch.y()?;
		Ok(MockPointReader {
			batch,
			bounds,
			srs: None,
			fail_reads: AtomicBool::new(false),
		})
	}

	/// Mock reader over bare (x, y, z) points.
	pub fn from_xyz(bounds: GeoRect, points: &[(f64, f64, f64)]) -> Result<MockPointReader> {
		MockPointReader::new(
			bounds,
			vec![
				("X".to_string(), points.iter().map(|p| p.0).collect()),
				("Y".to_string(), points.iter().map(|p| p.1).collect()),
				("Z".to_string(), points.iter().map(|p| p.2).collect()),
			],
		)
	}

	/// Dense fixture: `per_cell` points in every cell of a
	/// `cells` × `cells` grid with unit cell size, `Z` equal to the cell's
	/// row index.
	pub fn grid(cells: u32, per_cell: u32) -> Result<MockPointReader> {
		let mut xs = Vec::new();
		let mut ys = Vec::new();
		let mut zs = Vec::new();
		for yi in 0..cells {
			for xi in 0..cells {
				for p in 0..per_cell {
					let step = f64::from(p + 1) / f64::from(per_cell + 2);
					xs.push(f64::from(xi) + step);
					ys.push(f64::from(yi) + step);
					zs.push(f64::from(yi));
				}
			}
		}
		MockPointReader::new(
			GeoRect::new(0.0, 0.0, f64::from(cells), f64::from(cells))?,
			vec![
				("X".to_string(), xs),
				("Y".to_string(), ys),
				("Z".to_string(), zs),
			],
		)
	}

	#[must_use]
	pub fn with_srs(mut self, srs: &str) -> MockPointReader {
		self.srs = Some(srs.to_string());
		self
	}

	/// Makes every subsequent `read` fail, for error-path tests.
	pub fn fail_reads(&self) {
		self.fail_reads.store(true, Ordering::SeqCst);
	}
}

#[async_trait]
impl PointReader for MockPointReader {
	async fn quick_info(&self) -> Result<QuickInfo> {
		Ok(QuickInfo {
			bounds: self.bounds,
			srs: self.srs.clone(),
			point_count: self.batch.len() as u64,
		})
	}

	async fn read(&self, rect: &GeoRect) -> Result<Option<PointBatch>> {
		if self.fail_reads.load(Ordering::SeqCst) {
			bail!("mock reader failure");
		}

		let xs = self.batch.x()?;
		let ys = self.batch.y()?;
		let keep: Vec<usize> = (0..self.batch.len())
			.filter(|&row| rect.contains_point(xs[row], ys[row]))
			.collect();
		if keep.is_empty() {
			return Ok(None);
		}

		let mut filtered = PointBatch::new();
		for name in self.batch.column_names() {
			let column = self.batch.column(name).unwrap();
			filtered.push_column(name, keep.iter().map(|&row| column[row]).collect())?;
		}
		Ok(Some(filtered))
	}
}

impl Default for MockPointReader {
	fn default() -> Self {
		MockPointReader::grid(4, 4).unwrap()
	}
}
