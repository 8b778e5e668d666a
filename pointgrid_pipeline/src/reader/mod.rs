//! Point-cloud readers.
//!
//! A [`PointReader`] materializes columnar point batches for tile-sized
//! bounding boxes and answers a quick-info query for layer bounds and SRS.
//! Readers must tolerate concurrent `read` calls from parallel tile
//! workers; sources that are thread-hostile keep one file handle per
//! invocation and honor the `threads` option.

mod clip;
mod las;
mod mock;

pub use clip::*;
pub use las::*;
pub use mock::*;

use anyhow::Result;
use async_trait::async_trait;
use pointgrid_core::{GeoRect, PointBatch};

/// Summary information a reader can answer without scanning the points.
#[derive(Clone, Debug, PartialEq)]
pub struct QuickInfo {
	pub bounds: GeoRect,
	pub srs: Option<String>,
	pub point_count: u64,
}

/// Options shared by reader implementations.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
	/// Worker-thread cap for a single `read` invocation. Thread-hostile
	/// sources are pinned to 1; parallelism then comes from concurrent
	/// invocations with independent handles.
	pub threads: usize,
	/// Optional WKT `POLYGON` clip applied after the bounding-box filter.
	pub polygon: Option<String>,
}

impl Default for ReaderOptions {
	fn default() -> Self {
		ReaderOptions {
			threads: 1,
			polygon: None,
		}
	}
}

/// A source of columnar point batches.
#[async_trait]
pub trait PointReader: Send + Sync {
	/// Layer bounds, SRS and point count without reading point data.
	async fn quick_info(&self) -> Result<QuickInfo>;

	/// Reads every point whose (X, Y) lies within `rect` (minimum edges
	/// inclusive, maximum edges exclusive). Returns `None` when the window
	/// holds no points. Column order is stable across calls.
	async fn read(&self, rect: &GeoRect) -> Result<Option<PointBatch>>;
}
