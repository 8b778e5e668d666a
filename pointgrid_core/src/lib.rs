//! Core types for shattering point clouds into a regular cell grid:
//! bounds, extents and tiling, columnar point batches, the arranger, and
//! progress reporting.

pub mod arrange;
pub mod progress;
pub mod types;

pub use arrange::*;
pub use types::*;
