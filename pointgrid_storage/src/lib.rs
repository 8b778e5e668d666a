//! SQLite-backed sparse array store for per-cell grid metrics.

pub mod codec;
pub mod store;

pub use store::*;
