//! Ragged-column encoding.
//!
//! Per-cell value vectors are stored as little-endian f64 blobs. SQLite
//! holds variable-length blobs natively, so no trailing sentinel element is
//! needed to coerce the vector shape.

use anyhow::{Result, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Encodes a value vector as a little-endian f64 blob.
#[must_use]
pub fn encode_values(values: &[f64]) -> Vec<u8> {
	let mut blob = Vec::with_capacity(values.len() * 8);
	for &v in values {
		// writing to a Vec cannot fail
		blob.write_f64::<LittleEndian>(v).unwrap();
	}
	blob
}

/// Decodes a blob written by [`encode_values`].
pub fn decode_values(blob: &[u8]) -> Result<Vec<f64>> {
	ensure!(
		blob.len() % 8 == 0,
		"ragged column blob length ({}) is not a multiple of 8",
		blob.len()
	);
	let mut cursor = blob;
	let mut values = Vec::with_capacity(blob.len() / 8);
	while !cursor.is_empty() {
		values.push(cursor.read_f64::<LittleEndian>()?);
	}
	Ok(values)
}
