//! The sparse grid store.
//!
//! One SQLite database holds every shatter run against a layer. Cells are
//! keyed by `(slot, xi, yi)`; each row carries the cell's point count, one
//! ragged blob per raw attribute and one scalar per (metric, attribute)
//! column. Layer metadata, slot reservation, per-tile MBRs and
//! consolidation live next to the cells.

use crate::codec::{decode_values, encode_values};
use anyhow::{Context, Result, ensure};
use pointgrid_core::{Bounds, CellMbr};
use pointgrid_metrics::{Metric, MetricDtype, MetricSpec, MetricTable};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::types::Value;
use r2d2_sqlite::rusqlite::{OpenFlags, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Creation config of a store, persisted under slot 0. Every later run
/// reads the layer bounds and schema from here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
	pub bounds: Bounds,
	pub attributes: Vec<String>,
	pub metrics: Vec<MetricSpec>,
}

/// One entry of the `slots` table.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotEntry {
	pub slot: u64,
	pub kind: String,
	pub config: Option<String>,
}

/// A cell read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct CellRow {
	pub count: i64,
	pub raw: Vec<(String, Vec<f64>)>,
	pub metrics: Vec<(String, f64)>,
}

impl CellRow {
	#[must_use]
	pub fn raw_column(&self, name: &str) -> Option<&[f64]> {
		self.raw.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
	}

	#[must_use]
	pub fn metric_value(&self, name: &str) -> Option<f64> {
		self.metrics.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
	}
}

/// Handle to a grid store. Cloning shares the connection pool; the handle
/// is opened once per run and shared by all workers.
#[derive(Clone)]
pub struct GridStore {
	pool: Pool<SqliteConnectionManager>,
	config: StoreConfig,
}

fn check_identifier(name: &str) -> Result<()> {
	ensure!(
		!name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
		"invalid column name '{name}'"
	);
	Ok(())
}

fn quoted(name: &str) -> String {
	format!("\"{name}\"")
}

fn sql_type(dtype: MetricDtype) -> &'static str {
	match dtype {
		MetricDtype::Float64 => "REAL",
		MetricDtype::Int32 => "INTEGER",
	}
}

fn new_pool(path: &Path, read_only: bool) -> Result<Pool<SqliteConnectionManager>> {
	let manager = if read_only {
		SqliteConnectionManager::file(path).with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY)
	} else {
		SqliteConnectionManager::file(path)
	}
	.with_init(move |conn| {
		if !read_only {
			conn.pragma_update(None, "journal_mode", "wal")?;
		}
		conn.busy_timeout(Duration::from_secs(30))
	});
	Ok(Pool::builder().max_size(10).build(manager)?)
}

impl GridStore {
	/// Creates a new store: schema from the layer bounds, the raw attribute
	/// list and the metric set; layer metadata is stamped immediately and
	/// the creation config is persisted under slot 0.
	pub fn create(
		path: &Path,
		bounds: Bounds,
		attributes: &[String],
		metrics: &[Metric],
		srs: Option<&str>,
	) -> Result<GridStore> {
		ensure!(!path.exists(), "store '{}' already exists", path.display());
		ensure!(!attributes.is_empty(), "at least one attribute is required");

		let config = StoreConfig {
			bounds,
			attributes: attributes.to_vec(),
			metrics: metrics.iter().map(Metric::spec).collect(),
		};

		let mut columns: Vec<String> = vec![
			"slot INTEGER NOT NULL".to_string(),
			"xi INTEGER NOT NULL".to_string(),
			"yi INTEGER NOT NULL".to_string(),
			"count INTEGER NOT NULL".to_string(),
		];
		for attr in attributes {
			check_identifier(attr)?;
			columns.push(format!("{} BLOB NOT NULL", quoted(attr)));
		}
		for metric in metrics {
			for attr in attributes {
				let name = metric.entry_name(attr);
				check_identifier(&name)?;
				columns.push(format!("{} {}", quoted(&name), sql_type(metric.dtype)));
			}
		}
		columns.push("PRIMARY KEY (slot, xi, yi)".to_string());

		let pool = new_pool(path, false)?;
		let conn = pool.get()?;
		conn.execute_batch(&format!(
			"CREATE TABLE metadata (name TEXT PRIMARY KEY, value TEXT NOT NULL);
			CREATE TABLE slots (slot INTEGER PRIMARY KEY, kind TEXT NOT NULL, config TEXT);
			CREATE TABLE mbrs (slot INTEGER NOT NULL, x_min INTEGER NOT NULL, y_min INTEGER NOT NULL, x_max INTEGER NOT NULL, y_max INTEGER NOT NULL);
			CREATE TABLE cells ({});",
			columns.join(", ")
		))?;

		let store = GridStore { pool, config };
		store.set_layer_metadata("LAYER_EXTENT_MINX", &bounds.rect.minx.to_string())?;
		store.set_layer_metadata("LAYER_EXTENT_MINY", &bounds.rect.miny.to_string())?;
		store.set_layer_metadata("LAYER_EXTENT_MAXX", &bounds.rect.maxx.to_string())?;
		store.set_layer_metadata("LAYER_EXTENT_MAXY", &bounds.rect.maxy.to_string())?;
		if let Some(srs) = srs {
			store.set_layer_metadata("CRS", srs)?;
		}

		conn.execute(
			"INSERT INTO slots (slot, kind, config) VALUES (0, 'config', ?1)",
			params![serde_json::to_string(&store.config)?],
		)?;

		log::info!("created store '{}'", path.display());
		Ok(store)
	}

	/// Opens an existing store in write mode.
	pub fn open(path: &Path) -> Result<GridStore> {
		GridStore::open_with(path, false)
	}

	/// Opens an existing store read-only.
	pub fn open_read_only(path: &Path) -> Result<GridStore> {
		GridStore::open_with(path, true)
	}

	fn open_with(path: &Path, read_only: bool) -> Result<GridStore> {
		ensure!(path.exists(), "store '{}' does not exist", path.display());
		let pool = new_pool(path, read_only)?;
		let json: String = pool
			.get()?
			.query_row("SELECT config FROM slots WHERE slot = 0", [], |row| row.get(0))
			.context("store carries no creation config")?;
		let config: StoreConfig = serde_json::from_str(&json).context("invalid creation config")?;
		Ok(GridStore { pool, config })
	}

	/// The creation config.
	#[must_use]
	pub fn config(&self) -> &StoreConfig {
		&self.config
	}

	/// The layer bounds the grid is derived from.
	#[must_use]
	pub fn bounds(&self) -> Bounds {
		self.config.bounds
	}

	/// Atomically allocates a fresh time slot, strictly greater than every
	/// existing one (slot 0 is reserved for the creation config).
	pub fn reserve_time_slot(&self) -> Result<u64> {
		let mut conn = self.pool.get()?;
		let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
		let slot: u64 =
			tx.query_row("SELECT IFNULL(MAX(slot), 0) + 1 FROM slots", [], |row| row.get::<_, i64>(0))? as u64;
		tx.execute(
			"INSERT INTO slots (slot, kind, config) VALUES (?1, 'reserved', NULL)",
			params![slot as i64],
		)?;
		tx.commit()?;
		log::debug!("reserved time slot {slot}");
		Ok(slot)
	}

	/// Persists a metadata blob (e.g. the run config JSON) under a slot.
	pub fn save_metadata(&self, kind: &str, blob: &str, slot: u64) -> Result<()> {
		ensure!(slot > 0, "slot 0 is reserved for the creation config");
		self.pool.get()?.execute(
			"INSERT OR REPLACE INTO slots (slot, kind, config) VALUES (?1, ?2, ?3)",
			params![slot as i64, kind, blob],
		)?;
		Ok(())
	}

	/// Reads the metadata blob of a slot, if any.
	pub fn read_metadata(&self, slot: u64) -> Result<Option<String>> {
		Ok(
			self
				.pool
				.get()?
				.query_row("SELECT config FROM slots WHERE slot = ?1", params![slot as i64], |row| {
					row.get::<_, Option<String>>(0)
				})
				.optional()?
				.flatten(),
		)
	}

	/// Every slot of the store, in ascending order.
	pub fn slots(&self) -> Result<Vec<SlotEntry>> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT slot, kind, config FROM slots ORDER BY slot")?;
		let entries = stmt
			.query_map([], |row| {
				Ok(SlotEntry {
					slot: row.get::<_, i64>(0)? as u64,
					kind: row.get(1)?,
					config: row.get(2)?,
				})
			})?
			.collect::<Result<Vec<SlotEntry>, _>>()?;
		Ok(entries)
	}

	/// Layer metadata entry (`LAYER_EXTENT_*`, `CRS`).
	pub fn layer_metadata(&self, name: &str) -> Result<Option<String>> {
		Ok(
			self
				.pool
				.get()?
				.query_row("SELECT value FROM metadata WHERE name = ?1", params![name], |row| {
					row.get(0)
				})
				.optional()?,
		)
	}

	fn set_layer_metadata(&self, name: &str, value: &str) -> Result<()> {
		self.pool.get()?.execute(
			"INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
			params![name, value],
		)?;
		Ok(())
	}

	/// Writes one completed tile under `slot`: every cell row plus the
	/// tile's MBR, in a single transaction. Tiles own disjoint cell sets by
	/// construction; a duplicate cell within a slot violates the primary
	/// key and fails the whole tile.
	pub fn write_tile(&self, slot: u64, mbr: &CellMbr, table: &MetricTable) -> Result<()> {
		ensure!(slot > 0, "slot 0 is reserved for the creation config");

		let mut names: Vec<String> = vec![
			"slot".to_string(),
			"xi".to_string(),
			"yi".to_string(),
			"count".to_string(),
		];
		for (attr, _) in &table.raw {
			check_identifier(attr)?;
			names.push(quoted(attr));
		}
		for column in &table.metrics {
			check_identifier(&column.name)?;
			names.push(quoted(&column.name));
		}
		let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
		let sql = format!(
			"INSERT INTO cells ({}) VALUES ({})",
			names.join(", "),
			placeholders.join(", ")
		);

		let mut conn = self.pool.get()?;
		let tx = conn.transaction()?;
		{
			let mut stmt = tx.prepare(&sql)?;
			for row in 0..table.len() {
				let mut values: Vec<Value> = Vec::with_capacity(names.len());
				values.push(Value::Integer(slot as i64));
				values.push(Value::Integer(i64::from(table.xs[row])));
				values.push(Value::Integer(i64::from(table.ys[row])));
				values.push(Value::Integer(table.count[row]));
				for (_, ragged) in &table.raw {
					values.push(Value::Blob(encode_values(&ragged[row])));
				}
				for column in &table.metrics {
					values.push(match column.dtype {
						MetricDtype::Float64 => Value::Real(column.values[row]),
						MetricDtype::Int32 => Value::Integer(column.values[row] as i64),
					});
				}
				stmt.execute(params_from_iter(values))?;
			}
		}
		tx.execute(
			"INSERT INTO mbrs (slot, x_min, y_min, x_max, y_max) VALUES (?1, ?2, ?3, ?4, ?5)",
			params![slot as i64, mbr.x_min, mbr.y_min, mbr.x_max, mbr.y_max],
		)?;
		tx.commit()?;
		Ok(())
	}

	/// MBRs of every tile already persisted under a slot.
	pub fn mbrs(&self, slot: u64) -> Result<Vec<CellMbr>> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT x_min, y_min, x_max, y_max FROM mbrs WHERE slot = ?1")?;
		let mbrs = stmt
			.query_map(params![slot as i64], |row| {
				Ok(CellMbr::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
			})?
			.collect::<Result<Vec<CellMbr>, _>>()?;
		Ok(mbrs)
	}

	/// Sum of the point counts written under a slot.
	pub fn point_count(&self, slot: u64) -> Result<u64> {
		Ok(self.pool.get()?.query_row(
			"SELECT IFNULL(SUM(count), 0) FROM cells WHERE slot = ?1",
			params![slot as i64],
			|row| row.get::<_, i64>(0),
		)? as u64)
	}

	/// Number of cell rows written under a slot.
	pub fn cell_count(&self, slot: u64) -> Result<u64> {
		Ok(self.pool.get()?.query_row(
			"SELECT COUNT(*) FROM cells WHERE slot = ?1",
			params![slot as i64],
			|row| row.get::<_, i64>(0),
		)? as u64)
	}

	/// Reads one cell back, decoding ragged attribute blobs and metric
	/// scalars according to the creation config.
	pub fn cell(&self, slot: u64, xi: u32, yi: u32) -> Result<Option<CellRow>> {
		let mut select: Vec<String> = vec!["count".to_string()];
		for attr in &self.config.attributes {
			select.push(quoted(attr));
		}
		let mut metric_names: Vec<(String, MetricDtype)> = Vec::new();
		for spec in &self.config.metrics {
			for attr in &self.config.attributes {
				let name = format!("m_{attr}_{}", spec.name);
				select.push(quoted(&name));
				metric_names.push((name, spec.dtype));
			}
		}
		let sql = format!(
			"SELECT {} FROM cells WHERE slot = ?1 AND xi = ?2 AND yi = ?3",
			select.join(", ")
		);

		let conn = self.pool.get()?;
		let row = conn
			.query_row(&sql, params![slot as i64, xi, yi], |row| {
				let count: i64 = row.get(0)?;
				let mut blobs: Vec<Vec<u8>> = Vec::new();
				for i in 0..self.config.attributes.len() {
					blobs.push(row.get(1 + i)?);
				}
				let base = 1 + self.config.attributes.len();
				let mut scalars: Vec<f64> = Vec::new();
				for (i, (_, dtype)) in metric_names.iter().enumerate() {
					scalars.push(match dtype {
						MetricDtype::Float64 => row.get(base + i)?,
						MetricDtype::Int32 => row.get::<_, i64>(base + i)? as f64,
					});
				}
				Ok((count, blobs, scalars))
			})
			.optional()?;

		let Some((count, blobs, scalars)) = row else {
			return Ok(None);
		};

		let mut raw = Vec::with_capacity(blobs.len());
		for (attr, blob) in self.config.attributes.iter().zip(blobs) {
			raw.push((attr.clone(), decode_values(&blob)?));
		}
		let metrics = metric_names
			.into_iter()
			.map(|(name, _)| name)
			.zip(scalars)
			.collect();

		Ok(Some(CellRow { count, raw, metrics }))
	}

	/// Removes everything stored under a slot (the original's delete mode).
	pub fn delete_slot(&self, slot: u64) -> Result<()> {
		ensure!(slot > 0, "slot 0 is reserved for the creation config");
		let mut conn = self.pool.get()?;
		let tx = conn.transaction()?;
		tx.execute("DELETE FROM cells WHERE slot = ?1", params![slot as i64])?;
		tx.execute("DELETE FROM mbrs WHERE slot = ?1", params![slot as i64])?;
		tx.execute("DELETE FROM slots WHERE slot = ?1", params![slot as i64])?;
		tx.commit()?;
		Ok(())
	}

	/// Merges the slot's write-ahead fragments into the main database file
	/// and compacts it. Called at the end of every run and on graceful
	/// shutdown.
	pub fn consolidate(&self, slot: u64) -> Result<()> {
		log::debug!("consolidating slot {slot}");
		let conn = self.pool.get()?;
		conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
		conn.execute_batch("VACUUM;")?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;
	use pointgrid_core::{CellGroup, GeoRect, GroupedCells};
	use pointgrid_metrics::{MetricGraph, registry};
	use std::path::PathBuf;

	fn test_bounds() -> Bounds {
		Bounds::new(GeoRect::new(0.0, 0.0, 10.0, 10.0).unwrap(), 1.0).unwrap()
	}

	fn test_metrics() -> Vec<Metric> {
		registry::resolve_names(&["count", "mean", "min", "max"].map(String::from)).unwrap()
	}

	fn new_store(dir: &TempDir) -> (GridStore, PathBuf) {
		let path = dir.path().join("layer.db");
		let store = GridStore::create(
			&path,
			test_bounds(),
			&["Z".to_string()],
			&test_metrics(),
			Some("EPSG:32610"),
		)
		.unwrap();
		(store, path)
	}

	fn one_tile_table(cells: &[(u32, u32, Vec<f64>)]) -> MetricTable {
		let grouped = GroupedCells {
			attrs: vec!["Z".to_string()],
			cells: cells
				.iter()
				.map(|(xi, yi, z)| CellGroup {
					xi: *xi,
					yi: *yi,
					values: vec![z.clone()],
				})
				.collect(),
		};
		MetricGraph::build(&test_metrics()).unwrap().run(&grouped).unwrap()
	}

	#[test]
	fn create_stamps_layer_metadata() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		assert_eq!(store.layer_metadata("LAYER_EXTENT_MINX").unwrap().unwrap(), "0");
		assert_eq!(store.layer_metadata("LAYER_EXTENT_MAXY").unwrap().unwrap(), "10");
		assert_eq!(store.layer_metadata("CRS").unwrap().unwrap(), "EPSG:32610");
		assert_eq!(store.layer_metadata("missing").unwrap(), None);
	}

	#[test]
	fn create_refuses_existing_path() {
		let dir = TempDir::new().unwrap();
		let (_, path) = new_store(&dir);
		assert!(GridStore::create(&path, test_bounds(), &["Z".to_string()], &test_metrics(), None).is_err());
	}

	#[test]
	fn reopen_restores_creation_config() {
		let dir = TempDir::new().unwrap();
		let (store, path) = new_store(&dir);
		let original = store.config().clone();
		drop(store);

		let reopened = GridStore::open(&path).unwrap();
		assert_eq!(reopened.config(), &original);
		assert_eq!(reopened.bounds().xi_count, 10);
	}

	#[test]
	fn slot_reservation_is_monotonic() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		assert_eq!(store.reserve_time_slot().unwrap(), 1);
		assert_eq!(store.reserve_time_slot().unwrap(), 2);

		let kinds: Vec<String> = store.slots().unwrap().into_iter().map(|s| s.kind).collect();
		assert_eq!(kinds, vec!["config", "reserved", "reserved"]);
	}

	#[test]
	fn write_and_read_tile() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();

		let table = one_tile_table(&[(3, 4, vec![1.0, 2.0, 3.0]), (5, 6, vec![9.0])]);
		store.write_tile(slot, &CellMbr::new(0, 0, 9, 9), &table).unwrap();

		let cell = store.cell(slot, 3, 4).unwrap().unwrap();
		assert_eq!(cell.count, 3);
		assert_eq!(cell.raw_column("Z").unwrap(), &[1.0, 2.0, 3.0]);
		assert_eq!(cell.metric_value("m_Z_count").unwrap(), 3.0);
		assert_eq!(cell.metric_value("m_Z_mean").unwrap(), 2.0);
		assert_eq!(cell.metric_value("m_Z_min").unwrap(), 1.0);
		assert_eq!(cell.metric_value("m_Z_max").unwrap(), 3.0);

		assert!(store.cell(slot, 0, 0).unwrap().is_none());
		assert_eq!(store.point_count(slot).unwrap(), 4);
		assert_eq!(store.cell_count(slot).unwrap(), 2);
		assert_eq!(store.mbrs(slot).unwrap(), vec![CellMbr::new(0, 0, 9, 9)]);
	}

	#[test]
	fn duplicate_cell_in_slot_rejected() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();

		let table = one_tile_table(&[(1, 1, vec![1.0])]);
		store.write_tile(slot, &CellMbr::new(1, 1, 1, 1), &table).unwrap();
		assert!(store.write_tile(slot, &CellMbr::new(1, 1, 1, 1), &table).is_err());

		// a second slot may write the same cell
		let slot2 = store.reserve_time_slot().unwrap();
		store.write_tile(slot2, &CellMbr::new(1, 1, 1, 1), &table).unwrap();
	}

	#[test]
	fn metadata_blob_roundtrip() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();

		assert_eq!(store.read_metadata(slot).unwrap(), None);
		store.save_metadata("shatter", "{\"finished\":true}", slot).unwrap();
		assert_eq!(store.read_metadata(slot).unwrap().unwrap(), "{\"finished\":true}");
		assert!(store.save_metadata("shatter", "{}", 0).is_err());
	}

	#[test]
	fn delete_slot_clears_everything() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();
		let table = one_tile_table(&[(2, 2, vec![1.0, 2.0])]);
		store.write_tile(slot, &CellMbr::new(2, 2, 2, 2), &table).unwrap();

		store.delete_slot(slot).unwrap();
		assert_eq!(store.cell_count(slot).unwrap(), 0);
		assert!(store.mbrs(slot).unwrap().is_empty());
		assert!(store.delete_slot(0).is_err());
	}

	#[test]
	fn consolidate_runs() {
		let dir = TempDir::new().unwrap();
		let (store, _) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();
		let table = one_tile_table(&[(0, 0, vec![1.0])]);
		store.write_tile(slot, &CellMbr::new(0, 0, 0, 0), &table).unwrap();
		store.consolidate(slot).unwrap();
		assert_eq!(store.point_count(slot).unwrap(), 1);
	}

	#[test]
	fn read_only_handle_rejects_writes() {
		let dir = TempDir::new().unwrap();
		let (store, path) = new_store(&dir);
		let slot = store.reserve_time_slot().unwrap();
		drop(store);

		let ro = GridStore::open_read_only(&path).unwrap();
		assert_eq!(ro.point_count(slot).unwrap(), 0);
		let table = one_tile_table(&[(0, 0, vec![1.0])]);
		assert!(ro.write_tile(slot, &CellMbr::new(0, 0, 0, 0), &table).is_err());
	}
}
