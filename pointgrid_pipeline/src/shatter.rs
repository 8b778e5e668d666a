//! The shatter coordinator.
//!
//! Drives the per-tile pipeline (read → arrange → metrics → write) across
//! every leaf of the layer, on a bounded worker pool. Tiles own disjoint
//! cell sets, so writes never race; each completed tile persists its cells
//! and its MBR atomically, which is what makes interrupted runs resumable.

use crate::config::{ShatterConfig, unix_millis_now};
use crate::reader::PointReader;
use anyhow::{Context, Result, ensure};
use futures::{StreamExt, stream};
use pointgrid_core::progress::get_progress_bar;
use pointgrid_core::{Bounds, CellMbr, Extents, arrange};
use pointgrid_metrics::{MetricGraph, MetricTable};
use pointgrid_storage::GridStore;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of one shatter run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShatterState {
	Init,
	Ready,
	Running,
	Finalizing,
	Done,
	Cancelled,
}

fn transition(state: &mut ShatterState, next: ShatterState) {
	log::debug!("shatter state {state:?} -> {next:?}");
	*state = next;
}

/// Cooperative cancellation flag, checked at tile boundaries. Wire it to
/// SIGINT in the binary; workers finish or abandon their tile, nothing
/// partial is written.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
	#[must_use]
	pub fn new() -> CancelFlag {
		CancelFlag::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// A tile that failed; the run keeps going and reports these at the end.
#[derive(Debug)]
pub struct TileFailure {
	pub mbr: CellMbr,
	pub error: String,
}

/// Result record of a run.
#[derive(Debug)]
pub struct ShatterOutcome {
	/// The run config with its result fields filled in (also persisted
	/// under the slot).
	pub config: ShatterConfig,
	pub time_slot: u64,
	pub point_count: u64,
	pub tiles_run: usize,
	pub tiles_skipped: usize,
	pub failures: Vec<TileFailure>,
	pub cancelled: bool,
}

impl ShatterOutcome {
	/// True for a finished run without tile failures.
	#[must_use]
	pub fn ok(&self) -> bool {
		!self.cancelled && self.failures.is_empty()
	}
}

/// Opens the store for a run, creating it on first contact. Creation
/// resolves the layer bounds from the config override or the reader's
/// quick-info; reopening takes bounds from the store and ignores the
/// override.
pub async fn prepare_store(path: &Path, config: &mut ShatterConfig, reader: &dyn PointReader) -> Result<GridStore> {
	let metrics = config.resolved_metrics()?;
	if path.exists() {
		let store = GridStore::open(path)?;
		let bounds = store.bounds();
		ensure!(
			bounds.cell_size == config.resolution,
			"store resolution ({}) differs from configured resolution ({})",
			bounds.cell_size,
			config.resolution
		);
		config.bounds = Some(bounds.rect);
		Ok(store)
	} else {
		let info = reader.quick_info().await.context("reader quick-info failed")?;
		let rect = config.bounds.unwrap_or(info.bounds);
		config.bounds = Some(rect);
		let bounds = Bounds::new(rect, config.resolution)?;
		// the schema needs a column for every graph node, pulled-in
		// dependencies included
		let graph = MetricGraph::build(&metrics)?;
		GridStore::create(path, bounds, &config.attributes, graph.metrics(), info.srs.as_deref())
	}
}

enum TileRun {
	Done(u64),
	Abandoned,
	Failed(CellMbr, anyhow::Error),
}

async fn process_tile(
	leaf: Extents,
	reader: &dyn PointReader,
	graph: &Arc<MetricGraph>,
	attrs: &Arc<Vec<String>>,
	store: &GridStore,
	slot: u64,
) -> Result<u64> {
	let rect = leaf.geo_rect();
	let Some(batch) = reader.read(&rect).await.context("tile read failed")? else {
		return Ok(0);
	};

	// arrange + metric evaluation are CPU-bound
	let graph = graph.clone();
	let attrs = attrs.clone();
	let table: Option<MetricTable> = tokio::task::spawn_blocking(move || -> Result<Option<MetricTable>> {
		let Some(grouped) = arrange(&batch, &leaf, &attrs)? else {
			return Ok(None);
		};
		Ok(Some(graph.run(&grouped)?))
	})
	.await??;

	let Some(table) = table else {
		return Ok(0);
	};
	let count = table.point_count();

	let store = store.clone();
	let mbr = leaf.mbr();
	tokio::task::spawn_blocking(move || store.write_tile(slot, &mbr, &table))
		.await?
		.context("tile write failed")?;

	Ok(count)
}

/// Runs a shatter: reserves a slot (unless the config resumes one),
/// enumerates leaves, skips those covered by previously persisted MBRs,
/// processes the rest on `workers` concurrent pipelines, and finalizes the
/// run metadata whether the run completes, fails per-tile, or is
/// cancelled.
pub async fn shatter(
	mut config: ShatterConfig,
	store: &GridStore,
	reader: Arc<dyn PointReader>,
	workers: usize,
	cancel: CancelFlag,
) -> Result<ShatterOutcome> {
	let mut state = ShatterState::Init;
	config.start_time = unix_millis_now();

	// fatal before any slot is touched
	let metrics = config.resolved_metrics()?;
	let graph = Arc::new(MetricGraph::build(&metrics)?);
	ensure!(!config.attributes.is_empty(), "no attributes configured");

	let bounds = store.bounds();
	config.bounds = Some(bounds.rect);

	let slot = match config.time_slot {
		Some(slot) => slot,
		None => store.reserve_time_slot()?,
	};
	config.time_slot = Some(slot);
	transition(&mut state, ShatterState::Ready);

	let run = run_tiles(&config, store, reader, &graph, slot, workers, &cancel, &mut state).await;

	transition(&mut state, ShatterState::Finalizing);
	let cancelled = cancel.is_cancelled();
	config.end_time = unix_millis_now();
	config.finished = !cancelled && run.is_ok();

	// metadata is persisted and fragments are consolidated even for
	// cancelled and failed runs
	let finalize = || -> Result<(u64, Vec<CellMbr>)> {
		let point_count = store.point_count(slot)?;
		let mbrs = store.mbrs(slot)?;
		Ok((point_count, mbrs))
	};
	match finalize() {
		Ok((point_count, mbrs)) => {
			config.point_count = point_count;
			config.mbrs = mbrs;
		}
		Err(error) => log::error!("finalization query failed: {error:#}"),
	}
	if let Err(error) = store.save_metadata("shatter", &config.to_json()?, slot) {
		log::error!("saving run metadata failed: {error:#}");
	}
	if let Err(error) = store.consolidate(slot) {
		log::error!("consolidation failed: {error:#}");
	}

	let (tiles_run, tiles_skipped, failures) = run?;

	transition(
		&mut state,
		if cancelled {
			ShatterState::Cancelled
		} else {
			ShatterState::Done
		},
	);

	for failure in &failures {
		log::warn!("tile {:?} failed: {}", failure.mbr, failure.error);
	}

	Ok(ShatterOutcome {
		time_slot: slot,
		point_count: config.point_count,
		tiles_run,
		tiles_skipped,
		failures,
		cancelled,
		config,
	})
}

#[allow(clippy::too_many_arguments)]
async fn run_tiles(
	config: &ShatterConfig,
	store: &GridStore,
	reader: Arc<dyn PointReader>,
	graph: &Arc<MetricGraph>,
	slot: u64,
	workers: usize,
	cancel: &CancelFlag,
	state: &mut ShatterState,
) -> Result<(usize, usize, Vec<TileFailure>)> {
	let bounds = store.bounds();
	let attrs = Arc::new(config.attributes.clone());

	// skip leaves already covered by a prior run of this slot
	let done_mbrs = store.mbrs(slot)?;
	let root = Extents::full(bounds)?;
	let mut total = 0usize;
	let leaves: Vec<Extents> = root
		.leaves(config.tile_size)?
		.inspect(|_| total += 1)
		.filter(|leaf| done_mbrs.iter().all(|mbr| leaf.disjoint_by_mbr(mbr)))
		.collect();
	let tiles_skipped = total - leaves.len();
	if tiles_skipped > 0 {
		log::info!("resuming slot {slot}: skipping {tiles_skipped} of {total} tiles");
	}

	transition(state, ShatterState::Running);
	let mut progress = get_progress_bar("shattering", leaves.len() as u64);

	let mut tiles = stream::iter(leaves.into_iter().map(|leaf| {
		let reader = reader.clone();
		let graph = graph.clone();
		let attrs = attrs.clone();
		let store = store.clone();
		let cancel = cancel.clone();
		async move {
			if cancel.is_cancelled() {
				return TileRun::Abandoned;
			}
			match process_tile(leaf, &*reader, &graph, &attrs, &store, slot).await {
				Ok(count) => TileRun::Done(count),
				Err(error) => TileRun::Failed(leaf.mbr(), error),
			}
		}
	}))
	.buffer_unordered(workers.max(1));

	let mut tiles_run = 0usize;
	let mut failures: Vec<TileFailure> = Vec::new();
	while let Some(result) = tiles.next().await {
		progress.inc(1);
		match result {
			TileRun::Done(_) => tiles_run += 1,
			TileRun::Abandoned => {}
			TileRun::Failed(mbr, error) => failures.push(TileFailure {
				mbr,
				error: format!("{error:#}"),
			}),
		}
	}
	progress.finish();

	Ok((tiles_run, tiles_skipped, failures))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reader::MockPointReader;
	use assert_fs::TempDir;
	use pointgrid_core::GeoRect;
	use pointgrid_metrics::{AttributeFilter, FilterOp, SENTINEL, registry};
	use std::path::PathBuf;

	fn base_config(metrics: &[&str]) -> ShatterConfig {
		let metrics = registry::resolve_names(&metrics.iter().map(|m| (*m).to_string()).collect::<Vec<_>>()).unwrap();
		ShatterConfig::new("mock://grid", 1.0, &["Z".to_string()], &metrics)
	}

	async fn run(
		dir: &TempDir,
		mut config: ShatterConfig,
		reader: Arc<MockPointReader>,
		cancel: CancelFlag,
	) -> (ShatterOutcome, GridStore, PathBuf) {
		let path = dir.path().join("layer.db");
		let store = prepare_store(&path, &mut config, reader.as_ref()).await.unwrap();
		let outcome = shatter(config, &store, reader, 4, cancel).await.unwrap();
		(outcome, store, path)
	}

	#[tokio::test]
	async fn two_cell_split() {
		let dir = TempDir::new().unwrap();
		let mut points = vec![(0.5, 0.5, 1.0); 6];
		points.extend(vec![(1.5, 0.5, 2.0); 4]);
		let reader = Arc::new(
			MockPointReader::from_xyz(GeoRect::new(0.0, 0.0, 4.0, 4.0).unwrap(), &points).unwrap(),
		);

		let (outcome, store, _) = run(&dir, base_config(&["count", "mean"]), reader, CancelFlag::new()).await;

		assert!(outcome.ok());
		assert!(outcome.config.finished);
		assert_eq!(outcome.point_count, 10);
		assert_eq!(store.cell_count(outcome.time_slot).unwrap(), 2);

		let c00 = store.cell(outcome.time_slot, 0, 0).unwrap().unwrap();
		let c10 = store.cell(outcome.time_slot, 1, 0).unwrap().unwrap();
		assert_eq!(c00.count, 6);
		assert_eq!(c10.count, 4);
		assert_eq!(c00.metric_value("m_Z_mean").unwrap(), 1.0);
		assert_eq!(c10.metric_value("m_Z_mean").unwrap(), 2.0);
	}

	#[tokio::test]
	async fn constant_cell_scenario() {
		let dir = TempDir::new().unwrap();
		let points = vec![(3.5, 4.5, 42.0); 10];
		let reader = Arc::new(
			MockPointReader::from_xyz(GeoRect::new(0.0, 0.0, 8.0, 8.0).unwrap(), &points).unwrap(),
		);

		let (outcome, store, _) = run(
			&dir,
			base_config(&["count", "mean", "stddev", "min", "max", "crr"]),
			reader,
			CancelFlag::new(),
		)
		.await;

		let cell = store.cell(outcome.time_slot, 3, 4).unwrap().unwrap();
		assert_eq!(cell.count, 10);
		assert_eq!(cell.metric_value("m_Z_mean").unwrap(), 42.0);
		assert_eq!(cell.metric_value("m_Z_stddev").unwrap(), 0.0);
		assert_eq!(cell.metric_value("m_Z_min").unwrap(), 42.0);
		assert_eq!(cell.metric_value("m_Z_max").unwrap(), 42.0);
		assert_eq!(cell.metric_value("m_Z_crr").unwrap(), SENTINEL);
	}

	#[tokio::test]
	async fn every_point_lands_in_exactly_one_cell() {
		let dir = TempDir::new().unwrap();
		let reader = Arc::new(MockPointReader::grid(10, 9).unwrap());
		let mut config = base_config(&["count"]);
		config.tile_size = 3; // forces partial edge tiles and shared borders

		let (outcome, store, _) = run(&dir, config, reader, CancelFlag::new()).await;

		assert!(outcome.ok());
		assert_eq!(outcome.point_count, 900);
		assert_eq!(store.cell_count(outcome.time_slot).unwrap(), 100);
	}

	#[tokio::test]
	async fn resume_skips_persisted_tiles_and_matches_full_run() {
		let full_dir = TempDir::new().unwrap();
		let reader = Arc::new(MockPointReader::grid(10, 9).unwrap());
		let mut config = base_config(&["count", "mean"]);
		config.tile_size = 5;

		let (full, _, _) = run(&full_dir, config.clone(), reader.clone(), CancelFlag::new()).await;
		assert_eq!(full.tiles_run, 4);

		// second store: pre-write one tile under a reserved slot, then
		// resume into the same slot
		let partial_dir = TempDir::new().unwrap();
		let path = partial_dir.path().join("layer.db");
		let store = prepare_store(&path, &mut config, reader.as_ref()).await.unwrap();
		let slot = store.reserve_time_slot().unwrap();

		let graph = MetricGraph::build(&config.resolved_metrics().unwrap()).unwrap();
		let leaf = Extents::full(store.bounds()).unwrap().leaves(5).unwrap().next().unwrap();
		let batch = reader.read(&leaf.geo_rect()).await.unwrap().unwrap();
		let grouped = arrange(&batch, &leaf, &config.attributes).unwrap().unwrap();
		store
			.write_tile(slot, &leaf.mbr(), &graph.run(&grouped).unwrap())
			.unwrap();

		config.time_slot = Some(slot);
		let outcome = shatter(config, &store, reader, 4, CancelFlag::new()).await.unwrap();

		assert_eq!(outcome.tiles_skipped, 1);
		assert_eq!(outcome.tiles_run, 3);
		assert_eq!(outcome.point_count, full.point_count);
		assert!(outcome.config.finished);
	}

	#[tokio::test]
	async fn cancelled_run_finalizes_metadata() {
		let dir = TempDir::new().unwrap();
		let reader = Arc::new(MockPointReader::grid(4, 2).unwrap());
		let cancel = CancelFlag::new();
		cancel.cancel();

		let (outcome, store, _) = run(&dir, base_config(&["count"]), reader, cancel).await;

		assert!(outcome.cancelled);
		assert!(!outcome.ok());
		assert_eq!(outcome.point_count, 0);

		let saved = ShatterConfig::from_json(&store.read_metadata(outcome.time_slot).unwrap().unwrap()).unwrap();
		assert!(!saved.finished);
	}

	#[tokio::test]
	async fn reader_failures_are_per_tile() {
		let dir = TempDir::new().unwrap();
		let reader = Arc::new(MockPointReader::grid(4, 2).unwrap());
		let mut config = base_config(&["count"]);
		config.tile_size = 2;

		let path = dir.path().join("layer.db");
		let store = prepare_store(&path, &mut config, reader.as_ref()).await.unwrap();
		reader.fail_reads();

		let outcome = shatter(config, &store, reader, 2, CancelFlag::new()).await.unwrap();
		assert_eq!(outcome.failures.len(), 4);
		assert!(!outcome.ok());
		// the run drained, so its metadata is finalized as finished
		assert!(outcome.config.finished);
	}

	#[tokio::test]
	async fn filtered_metric_end_to_end() {
		let dir = TempDir::new().unwrap();
		let reader = Arc::new(
			MockPointReader::new(
				GeoRect::new(0.0, 0.0, 2.0, 2.0).unwrap(),
				vec![
					("X".to_string(), vec![0.2, 0.4, 0.6, 0.8]),
					("Y".to_string(), vec![0.2, 0.4, 0.6, 0.8]),
					("Z".to_string(), vec![5.0, 6.0, 7.0, 8.0]),
					("NumberOfReturns".to_string(), vec![1.0, 1.0, 2.0, 3.0]),
				],
			)
			.unwrap(),
		);

		let filtered = registry::find("mean")
			.unwrap()
			.with_filter(AttributeFilter::new("NumberOfReturns", FilterOp::Eq, 1.0));
		let mut config = ShatterConfig::new(
			"mock://filtered",
			1.0,
			&["Z".to_string(), "NumberOfReturns".to_string()],
			&[filtered],
		);
		config.tile_size = 2;

		let path = dir.path().join("layer.db");
		let store = prepare_store(&path, &mut config, reader.as_ref()).await.unwrap();
		let outcome = shatter(config, &store, reader, 1, CancelFlag::new()).await.unwrap();
		assert!(outcome.ok());

		let cell = store.cell(outcome.time_slot, 0, 0).unwrap().unwrap();
		assert_eq!(cell.metric_value("m_NumberOfReturns_mean").unwrap(), 1.0);
		// raw column keeps all four values
		assert_eq!(cell.raw_column("NumberOfReturns").unwrap(), &[1.0, 1.0, 2.0, 3.0]);
		assert_eq!(cell.metric_value("m_Z_mean").unwrap(), 5.5);
	}

	#[tokio::test]
	async fn metric_cycle_is_fatal_before_slot_reservation() {
		let dir = TempDir::new().unwrap();
		let reader = Arc::new(MockPointReader::grid(2, 1).unwrap());
		let mut config = base_config(&["mean", "median"]);

		let path = dir.path().join("layer.db");
		let store = prepare_store(&path, &mut config, reader.as_ref()).await.unwrap();

		config.metrics[0].dependencies = vec!["median".to_string()];
		config.metrics[1].dependencies = vec!["mean".to_string()];
		assert!(shatter(config, &store, reader, 1, CancelFlag::new()).await.is_err());
		// nothing was reserved
		assert_eq!(store.slots().unwrap().len(), 1);
	}
}
