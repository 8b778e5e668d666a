use anyhow::{Result, bail, ensure};
use pointgrid_core::GeoRect;
use pointgrid_metrics::{Metric, registry};
use pointgrid_pipeline::{
	CancelFlag, DEFAULT_TILE_SIZE, LasReader, ReaderOptions, ShatterConfig, prepare_store, shatter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// input point cloud (*.las)
	#[arg()]
	filename: PathBuf,

	/// grid store to create or extend
	#[arg(long, value_name = "path")]
	db: PathBuf,

	/// cell size in layer units
	#[arg(long, short, value_name = "float", default_value_t = 1.0, display_order = 1)]
	resolution: f64,

	/// tile edge length in cells
	#[arg(long, value_name = "int", default_value_t = DEFAULT_TILE_SIZE, display_order = 1)]
	tile_size: u32,

	/// layer bounds override
	#[arg(
		long,
		value_name = "minx,miny,maxx,maxy",
		allow_hyphen_values = true,
		display_order = 1
	)]
	bounds: Option<String>,

	/// clip input to a WKT polygon
	#[arg(long, value_name = "WKT", display_order = 2)]
	polygon: Option<String>,

	/// metric set: 'grid', 'lmoments', 'percentiles' or a comma-separated list of names
	#[arg(long, value_name = "set", default_value = "grid", display_order = 2)]
	metrics: String,

	/// attributes to retain per cell
	#[arg(long, value_name = "list", value_delimiter = ',', display_order = 2)]
	attributes: Option<Vec<String>>,

	/// number of concurrent tile pipelines (defaults to the CPU count)
	#[arg(long, value_name = "int", display_order = 3)]
	workers: Option<usize>,

	/// reader threads per tile read
	#[arg(long, value_name = "int", default_value_t = 1, display_order = 3)]
	threads: usize,

	/// resume into an existing time slot
	#[arg(long, value_name = "int", display_order = 3)]
	time_slot: Option<u64>,

	/// print a run summary
	#[arg(long, display_order = 4)]
	stats: bool,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	log::info!("shattering {:?} into {:?}", arguments.filename, arguments.db);

	let metrics = parse_metric_set(&arguments.metrics)?;
	let attributes = arguments
		.attributes
		.clone()
		.unwrap_or_else(ShatterConfig::default_attributes);

	let mut config = ShatterConfig::new(
		&arguments.filename.to_string_lossy(),
		arguments.resolution,
		&attributes,
		&metrics,
	);
	config.tile_size = arguments.tile_size;
	config.time_slot = arguments.time_slot;
	config.bounds = arguments.bounds.as_deref().map(parse_bounds).transpose()?;

	let reader = Arc::new(LasReader::open(
		&arguments.filename,
		ReaderOptions {
			threads: arguments.threads,
			polygon: arguments.polygon.clone(),
		},
	)?);

	let store = prepare_store(&arguments.db, &mut config, reader.as_ref()).await?;

	let cancel = CancelFlag::new();
	{
		let cancel = cancel.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				log::warn!("interrupted; flushing completed tiles");
				cancel.cancel();
			}
		});
	}

	let workers = arguments.workers.unwrap_or_else(num_cpus::get);
	let start = Instant::now();
	let outcome = shatter(config, &store, reader, workers, cancel).await?;

	if arguments.stats {
		println!(
			"time={:.3}s workers={} resolution={} point_count={} tiles_run={} tiles_skipped={} cells={}",
			start.elapsed().as_secs_f64(),
			workers,
			arguments.resolution,
			outcome.point_count,
			outcome.tiles_run,
			outcome.tiles_skipped,
			store.cell_count(outcome.time_slot)?,
		);
	}

	if outcome.cancelled {
		bail!("run was interrupted; resume with --time-slot {}", outcome.time_slot);
	}
	if !outcome.failures.is_empty() {
		bail!("{} of {} tiles failed", outcome.failures.len(), outcome.tiles_run + outcome.failures.len());
	}

	log::info!("finished: {} points in slot {}", outcome.point_count, outcome.time_slot);
	Ok(())
}

fn parse_metric_set(text: &str) -> Result<Vec<Metric>> {
	Ok(match text {
		"grid" => registry::grid_metrics(),
		"lmoments" => registry::l_moments(),
		"percentiles" => registry::percentiles(),
		list => registry::resolve_names(
			&list
				.split(',')
				.map(|name| name.trim().to_string())
				.collect::<Vec<String>>(),
		)?,
	})
}

fn parse_bounds(text: &str) -> Result<GeoRect> {
	let parts: Vec<f64> = text
		.split(',')
		.map(|p| p.trim().parse::<f64>())
		.collect::<Result<Vec<f64>, _>>()?;
	ensure!(parts.len() == 4, "bounds must be minx,miny,maxx,maxy");
	GeoRect::new(parts[0], parts[1], parts[2], parts[3])
}
