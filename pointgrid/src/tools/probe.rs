use anyhow::Result;
use pointgrid_pipeline::ShatterConfig;
use pointgrid_storage::GridStore;
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// grid store to inspect
	#[arg()]
	db: PathBuf,

	/// show only this time slot
	#[arg(long, value_name = "int")]
	slot: Option<u64>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let store = GridStore::open_read_only(&arguments.db)?;

	let bounds = store.bounds();
	println!("store:      {}", arguments.db.display());
	println!(
		"extent:     {:?} (cell {}, grid {}x{})",
		bounds.rect, bounds.cell_size, bounds.xi_count, bounds.yi_count
	);
	if let Some(crs) = store.layer_metadata("CRS")? {
		println!("crs:        {crs}");
	}
	println!("attributes: {}", store.config().attributes.join(", "));
	println!("metrics:    {}", store.config().metrics.len());

	for entry in store.slots()? {
		if entry.slot == 0 {
			continue;
		}
		if let Some(only) = arguments.slot
			&& entry.slot != only
		{
			continue;
		}

		println!("slot {} [{}]", entry.slot, entry.kind);
		println!("  cells:  {}", store.cell_count(entry.slot)?);
		println!("  points: {}", store.point_count(entry.slot)?);
		if entry.kind == "shatter"
			&& let Some(json) = entry.config
		{
			let config = ShatterConfig::from_json(&json)?;
			println!("  source:   {}", config.filename);
			println!("  finished: {}", config.finished);
			println!("  tiles:    {}", config.mbrs.len());
			println!(
				"  duration: {:.3}s",
				(config.end_time - config.start_time) as f64 / 1000.0
			);
		}
	}

	Ok(())
}
