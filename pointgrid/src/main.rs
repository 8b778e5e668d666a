mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{ErrorLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<ErrorLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Shatter a point cloud into per-cell grid metrics
	Shatter(tools::shatter::Subcommand),

	/// Show information about a grid store
	Probe(tools::probe::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Shatter(arguments) => tools::shatter::run(arguments),
		Commands::Probe(arguments) => tools::probe::run(arguments),
	}
}

#[cfg(test)]
mod tests {
	use crate::Cli;
	use clap::Parser;

	fn parse_error(arg_vec: Vec<&str>) -> String {
		Cli::try_parse_from(arg_vec).unwrap_err().to_string()
	}

	#[test]
	fn help() {
		let err = parse_error(vec!["pointgrid"]);
		assert!(err.contains("Usage: pointgrid"));
	}

	#[test]
	fn version() {
		let err = parse_error(vec!["pointgrid", "-V"]);
		assert!(err.starts_with("pointgrid "));
	}

	#[test]
	fn shatter_subcommand() {
		let err = parse_error(vec!["pointgrid", "shatter"]);
		assert!(err.starts_with("Shatter a point cloud into per-cell grid metrics"));
	}

	#[test]
	fn probe_subcommand_parses() {
		let cli = Cli::try_parse_from(vec!["pointgrid", "probe", "layer.db"]).unwrap();
		assert!(matches!(cli.command, crate::Commands::Probe(_)));
	}

	#[test]
	fn shatter_arguments_parse() {
		let cli = Cli::try_parse_from(vec![
			"pointgrid",
			"shatter",
			"points.las",
			"--db",
			"layer.db",
			"--resolution",
			"10",
			"--tile-size",
			"32",
			"--workers",
			"4",
			"--metrics",
			"count,mean,p95",
			"--stats",
		])
		.unwrap();
		assert!(matches!(cli.command, crate::Commands::Shatter(_)));
	}
}
