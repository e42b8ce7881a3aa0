use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use exrescue_core::fs::exfat::rescue::{DEFAULT_MAX_CLUSTERS, DEFAULT_RESCUE_DIR};
use exrescue_core::{
	EntrySet, FailurePolicy, RescueConfig, ScanEvent, SweepProgress, Volume, VolumeGeometry,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
	name = "exrescue",
	version,
	about = "List exFAT directory entries in a raw image and rescue small files"
)]
struct Cli {
	/// Treat every cluster of the heap as a directory block
	#[arg(short = 's', long)]
	sweep: bool,
	/// Copy files that fit in a few clusters into the rescue directory
	#[arg(short = 'r', long)]
	rescue: bool,
	/// Rescue directory
	#[arg(short = 'd', long = "dir", default_value = DEFAULT_RESCUE_DIR)]
	dir: PathBuf,
	/// Keep walking a block after a file fails to save
	#[arg(long)]
	keep_going: bool,
	/// Write a JSON report of rescued files
	#[arg(long, value_name = "PATH")]
	manifest: Option<PathBuf>,
	/// Increase log verbosity (-v, -vv, -vvv)
	#[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
	verbose: u8,
	/// Path to the raw exFAT image
	image: PathBuf,
}

fn log_level(verbose: u8) -> Level {
	match verbose {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(log_level(cli.verbose))
		.init();

	run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
	let volume = Volume::open(&cli.image)
		.with_context(|| format!("Failed to read exFAT boot sector from {}", cli.image.display()))?;
	let geometry = volume.geometry();

	println!("{}", geometry.describe());

	let mut session = volume.session();
	if cli.rescue {
		std::fs::create_dir_all(&cli.dir)
			.with_context(|| format!("Failed to create rescue directory {}", cli.dir.display()))?;
		session = session.with_rescue(RescueConfig {
			destination_dir: cli.dir.clone(),
			max_clusters: DEFAULT_MAX_CLUSTERS,
			failure_policy: if cli.keep_going {
				FailurePolicy::SkipCandidate
			} else {
				FailurePolicy::AbortBlock
			},
		});
	}
	session.set_listener(|event| {
		if let Some(text) = render_event(&event, geometry) {
			print!("{}", text);
		}
	});

	match volume.walk_root(&mut session) {
		Some(summary) => tracing::info!(
			"Root directory: {} records, {} entry sets, stopped: {:?}",
			summary.records_read,
			summary.entry_sets,
			summary.stop
		),
		None => println!(
			"Root directory cluster {} is outside the cluster heap",
			geometry.root_dir_first_cluster
		),
	}

	if cli.sweep {
		println!("Searching for any directory entries...");
		let mut scanner = volume.sweep_scanner();
		scanner.set_progress_callback(|progress| println!("{}", format_progress(progress)));
		let summary = scanner.sweep(&mut session);
		tracing::info!(
			"Sweep visited {} clusters, {} entry sets",
			summary.clusters_visited,
			summary.entry_sets
		);
	}

	let report = session.into_report();
	if cli.rescue {
		println!(
			"{} files saved to {} ({} bytes)",
			report.rescued.len(),
			cli.dir.display(),
			report.total_bytes_rescued
		);
	}

	if let Some(manifest) = &cli.manifest {
		report
			.export_json(manifest)
			.with_context(|| format!("Failed to write manifest {}", manifest.display()))?;
	}

	Ok(())
}

/// Stdout text for a session event. Rescue failures reach stderr through the
/// core's `warn!` log only.
fn render_event(event: &ScanEvent<'_>, geometry: &VolumeGeometry) -> Option<String> {
	match event {
		ScanEvent::Entry(entry) => Some(format_entry(entry, geometry)),
		ScanEvent::Saving { path, .. } => Some(format!("Saving {} ...\n", path.display())),
		ScanEvent::Rescued(_) | ScanEvent::Rejected { .. } | ScanEvent::Failed { .. } => None,
	}
}

fn format_entry(entry: &EntrySet, geometry: &VolumeGeometry) -> String {
	let mut out = String::new();
	out.push_str(&format!("Name: {}\n", entry.name()));
	out.push_str(&format!("Size: {}\n", entry.valid_data_length()));

	let cluster = entry.first_cluster();
	match geometry.cluster_offset(cluster) {
		Some(offset) => {
			out.push_str(&format!("First Cluster: {} (offset: 0x{:x})\n", cluster, offset))
		}
		None => out.push_str(&format!("First Cluster: {} (offset: none)\n", cluster)),
	}

	if let Some(modified) = entry.file_entry.modified.to_datetime() {
		out.push_str(&format!("Modified: {}\n", modified));
	}

	if entry.is_directory() {
		out.push_str("Type: directory\n");
	}
	if !entry.stream_extension.is_contiguous() && entry.data_length() > geometry.cluster_size() {
		out.push_str("Warning: clusters follow a FAT chain; rescue reads them as contiguous\n");
	}
	if !entry.utf16_valid {
		out.push_str("Warning: name contains invalid UTF-16\n");
	}
	if entry.skipped_records > 0 {
		out.push_str(&format!(
			"Warning: skipped {} unexpected records inside the entry set\n",
			entry.skipped_records
		));
	}
	if !entry.integrity.checksum_matches {
		out.push_str(&format!(
			"Warning: checksum 0x{:04X} does not match computed 0x{:04X}\n",
			entry.file_entry.set_checksum, entry.integrity.computed_checksum
		));
	}
	if !entry.integrity.secondary_count_matches {
		out.push_str(&format!(
			"Warning: secondary count {} does not match the records read\n",
			entry.file_entry.secondary_count
		));
	}
	out.push('\n');
	out
}

fn format_progress(progress: &SweepProgress) -> String {
	format!(
		"{} [{:x}] ({:.3}%) files saved: {}",
		progress.cluster, progress.offset, progress.percent_complete, progress.files_rescued
	)
}
