//! Convert subcommand
//!
//! Convert an MBTiles database into a `PMTiles` archive.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Convert an MBTiles database into a PMTiles archive")]
pub struct Args {
    /// Source MBTiles database
    #[arg(value_name = "SRC")]
    src: PathBuf,
    /// Destination archive
    #[arg(value_name = "DST")]
    dst: PathBuf,
}

pub fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let stats = pmtiles3::mbtiles::convert(&args.src, &args.dst)?;
    println!(
        "wrote {} addressed tiles ({} entries, {} unique payloads)",
        stats.addressed_tiles, stats.tile_entries, stats.tile_contents
    );
    if let Some(leaf_size) = stats.leaf_size {
        println!(
            "root promoted to {} leaf directories of {leaf_size} entries",
            stats.leaf_count
        );
    }
    Ok(())
}
