//! Ls subcommand
//!
//! List the virtual directory tree exposed by an archive.

use clap::Parser;
use pmtiles3::{ArchiveFs, ArchiveReader};

#[derive(Parser, Debug)]
#[command(about = "List the virtual directory tree of an archive")]
pub struct Args {
    /// Path to a local `PMTiles` archive
    #[arg(value_name = "PATH")]
    path: String,
    /// Subpath inside the archive, e.g. `3` or `3/4`
    #[arg(value_name = "SUBPATH", default_value = "")]
    subpath: String,
    /// Stop after this many entries
    #[arg(long)]
    max_entries: Option<usize>,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let reader = ArchiveReader::open_path(args.path.as_str()).await?;
    let fs = ArchiveFs::new(reader);

    let Some(names) = fs.read_dir(&args.subpath, args.max_entries).await? else {
        return Err(format!("{} is not a directory in this archive", args.subpath).into());
    };
    for name in names {
        println!("{name}");
    }
    Ok(())
}
