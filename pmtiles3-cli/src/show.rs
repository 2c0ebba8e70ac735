//! Show subcommand
//!
//! Inspect a local or remote `PMTiles` archive.

use clap::Parser;
use pmtiles3::reqwest::Client;
use pmtiles3::{ArchiveReader, Backend, DirectoryCache, Header};

#[derive(Parser, Debug)]
#[command(about = "Inspect a local or remote archive")]
pub struct Args {
    /// Path to `PMTiles` archive (local file or HTTP URL)
    #[arg(value_name = "PATH")]
    path: String,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Open archive (support both local files and HTTP URLs)
    if args.path.starts_with("http://") || args.path.starts_with("https://") {
        let client = Client::builder()
            .user_agent(format!("pmtiles3-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let reader = ArchiveReader::open_url(client, args.path.as_str()).await?;
        print_archive_info(&reader);
    } else {
        let reader = ArchiveReader::open_path(args.path.as_str()).await?;
        print_archive_info(&reader);
    }

    Ok(())
}

fn print_archive_info<B, C>(reader: &ArchiveReader<B, C>)
where
    B: Backend,
    C: DirectoryCache + Send + Sync,
{
    let header: &Header = reader.header();

    println!("pmtiles spec version: 3");
    println!("tile type: {}", header.tile_type.name());
    println!(
        "bounds: (long: {:.6}, lat: {:.6}) (long: {:.6}, lat: {:.6})",
        header.min_longitude(),
        header.min_latitude(),
        header.max_longitude(),
        header.max_latitude()
    );
    println!("min zoom: {}", header.min_zoom);
    println!("max zoom: {}", header.max_zoom);
    println!(
        "center: (long: {:.6}, lat: {:.6})",
        header.center_longitude(),
        header.center_latitude()
    );
    println!("center zoom: {}", header.center_zoom);

    // 0 means the producer did not record the counter
    match header.addressed_tiles_count {
        Some(n) => println!("addressed tiles count: {n}"),
        None => println!("addressed tiles count: unknown"),
    }
    match header.tile_entries_count {
        Some(n) => println!("tile entries count: {n}"),
        None => println!("tile entries count: unknown"),
    }
    match header.tile_contents_count {
        Some(n) => println!("tile contents count: {n}"),
        None => println!("tile contents count: unknown"),
    }

    println!("clustered: {}", header.clustered);
    println!("internal compression: {}", header.internal_compression.name());
    println!("tile compression: {}", header.tile_compression.name());

    // Print metadata key-value pairs when it parses as a JSON object
    if let Ok(serde_json::Value::Object(object)) =
        serde_json::from_slice::<serde_json::Value>(reader.metadata())
    {
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    "<object...>".to_string()
                }
                other => other.to_string(),
            };
            println!("{key} {rendered}");
        }
    }
}
