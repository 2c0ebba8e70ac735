mod convert;
mod ls;
mod show;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pmtiles3")]
#[command(about = "Inspect and produce PMTiles v3 archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect a local or remote archive
    Show(show::Args),
    /// List the virtual directory tree of an archive
    Ls(ls::Args),
    /// Convert an MBTiles database into a PMTiles archive
    Convert(convert::Args),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger from RUST_LOG environment variable
    // Example: RUST_LOG=debug pmtiles3 show ...
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show(args) => show::run(args).await,
        Commands::Ls(args) => ls::run(args).await,
        Commands::Convert(args) => convert::run(&args),
    }
}
