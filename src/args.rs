use std::path::PathBuf;

use clap::Parser;

/// Reads an OSM file into memory and writes it back out as OSM PBF
#[derive(Debug, Parser)]
#[command(about, version, author)]
pub struct Args {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Input OSM file
    pub input: PathBuf,

    /// Output OSM pbf file, overwritten if it exists
    pub output: PathBuf,
}
