mod args;

use clap::error::ErrorKind;
use clap::Parser;
use colored::*;
use log::info;
use osmio::{Buffer, File, Header, Overwrite, Reader, Stats, Writer};

use std::time::Instant;

type Error = Box<dyn std::error::Error>;

fn run(args: args::Args) -> Result<(), Error> {
    let start = Instant::now();

    let mut reader = Reader::open(args.input.as_path())?;
    let mut buffers: Vec<Buffer> = Vec::new();
    let mut stats = Stats::default();
    while let Some(buffer) = reader.read()? {
        stats += Stats::from(&buffer);
        buffers.push(buffer);
    }
    reader.close()?;
    info!(
        "Read {} buffers in {:.3}s",
        buffers.len(),
        start.elapsed().as_secs_f64()
    );

    let start = Instant::now();
    let output_file = File::with_format(&args.output, "pbf")?;
    let header = Header::new();
    let mut writer = Writer::new(output_file, &header, Overwrite::Allow)?;
    for buffer in buffers {
        writer.write(buffer)?;
    }
    writer.close()?;
    info!("Written in {:.3}s", start.elapsed().as_secs_f64());

    info!("{}", stats);
    Ok(())
}

fn main() {
    let args = match args::Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_module_path(false)
        .format_timestamp_nanos()
        .init();

    if let Err(e) = run(args) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}
