#![warn(missing_docs)]
//! tbx-pipe: copies a file through a filter pipeline and reports its CRC-32

use anyhow::Context;
use tbx_streams::{
    Crc32, Digest, FileSink, FileSource, FilterConfig, FilterSource, IdentityFilter, Pipe,
    PipeConfig, PipeState, TapSource,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: tbx-pipe <input> <output> [buffer-size]");
        std::process::exit(1);
    }

    let config = match args.get(3) {
        Some(raw) => PipeConfig {
            buffer_size: raw
                .parse()
                .with_context(|| format!("invalid buffer size: {}", raw))?,
        },
        None => PipeConfig::default(),
    };

    let input = FileSource::open(&args[1]).with_context(|| format!("opening {}", args[1]))?;
    let total = tbx_streams::Seekable::size(&input);
    let output = FileSink::create(&args[2]).with_context(|| format!("creating {}", args[2]))?;

    let tapped = TapSource::new(input, Crc32::default());
    let filtered = FilterSource::new(tapped, IdentityFilter, &FilterConfig::default())?;
    let mut pipe = Pipe::with_config(filtered, output, &config)?;

    tracing::info!(input = %args[1], output = %args[2], bytes = total, buffer = config.buffer_size, "copy starting");

    let mut last = PipeState::Opened;
    let stats = pipe.process_with(|state, stats| {
        if state != last {
            tracing::info!(?state, bytes_out = stats.bytes_out, steps = stats.steps, "pipe progress");
            last = state;
        }
        Ok(())
    })?;

    let (filtered, _) = pipe.into_parts();
    let (tapped, _) = filtered.into_parts();
    let crc = tapped.observer().get();

    println!("{} bytes, crc32 {:08x}", stats.bytes_out, crc);
    Ok(())
}
