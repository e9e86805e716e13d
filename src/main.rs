//! Command-line interface for merging GeoTIFF bands.
//!
//! ```text
//! mergetiff <OUT.TIF> <IN1.TIF> <BAND1,BAND2,BAND3> [<IN2.TIF> <BANDS> ...]
//! ```
//!
//! Band lists are comma-separated 1-based indices; `-` selects no bands
//! from that input. The first input supplies the georeferencing of the
//! output even when none of its bands are selected.

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use mergetiff::{create_merged_dataset, BandSource, CodecOptions, Dataset, MergeError};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    // Output path plus one or more input/bands pairs.
    if args.len() < 4 || args.len() % 2 != 0 {
        print_usage(args.first().map(String::as_str).unwrap_or("mergetiff"));
        return ExitCode::from(2);
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), MergeError> {
    let output = &args[1];
    let started = Instant::now();

    // Open every input up front; band refs borrow the open datasets.
    let mut inputs: Vec<(Dataset, Vec<usize>)> = Vec::new();
    for pair in args[2..].chunks(2) {
        let dataset = Dataset::open(&pair[0])?;
        let bands = parse_band_list(&pair[1]).map_err(MergeError::SpecMismatch)?;
        inputs.push((dataset, bands));
    }

    let mut sources: Vec<BandSource<'_>> = Vec::new();
    for (dataset, bands) in &inputs {
        for &band in bands {
            sources.push(BandSource::from(dataset.band(band)?));
        }
    }

    let reference = &inputs[0].0;
    create_merged_dataset(output, Some(reference), &sources, &CodecOptions::default())?;
    println!(
        "Created merged dataset \"{output}\" in {:.2}s.",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Parse a comma-separated list of 1-based band indices; `-` selects
/// none.
fn parse_band_list(list: &str) -> Result<Vec<usize>, String> {
    if list == "-" {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(|token| {
            token
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("Invalid band index {token:?}"))
        })
        .collect()
}

fn print_usage(program: &str) {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mergetiff".to_string());
    println!("Usage:");
    println!("{name} <OUT.TIF> <IN1.TIF> <BAND1,BAND2,BAND3> [<IN2.TIF> <BAND1,BAND2,BAND3>]");
}
