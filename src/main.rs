//! VideoPiiScan - Main Application Entrypoint
//!
//! Parses command-line arguments, initializes logging, runs the scan and
//! prints the resulting time ranges.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use videopiiscan::{CadencePolicy, Config, ScanConfig, ScanError, report, run};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// A command-line tool that finds on-screen emails and passwords in video recordings.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input video file (e.g., screencast.mov)
    #[arg(short, long)]
    input: PathBuf,

    /// OCR language (e.g., "eng" for English, "spa" for Spanish)
    #[arg(short, long, default_value_t = String::from("eng"))]
    lang: String,

    /// Largest gap in seconds between detections merged into one range
    #[arg(short, long, default_value_t = 1.0)]
    threshold: f64,

    /// Seconds of footage per sampled frame
    #[arg(short, long, default_value_t = 1.0)]
    sample_interval: f64,

    /// How fractional frames-per-sample counts become a whole cadence
    #[arg(long, value_enum, default_value_t = Cadence::Round)]
    cadence: Cadence,

    /// Number of frames read by the OCR engine concurrently
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Also write a JSON report to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Log the OCR text of every sampled frame (needs --log-level debug)
    #[arg(long)]
    show_text: bool,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum Cadence {
    Round,
    Truncate,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ScanError>() {
        Some(scan_err) if scan_err.is_source_error() => 2,
        Some(ScanError::Decode(_)) => 3,
        _ => 4,
    }
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = Args::parse();

    // 1. Initialize Logger
    let log_level = match args.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting VideoPiiScan...");

    // 2. Validate input path
    if !args.input.exists() {
        error!("Input file does not exist: {:?}", args.input);
        std::process::exit(1);
    }

    // 3. Create a configuration object from arguments
    let config = Config {
        input_file: args.input,
        lang: args.lang,
        scan: ScanConfig::default()
            .with_merge_threshold(args.threshold)
            .with_sample_interval(args.sample_interval)
            .with_cadence_policy(match args.cadence {
                Cadence::Round => CadencePolicy::Round,
                Cadence::Truncate => CadencePolicy::Truncate,
            })
            .with_ocr_workers(args.workers),
        json_output: args.json,
        show_text: args.show_text,
    };

    // 4. Run the main application logic
    match run(config) {
        Ok(ranges) => print!("{}", report::render_text(&ranges)),
        Err(e) => {
            let stage = e
                .downcast_ref::<ScanError>()
                .map(ScanError::stage)
                .unwrap_or("setup");
            error!("Application failed during {} stage: {:#}", stage, e);
            std::process::exit(exit_code(&e));
        }
    }

    info!("Scan completed successfully.");
}
