//! VideoPiiScan - Core Library
//!
//! Scans video recordings for frames showing email addresses or passwords.
//! Frames are sampled about once per second, read with OCR, matched against
//! PII patterns and the hits are collapsed into time ranges.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::path::PathBuf;

pub mod error;
pub mod frame_sampler;
pub mod ocr;
pub mod pii_detector;
pub mod pipeline;
pub mod range_merger;
pub mod report;

pub use error::{ScanError, ScanResult};
pub use frame_sampler::{CadencePolicy, FfmpegSource, FrameSampler, MemorySource, VideoSource};
pub use ocr::{TesseractExtractor, TextExtractor};
pub use pii_detector::{PiiCategory, PiiDetector, PiiMatch};
pub use pipeline::{DetectionPipeline, PipelineEvent, ScanConfig};
pub use range_merger::{RangeMerger, TimeRange, TimestampDetection, merge_detections};

/// Application configuration structure.
#[derive(Debug)]
pub struct Config {
    pub input_file: PathBuf,
    pub lang: String,
    pub scan: ScanConfig,
    pub json_output: Option<PathBuf>,
    pub show_text: bool,
}

fn progress_bar(config: &Config) -> Result<ProgressBar> {
    let estimate = frame_sampler::estimate_sample_count(
        &config.input_file,
        config.scan.sample_interval,
        config.scan.cadence_policy,
    );
    let bar = match estimate {
        Ok(count) if count > 0 => {
            let bar = ProgressBar::new(count);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Scanning frames [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) [{elapsed_precise}<{eta}]")?
                    .progress_chars("##-"),
            );
            bar
        }
        _ => {
            warn!("Could not estimate the number of samples. Using spinner as fallback.");
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} Scanning frames... [{elapsed_precise}] {pos} frames scanned")?,
            );
            bar
        }
    };
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(bar)
}

/// Finishes the bar on success, abandons it on failure so the steady tick stops.
fn settle_progress<T>(pb: &ProgressBar, result: ScanResult<T>) -> ScanResult<T> {
    match &result {
        Ok(_) => {
            let final_pos = pb.position();
            pb.finish_with_message(format!("Scanned {} frames", final_pos));
        }
        Err(_) => pb.abandon_with_message("Scan aborted"),
    }
    result
}

/// The main function that orchestrates the scan of one video.
pub fn run(config: Config) -> Result<Vec<TimeRange>> {
    info!("Initializing scan with config: {:?}", config);

    // 1. Open the video before paying for OCR start-up.
    let sampler = FrameSampler::open(
        &config.input_file,
        config.scan.sample_interval,
        config.scan.cadence_policy,
    )
    .with_context(|| format!("Failed to prepare {:?} for sampling", config.input_file))?;
    info!(
        "Sampling {:?} at {:.3} fps, one frame every {} decoded.",
        config.input_file,
        sampler.frame_rate(),
        sampler.cadence()
    );

    // 2. Initialize OCR
    let extractor = TesseractExtractor::new(&config.lang).context("OCR initialization failed")?;

    // 3. Scan
    let pipeline = DetectionPipeline::new(extractor, config.scan.clone())
        .context("Invalid scan configuration")?;
    let pb = progress_bar(&config)?;
    let observer_pb = pb.clone();
    let show_text = config.show_text;
    let pipeline = pipeline.with_observer(
        move |event| match event {
            PipelineEvent::TextExtracted { timestamp, text } => {
                observer_pb.inc(1);
                if show_text {
                    debug!("Text at {:.2}s: {}", timestamp, text);
                }
            }
            PipelineEvent::ExtractionFailed { .. } => observer_pb.inc(1),
            PipelineEvent::Detected { timestamp, matches } => {
                observer_pb.set_message(format!("{} match(es) at {:.2}s", matches.len(), timestamp));
            }
            PipelineEvent::FrameSampled { .. } => {}
        },
    );

    let ranges = settle_progress(&pb, pipeline.run_sampler(sampler))
        .context("Scanning the video stream failed")?;

    // 4. Optional machine-readable report
    if let Some(json_path) = &config.json_output {
        report::write_json(json_path, &config.input_file, &ranges)
            .context("Failed to write JSON report")?;
    }

    if ranges.is_empty() {
        info!("No emails or passwords found in {:?}.", config.input_file);
    } else {
        info!("Found PII in {} time range(s).", ranges.len());
    }
    Ok(ranges)
}
