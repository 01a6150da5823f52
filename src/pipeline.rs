//! Detection Pipeline Module
//!
//! Drives sampled frames through text extraction, PII detection and range
//! merging, in timestamp order.

use crate::error::{ScanError, ScanResult};
use crate::frame_sampler::{CadencePolicy, FrameSampler, SampledFrame, VideoSource};
use crate::ocr::TextExtractor;
use crate::pii_detector::{PiiDetector, PiiMatch};
use crate::range_merger::{DEFAULT_MERGE_THRESHOLD, RangeMerger, TimeRange, TimestampDetection};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::time::Instant;

/// Tunable parameters of a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Largest gap, in seconds, between detections that still belong to one range.
    pub merge_threshold: f64,
    /// Seconds of footage represented by one sampled frame.
    pub sample_interval: f64,
    pub cadence_policy: CadencePolicy,
    /// Frames sent to the OCR engine concurrently. One means strictly sequential.
    pub ocr_workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            sample_interval: 1.0,
            cadence_policy: CadencePolicy::Round,
            ocr_workers: 1,
        }
    }
}

impl ScanConfig {
    pub fn with_merge_threshold(mut self, seconds: f64) -> Self {
        self.merge_threshold = seconds;
        self
    }

    pub fn with_sample_interval(mut self, seconds: f64) -> Self {
        self.sample_interval = seconds;
        self
    }

    pub fn with_cadence_policy(mut self, policy: CadencePolicy) -> Self {
        self.cadence_policy = policy;
        self
    }

    pub fn with_ocr_workers(mut self, workers: usize) -> Self {
        self.ocr_workers = workers;
        self
    }

    pub fn validate(&self) -> ScanResult<()> {
        if !self.merge_threshold.is_finite() || self.merge_threshold < 0.0 {
            return Err(ScanError::InvalidConfig(format!(
                "merge threshold must be a non-negative number of seconds, got {}",
                self.merge_threshold
            )));
        }
        if !self.sample_interval.is_finite() || self.sample_interval <= 0.0 {
            return Err(ScanError::InvalidConfig(format!(
                "sample interval must be a positive number of seconds, got {}",
                self.sample_interval
            )));
        }
        Ok(())
    }
}

/// Progress notifications emitted while a scan runs.
///
/// Events of each kind arrive in timestamp order. With a single OCR worker
/// every frame's events are delivered together. With a worker pool all
/// `FrameSampled` events of a batch come first, followed by the outcome
/// events of that batch frame by frame.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    FrameSampled { timestamp: f64, frame_index: u64 },
    TextExtracted { timestamp: f64, text: &'a str },
    ExtractionFailed { timestamp: f64, error: &'a ScanError },
    Detected { timestamp: f64, matches: &'a [PiiMatch] },
}

/// Callback receiving [`PipelineEvent`]s.
pub type Observer = Box<dyn Fn(&PipelineEvent<'_>)>;

#[derive(Debug, Default, Clone, Copy)]
struct ScanStats {
    samples: u64,
    failed_extractions: u64,
    detections: u64,
}

/// Sampler -> extractor -> detector -> merger.
pub struct DetectionPipeline<E: TextExtractor> {
    extractor: E,
    detector: PiiDetector,
    config: ScanConfig,
    observer: Option<Observer>,
}

impl<E: TextExtractor> DetectionPipeline<E> {
    /// Fails with `InvalidConfig` if the scan parameters are out of range.
    pub fn new(extractor: E, config: ScanConfig) -> ScanResult<Self> {
        config.validate()?;
        Ok(DetectionPipeline {
            extractor,
            detector: PiiDetector::new(),
            config,
            observer: None,
        })
    }

    /// Installs a callback that sees every sampled frame and its outcome.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&PipelineEvent<'_>) + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Scans an opened source with the configured sampling cadence.
    pub fn run<S: VideoSource>(&self, source: S) -> ScanResult<Vec<TimeRange>> {
        let sampler = FrameSampler::new(
            source,
            self.config.sample_interval,
            self.config.cadence_policy,
        )?;
        self.run_sampler(sampler)
    }

    /// Scans every frame a sampler yields. A decoding error aborts the whole
    /// scan; an extraction error only blanks the affected frame.
    pub fn run_sampler<S: VideoSource>(&self, sampler: FrameSampler<S>) -> ScanResult<Vec<TimeRange>> {
        let start_time = Instant::now();
        let mut merger = RangeMerger::new(self.config.merge_threshold);
        let mut stats = ScanStats::default();

        if self.config.ocr_workers <= 1 {
            for sample in sampler {
                let sample = sample?;
                self.notify_sampled(&sample);
                let text = self.extract_one(&sample);
                self.handle_text(&mut merger, &mut stats, sample.timestamp, text);
            }
        } else {
            let workers = self.config.ocr_workers;
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| ScanError::WorkerPool(e.to_string()))?;
            debug!("Running OCR on a pool of {} workers", workers);

            let mut batch = Vec::with_capacity(workers);
            for sample in sampler {
                let sample = sample?;
                self.notify_sampled(&sample);
                batch.push(sample);
                if batch.len() == workers {
                    self.process_batch(&pool, &mut batch, &mut merger, &mut stats);
                }
            }
            if !batch.is_empty() {
                self.process_batch(&pool, &mut batch, &mut merger, &mut stats);
            }
        }

        let ranges = merger.finalize();
        info!(
            "Scan finished in {:.2?}: {} samples, {} with PII, {} unreadable, {} range(s).",
            start_time.elapsed(),
            stats.samples,
            stats.detections,
            stats.failed_extractions,
            ranges.len()
        );
        Ok(ranges)
    }

    /// Extracts a batch concurrently. `collect` keeps input order, so the
    /// merger still sees timestamps in order.
    fn process_batch(
        &self,
        pool: &rayon::ThreadPool,
        batch: &mut Vec<SampledFrame>,
        merger: &mut RangeMerger,
        stats: &mut ScanStats,
    ) {
        let extractor = &self.extractor;
        let results: Vec<ScanResult<String>> = pool.install(|| {
            batch
                .par_iter()
                .map(|sample| extractor.extract(&sample.image))
                .collect()
        });

        for (sample, result) in batch.drain(..).zip(results) {
            let text = self.recover(sample.timestamp, result);
            self.handle_text(merger, stats, sample.timestamp, text);
        }
    }

    fn extract_one(&self, sample: &SampledFrame) -> Option<String> {
        let result = self.extractor.extract(&sample.image);
        self.recover(sample.timestamp, result)
    }

    fn recover(&self, timestamp: f64, result: ScanResult<String>) -> Option<String> {
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Text extraction failed at {:.2}s: {}. Treating frame as blank.", timestamp, e);
                self.emit(PipelineEvent::ExtractionFailed { timestamp, error: &e });
                None
            }
        }
    }

    fn handle_text(
        &self,
        merger: &mut RangeMerger,
        stats: &mut ScanStats,
        timestamp: f64,
        text: Option<String>,
    ) {
        stats.samples += 1;
        let Some(text) = text else {
            stats.failed_extractions += 1;
            return;
        };
        self.emit(PipelineEvent::TextExtracted { timestamp, text: &text });

        let matches = self.detector.detect(&text);
        if matches.is_empty() {
            return;
        }

        debug!("Found {} match(es) at {:.2}s", matches.len(), timestamp);
        self.emit(PipelineEvent::Detected { timestamp, matches: &matches });
        stats.detections += 1;
        merger.absorb(TimestampDetection::new(timestamp, matches));
    }

    fn notify_sampled(&self, sample: &SampledFrame) {
        self.emit(PipelineEvent::FrameSampled {
            timestamp: sample.timestamp,
            frame_index: sample.frame_index,
        });
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_sampler::{MemorySource, RgbFrame};
    use image::Rgb;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Yields `good` frames, then fails to decode. Records when it is dropped.
    struct CorruptAfter {
        good: u8,
        emitted: u8,
        released: Rc<Cell<bool>>,
    }

    impl VideoSource for CorruptAfter {
        fn frame_rate(&self) -> ScanResult<f64> {
            Ok(1.0)
        }

        fn next_frame(&mut self) -> ScanResult<Option<RgbFrame>> {
            if self.emitted == self.good {
                return Err(ScanError::decode("truncated packet"));
            }
            self.emitted += 1;
            Ok(Some(RgbFrame::from_pixel(1, 1, Rgb([self.emitted - 1, 0, 0]))))
        }
    }

    impl Drop for CorruptAfter {
        fn drop(&mut self) {
            self.released.set(true);
        }
    }

    /// Frames whose single pixel holds their index.
    fn indexed_frames(count: u8) -> Vec<RgbFrame> {
        (0..count).map(|i| RgbFrame::from_pixel(1, 1, Rgb([i, 0, 0]))).collect()
    }

    fn frame_index(frame: &RgbFrame) -> u8 {
        frame.get_pixel(0, 0).0[0]
    }

    fn scripted(frame: &RgbFrame) -> ScanResult<String> {
        Ok(match frame_index(frame) {
            0 | 1 => "mail me: jane@corp.io".to_string(),
            3 => "unreadable".to_string(),
            4 => "password: hunter2".to_string(),
            _ => String::new(),
        })
    }

    #[test]
    fn test_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.merge_threshold, 1.0);
        assert_eq!(config.sample_interval, 1.0);
        assert_eq!(config.cadence_policy, CadencePolicy::Round);
        assert_eq!(config.ocr_workers, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let negative = ScanConfig::default().with_merge_threshold(-0.5);
        assert!(matches!(negative.validate(), Err(ScanError::InvalidConfig(_))));

        let zero_interval = ScanConfig::default().with_sample_interval(0.0);
        assert!(matches!(zero_interval.validate(), Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn test_pipeline_rejects_invalid_config() {
        let result = DetectionPipeline::new(scripted, ScanConfig::default().with_merge_threshold(f64::NAN));
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn test_decode_error_aborts_scan_and_releases_source() {
        for workers in [1, 3] {
            let released = Rc::new(Cell::new(false));
            let source = CorruptAfter {
                good: 4,
                emitted: 0,
                released: Rc::clone(&released),
            };
            let config = ScanConfig::default().with_ocr_workers(workers);
            let result = DetectionPipeline::new(scripted, config).unwrap().run(source);

            assert!(matches!(result, Err(ScanError::Decode(_))), "{} workers", workers);
            assert!(released.get(), "{} workers", workers);
        }
    }

    #[test]
    fn test_run_merges_detections() {
        let config = ScanConfig::default().with_sample_interval(0.5);
        let pipeline = DetectionPipeline::new(scripted, config).unwrap();
        let ranges = pipeline.run(MemorySource::new(2.0, indexed_frames(10))).unwrap();

        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start, ranges[0].end), (0.0, 0.5));
        assert_eq!(ranges[0].emails().collect::<Vec<_>>(), vec!["jane@corp.io", "jane@corp.io"]);
        assert_eq!((ranges[1].start, ranges[1].end), (2.0, 2.0));
        assert_eq!(ranges[1].passwords().collect::<Vec<_>>(), vec!["password: hunter2"]);
    }

    #[test]
    fn test_blank_video_gives_no_ranges() {
        let pipeline = DetectionPipeline::new(scripted, ScanConfig::default()).unwrap();
        let ranges = pipeline.run(MemorySource::new(30.0, Vec::new())).unwrap();
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_unknown_rate_aborts_before_extraction() {
        let calls = Rc::new(RefCell::new(0u32));
        let seen = Rc::clone(&calls);
        let pipeline = DetectionPipeline::new(scripted, ScanConfig::default())
            .unwrap()
            .with_observer(move |_| *seen.borrow_mut() += 1);

        let result = pipeline.run(MemorySource::new(0.0, indexed_frames(5)));
        assert!(matches!(result, Err(ScanError::UnknownRate(_))));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_extraction_failure_blanks_frame_only() {
        let flaky = |frame: &RgbFrame| -> ScanResult<String> {
            match frame_index(frame) {
                1 => Err(ScanError::extraction("engine hiccup")),
                _ => Ok("a@b.c".to_string()),
            }
        };
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        let pipeline = DetectionPipeline::new(flaky, ScanConfig::default()).unwrap().with_observer(move |event| {
            if let PipelineEvent::ExtractionFailed { timestamp, .. } = event {
                sink.borrow_mut().push(*timestamp);
            }
        });

        let ranges = pipeline.run(MemorySource::new(1.0, indexed_frames(4))).unwrap();
        assert_eq!(*failures.borrow(), vec![1.0]);
        // 0 and 2 are two seconds apart once frame 1 is blanked.
        let spans: Vec<(f64, f64)> = ranges.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(spans, vec![(0.0, 0.0), (2.0, 3.0)]);
    }

    #[test]
    fn test_observer_sees_events_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let config = ScanConfig::default().with_sample_interval(0.5);
        let pipeline = DetectionPipeline::new(scripted, config).unwrap().with_observer(move |event| {
            let entry = match event {
                PipelineEvent::FrameSampled { timestamp, .. } => format!("sampled {}", timestamp),
                PipelineEvent::TextExtracted { timestamp, .. } => format!("text {}", timestamp),
                PipelineEvent::ExtractionFailed { timestamp, .. } => format!("failed {}", timestamp),
                PipelineEvent::Detected { timestamp, matches } => {
                    format!("detected {} x{}", timestamp, matches.len())
                }
            };
            sink.borrow_mut().push(entry);
        });

        pipeline.run(MemorySource::new(2.0, indexed_frames(2))).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "sampled 0",
                "text 0",
                "detected 0 x1",
                "sampled 0.5",
                "text 0.5",
                "detected 0.5 x1",
            ]
        );
    }

    #[test]
    fn test_pooled_observer_sees_batch_samples_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let config = ScanConfig::default().with_sample_interval(0.5).with_ocr_workers(2);
        let pipeline = DetectionPipeline::new(scripted, config).unwrap().with_observer(move |event| {
            let entry = match event {
                PipelineEvent::FrameSampled { timestamp, .. } => format!("sampled {}", timestamp),
                PipelineEvent::TextExtracted { timestamp, .. } => format!("text {}", timestamp),
                PipelineEvent::ExtractionFailed { timestamp, .. } => format!("failed {}", timestamp),
                PipelineEvent::Detected { timestamp, .. } => format!("detected {}", timestamp),
            };
            sink.borrow_mut().push(entry);
        });

        pipeline.run(MemorySource::new(2.0, indexed_frames(3))).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "sampled 0",
                "sampled 0.5",
                "text 0",
                "detected 0",
                "text 0.5",
                "detected 0.5",
                "sampled 1",
                "text 1",
            ]
        );
    }

    #[test]
    fn test_worker_pool_preserves_order() {
        let sequential = DetectionPipeline::new(scripted, ScanConfig::default().with_sample_interval(0.5))
            .unwrap()
            .run(MemorySource::new(2.0, indexed_frames(10)))
            .unwrap();
        for workers in [2, 3, 8] {
            let config = ScanConfig::default()
                .with_sample_interval(0.5)
                .with_ocr_workers(workers);
            let pooled = DetectionPipeline::new(scripted, config)
                .unwrap()
                .run(MemorySource::new(2.0, indexed_frames(10)))
                .unwrap();
            assert_eq!(pooled, sequential, "{} workers", workers);
        }
    }
}
