//! OCR Module
//!
//! Handles text extraction from sampled frames using the tesseract-rs crate.

use crate::error::{ScanError, ScanResult};
use crate::frame_sampler::RgbFrame;
use log::info;
use std::path::PathBuf;
use tesseract_rs::TesseractAPI;

/// Turns a frame into whatever text is visible in it.
///
/// Implementations may be slow and are not expected to be deterministic. An
/// empty string means no text was found.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, frame: &RgbFrame) -> ScanResult<String>;
}

impl<F> TextExtractor for F
where
    F: Fn(&RgbFrame) -> ScanResult<String> + Send + Sync,
{
    fn extract(&self, frame: &RgbFrame) -> ScanResult<String> {
        self(frame)
    }
}

/// Gets the default location where this version of `tesseract-rs` caches its data.
/// The build script downloads language files here.
fn get_tessdata_dir() -> ScanResult<PathBuf> {
    let base_path = if cfg!(target_os = "macos") {
        PathBuf::from(home_var("HOME")?)
            .join("Library")
            .join("Application Support")
    } else if cfg!(target_os = "linux") {
        PathBuf::from(home_var("HOME")?).join(".tesseract-rs")
    } else if cfg!(target_os = "windows") {
        PathBuf::from(home_var("APPDATA")?)
    } else {
        return Err(ScanError::OcrInit("unsupported operating system".into()));
    };
    Ok(base_path.join("tesseract-rs").join("tessdata"))
}

fn home_var(name: &str) -> ScanResult<String> {
    std::env::var(name).map_err(|_| ScanError::OcrInit(format!("{} env var not set", name)))
}

/// Tesseract-backed extractor. One master API instance is initialised up
/// front and cloned for every frame, so it can be shared by worker threads.
pub struct TesseractExtractor {
    api: TesseractAPI,
}

impl TesseractExtractor {
    pub fn new(lang: &str) -> ScanResult<Self> {
        let tessdata_dir = get_tessdata_dir()?;
        let tessdata = tessdata_dir.to_str().ok_or_else(|| {
            ScanError::OcrInit(format!("tessdata path {:?} is not valid UTF-8", tessdata_dir))
        })?;

        let api = TesseractAPI::new();
        api.init(tessdata, lang).map_err(|e| {
            ScanError::OcrInit(format!("failed to initialize Tesseract with language '{}': {}", lang, e))
        })?;
        info!("Tesseract initialized with language '{}' from {:?}", lang, tessdata_dir);

        Ok(TesseractExtractor { api })
    }
}

impl TextExtractor for TesseractExtractor {
    fn extract(&self, frame: &RgbFrame) -> ScanResult<String> {
        let api = self.api.clone();

        api.set_image(
            frame.as_raw(),
            frame.width() as i32,
            frame.height() as i32,
            3, // bytes per pixel for RGB
            (frame.width() * 3) as i32, // bytes per line
        )
        .map_err(|e| ScanError::extraction(format!("failed to set image: {}", e)))?;

        api.recognize()
            .map_err(|e| ScanError::extraction(format!("recognition failed: {}", e)))?;

        api.get_utf8_text()
            .map_err(|e| ScanError::extraction(format!("failed to read recognized text: {}", e)))
    }
}
