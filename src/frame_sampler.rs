//! Frame Sampling Module
//!
//! Decodes video files with the ffmpeg-next crate and picks one frame out of
//! every block of frames spanning the configured sample interval.

use crate::error::{ScanError, ScanResult};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Rational;
use image::{ImageBuffer, Rgb};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// A decoded RGB raster.
pub type RgbFrame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// A sequential source of decoded frames.
///
/// Opening the source is the implementor's constructor, closing it is `Drop`.
pub trait VideoSource {
    /// Native frame rate in frames per second.
    fn frame_rate(&self) -> ScanResult<f64>;

    /// Decodes the next frame, or returns `None` at end of stream.
    fn next_frame(&mut self) -> ScanResult<Option<RgbFrame>>;
}

/// How a fractional number of frames per sample is turned into a whole cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CadencePolicy {
    /// Nearest whole frame count (29.97 fps, 1s interval -> every 30th frame).
    #[default]
    Round,
    /// Drop the fractional part (29.97 fps, 1s interval -> every 29th frame).
    Truncate,
}

/// A frame chosen by the sampler together with its position in the video.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// Index of the frame among all decoded frames.
    pub frame_index: u64,
    pub image: RgbFrame,
}

/// Computes how many decoded frames make up one sampling block.
///
/// Always at least one frame, so very low frame rates still make progress.
pub fn sampling_cadence(
    frame_rate: f64,
    sample_interval: f64,
    policy: CadencePolicy,
) -> ScanResult<u64> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(ScanError::UnknownRate(format!("{} fps", frame_rate)));
    }
    if !sample_interval.is_finite() || sample_interval <= 0.0 {
        return Err(ScanError::InvalidConfig(format!(
            "sample interval must be a positive number of seconds, got {}",
            sample_interval
        )));
    }

    let frames_per_sample = frame_rate * sample_interval;
    let cadence = match policy {
        CadencePolicy::Round => frames_per_sample.round(),
        CadencePolicy::Truncate => frames_per_sample.trunc(),
    };
    Ok(cadence.max(1.0) as u64)
}

/// Lazily yields one frame per complete sampling block of a video source.
///
/// The first frame of each block is emitted once the whole block has been
/// decoded, so a trailing partial block produces no sample. The sampler owns
/// the source, and dropping the sampler releases the decoding handle.
pub struct FrameSampler<S: VideoSource> {
    source: S,
    frame_rate: f64,
    cadence: u64,
    next_index: u64,
    pending: Option<(u64, RgbFrame)>,
    finished: bool,
}

impl<S: VideoSource> FrameSampler<S> {
    /// Wraps an opened source. Fails before decoding anything if the source
    /// has no usable frame rate.
    pub fn new(source: S, sample_interval: f64, policy: CadencePolicy) -> ScanResult<Self> {
        let frame_rate = source.frame_rate()?;
        let cadence = sampling_cadence(frame_rate, sample_interval, policy)?;
        debug!(
            "Sampling every {} frame(s) at {:.3} fps ({:?})",
            cadence, frame_rate, policy
        );

        Ok(FrameSampler {
            source,
            frame_rate,
            cadence,
            next_index: 0,
            pending: None,
            finished: false,
        })
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }
}

impl FrameSampler<FfmpegSource> {
    /// Opens a video file and prepares it for sampling.
    pub fn open(path: &Path, sample_interval: f64, policy: CadencePolicy) -> ScanResult<Self> {
        let source = FfmpegSource::open(path)?;
        Self::new(source, sample_interval, policy)
    }
}

impl<S: VideoSource> Iterator for FrameSampler<S> {
    type Item = ScanResult<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.finished = true;
                    self.pending = None;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    self.pending = None;
                    return Some(Err(e));
                }
            };

            let index = self.next_index;
            self.next_index += 1;
            let offset = index % self.cadence;

            if offset == 0 {
                self.pending = Some((index, frame));
            }
            if offset == self.cadence - 1 {
                if let Some((first_index, image)) = self.pending.take() {
                    return Some(Ok(SampledFrame {
                        timestamp: first_index as f64 / self.frame_rate,
                        frame_index: first_index,
                        image,
                    }));
                }
            }
        }
        None
    }
}

/// Already-decoded frames played back at a fixed rate.
pub struct MemorySource {
    frame_rate: f64,
    frames: std::vec::IntoIter<RgbFrame>,
}

impl MemorySource {
    pub fn new(frame_rate: f64, frames: Vec<RgbFrame>) -> Self {
        MemorySource {
            frame_rate,
            frames: frames.into_iter(),
        }
    }
}

impl VideoSource for MemorySource {
    fn frame_rate(&self) -> ScanResult<f64> {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            Ok(self.frame_rate)
        } else {
            Err(ScanError::UnknownRate(format!("{} fps", self.frame_rate)))
        }
    }

    fn next_frame(&mut self) -> ScanResult<Option<RgbFrame>> {
        Ok(self.frames.next())
    }
}

/// A video file decoded through FFmpeg.
pub struct FfmpegSource {
    path: PathBuf,
    ictx: Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    frame_rate: Option<f64>,
    eof_sent: bool,
    decoded: u64,
}

impl FfmpegSource {
    /// Opens the best video stream of a file and sets up an RGB decoder for it.
    pub fn open(path: &Path) -> ScanResult<Self> {
        ffmpeg::init().map_err(|e| ScanError::unreadable(path, e))?;

        let ictx = input(path).map_err(|e| ScanError::unreadable(path, e))?;
        let (stream_index, parameters, frame_rate) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| ScanError::unreadable(path, "no video stream found"))?;
            let frame_rate =
                rational_to_fps(stream.avg_frame_rate()).or_else(|| rational_to_fps(stream.rate()));
            (stream.index(), stream.parameters(), frame_rate)
        };

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|e| ScanError::unreadable(path, e))?;
        let decoder = context_decoder
            .decoder()
            .video()
            .map_err(|e| ScanError::unreadable(path, e))?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| ScanError::unreadable(path, e))?;

        debug!("Acquired decoding handle for {:?}", path);
        Ok(FfmpegSource {
            path: path.to_path_buf(),
            ictx,
            decoder,
            scaler,
            stream_index,
            frame_rate,
            eof_sent: false,
            decoded: 0,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn frame_rate(&self) -> ScanResult<f64> {
        self.frame_rate.ok_or_else(|| {
            ScanError::UnknownRate(format!("{:?} does not report a positive frame rate", self.path))
        })
    }

    fn next_frame(&mut self) -> ScanResult<Option<RgbFrame>> {
        loop {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.decoded += 1;
                return convert_to_rgb(&mut self.scaler, &decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet).map_err(ScanError::decode)?;
                    }
                }
                None => {
                    self.decoder.send_eof().map_err(ScanError::decode)?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        debug!(
            "Released decoding handle for {:?} after {} frames",
            self.path, self.decoded
        );
    }
}

fn rational_to_fps(rate: Rational) -> Option<f64> {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return None;
    }
    let fps = rate.numerator() as f64 / rate.denominator() as f64;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Scales a decoded frame to packed RGB24 and copies it row by row, dropping
/// any stride padding.
fn convert_to_rgb(scaler: &mut ScalingContext, decoded: &Video) -> ScanResult<RgbFrame> {
    let mut rgb_frame = Video::empty();
    scaler.run(decoded, &mut rgb_frame).map_err(ScanError::decode)?;

    let frame_data = rgb_frame.data(0);
    let width = rgb_frame.width() as usize;
    let height = rgb_frame.height() as usize;
    let stride = rgb_frame.stride(0);

    if stride == 0 {
        return Err(ScanError::decode("invalid frame stride"));
    }

    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let start_index = y * stride;
        let end_index = start_index + (width * 3);
        if end_index > frame_data.len() {
            return Err(ScanError::decode("frame data is smaller than expected"));
        }
        pixels.extend_from_slice(&frame_data[start_index..end_index]);
    }

    ImageBuffer::from_vec(width as u32, height as u32, pixels)
        .ok_or_else(|| ScanError::decode("failed to create image buffer from frame data"))
}

/// Estimates how many samples a file will yield, from container metadata only.
///
/// Much faster than decoding, but only an estimate for variable frame rate
/// videos. Used for progress reporting.
pub fn estimate_sample_count(
    path: &Path,
    sample_interval: f64,
    policy: CadencePolicy,
) -> ScanResult<u64> {
    ffmpeg::init().map_err(|e| ScanError::unreadable(path, e))?;
    let ictx = input(path).map_err(|e| ScanError::unreadable(path, e))?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| ScanError::unreadable(path, "no video stream found"))?;

    let fps = rational_to_fps(stream.avg_frame_rate())
        .or_else(|| rational_to_fps(stream.rate()))
        .ok_or_else(|| ScanError::UnknownRate(format!("{:?}", path)))?;
    let cadence = sampling_cadence(fps, sample_interval, policy)?;

    let frame_count = stream.frames();
    let total_frames = if frame_count > 0 {
        frame_count as u64
    } else {
        // Duration is in AV_TIME_BASE units (microseconds).
        let duration = ictx.duration();
        if duration <= 0 {
            return Err(ScanError::decode("could not determine frame count from metadata"));
        }
        let duration_secs = duration as f64 / 1_000_000.0;
        (duration_secs * fps).round() as u64
    };

    info!(
        "Estimated {} frames at {:.3} fps, sampling every {} frame(s).",
        total_frames, fps, cadence
    );
    Ok(total_frames / cadence)
}
