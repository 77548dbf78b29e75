//! Microphone capture via cpal.
//!
//! Each recording attempt probes the device, picks an upload encoding,
//! opens an input stream at the device's native rate, and feeds 16 kHz
//! mono f32 chunks into a ring buffer until the stream handle is dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tracing::{error, info};

use super::format::{pick_upload_format, DeviceCaps, UploadFormat};
use super::ring_buffer::{audio_ring_buffer, AudioConsumer, AudioProducer};
use super::TARGET_SAMPLE_RATE;
use crate::ipc::AudioDeviceInfo;

/// Chunk size pushed into the ring (80 ms at 16 kHz).
const CHUNK_SAMPLES: usize = 1280;

/// Failures raised while acquiring or running the capture device, reduced
/// to a closed set by the classification functions below.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no usable microphone was found")]
    DeviceNotFound,

    #[error("the microphone is busy in another application")]
    DeviceBusy,

    #[error("no audio host is available")]
    HostUnavailable,

    #[error("the input device offers no supported recording format")]
    Unsupported,

    #[error("input stream failure: {0}")]
    Stream(String),
}

impl CaptureError {
    /// Short notice shown to the user when this failure surfaces.
    pub fn notice(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Please allow microphone access to use voice features"
            }
            CaptureError::DeviceNotFound => "No microphone found. Please check your audio devices.",
            CaptureError::DeviceBusy => "Microphone is being used by another application",
            CaptureError::HostUnavailable => "Audio system is not available on this device",
            CaptureError::Unsupported => "Voice recording is not supported on this device",
            CaptureError::Stream(_) => "Could not start recording. Please try again.",
        }
    }
}

/// Keep-alive wrapper for the cpal stream. The callback runs on cpal's own
/// audio thread; we never touch the stream again after creation.
#[allow(dead_code)]
struct SendStream(cpal::Stream);

// SAFETY: the stream is only held so it stays alive and is dropped to stop
// capture. It is never accessed from another thread.
unsafe impl Send for SendStream {}

/// A live capture attempt: the consumer half of the ring the callback
/// writes into, plus the stream handle that keeps it running.
pub struct ActiveCapture {
    consumer: AudioConsumer,
    format: UploadFormat,
    sample_rate: u32,
    stream: Option<SendStream>,
}

impl ActiveCapture {
    /// Upload encoding selected for this attempt.
    pub fn format(&self) -> UploadFormat {
        self.format
    }

    /// Rate of the samples delivered through the ring.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Move everything currently buffered into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        self.consumer.drain_into(out)
    }

    /// Stop the stream and flush whatever the callback pushed last.
    pub fn finish(mut self, out: &mut Vec<f32>) {
        // Dropping the stream stops the callback before the final drain.
        self.stream = None;
        self.consumer.drain_into(out);
    }

    #[cfg(test)]
    pub(crate) fn detached(
        consumer: AudioConsumer,
        format: UploadFormat,
        sample_rate: u32,
    ) -> Self {
        Self {
            consumer,
            format,
            sample_rate,
            stream: None,
        }
    }
}

/// Seam over microphone acquisition so the pipeline can be driven without
/// hardware.
pub trait CaptureEngine: Send {
    /// Probe and open the input device and begin filling the ring buffer.
    fn begin(&mut self, device_name: Option<&str>) -> Result<ActiveCapture, CaptureError>;
}

/// The real cpal-backed engine.
pub struct CpalCapture;

impl CaptureEngine for CpalCapture {
    fn begin(&mut self, device_name: Option<&str>) -> Result<ActiveCapture, CaptureError> {
        open_stream(device_name)
    }
}

// ── Device resolution and probing ───────────────────────────────────

fn resolve_device(
    host: &cpal::Host,
    device_name: Option<&str>,
) -> Result<cpal::Device, CaptureError> {
    match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| classify_message(&e.to_string()))?
            .find(|d| matches!(d.name(), Ok(n) if n == name))
            .ok_or(CaptureError::DeviceNotFound),
        None => host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound),
    }
}

fn probe_device(device: &cpal::Device) -> Result<DeviceCaps, CaptureError> {
    let mut caps = DeviceCaps::default();
    let ranges = device
        .supported_input_configs()
        .map_err(|e| classify_message(&e.to_string()))?;
    for range in ranges {
        caps.record(range.sample_format());
    }
    Ok(caps)
}

fn is_openable(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Pick a stream config we can open, preferring the device default.
fn choose_config(
    device: &cpal::Device,
) -> Result<(StreamConfig, SampleFormat, u32, u16), CaptureError> {
    let default = device
        .default_input_config()
        .map_err(classify_config_error)?;
    if is_openable(default.sample_format()) {
        let rate = default.sample_rate().0;
        let channels = default.channels();
        let sample_format = default.sample_format();
        return Ok((default.config(), sample_format, rate, channels));
    }

    // Exotic default; fall back to any range we know how to open.
    let ranges = device
        .supported_input_configs()
        .map_err(|e| classify_message(&e.to_string()))?;
    for range in ranges {
        if is_openable(range.sample_format()) {
            let cfg = range.with_max_sample_rate();
            let rate = cfg.sample_rate().0;
            let channels = cfg.channels();
            let sample_format = cfg.sample_format();
            return Ok((cfg.config(), sample_format, rate, channels));
        }
    }
    Err(CaptureError::Unsupported)
}

fn open_stream(device_name: Option<&str>) -> Result<ActiveCapture, CaptureError> {
    let host = cpal::default_host();
    let device = resolve_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "unknown".into());

    let caps = probe_device(&device)?;
    let format = pick_upload_format(&caps).ok_or(CaptureError::Unsupported)?;

    let (config, sample_format, native_rate, channels) = choose_config(&device)?;
    info!(
        device = %name,
        native_rate,
        channels,
        ?format,
        "input device ready"
    );

    let (producer, consumer) = audio_ring_buffer(None);
    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, native_rate, producer),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, native_rate, producer),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, native_rate, producer),
        other => Err(CaptureError::Stream(format!(
            "unhandled sample format {other:?}"
        ))),
    }?;
    stream.play().map_err(classify_play_error)?;

    Ok(ActiveCapture {
        consumer,
        format,
        sample_rate: TARGET_SAMPLE_RATE,
        stream: Some(SendStream(stream)),
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: u16,
    native_rate: u32,
    mut producer: AudioProducer,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_SAMPLES * 4);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|s| f32::from_sample(*s)));

                let mono = mix_to_mono(&converted, channels);
                let resampled = resample(&mono, native_rate, TARGET_SAMPLE_RATE);

                pending.extend_from_slice(&resampled);
                while pending.len() >= CHUNK_SAMPLES {
                    // A full ring drops the newest chunk; the recording
                    // ceiling fires long before that can matter.
                    let _ = producer.push_slice(&pending[..CHUNK_SAMPLES]);
                    pending.drain(..CHUNK_SAMPLES);
                }
            },
            move |err| {
                error!("input stream error: {err}");
            },
            None,
        )
        .map_err(classify_build_error)
}

// ── Sample shaping ──────────────────────────────────────────────────

/// Down-mix interleaved frames to mono by averaging channels.
fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = usize::from(channels);
    let mut mono = Vec::with_capacity(samples.len() / ch);
    for frame in samples.chunks_exact(ch) {
        mono.push(frame.iter().sum::<f32>() / ch as f32);
    }
    mono
}

/// Linear resampler between arbitrary rates, mono f32.
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let step = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / step) as usize;
    let mut out = Vec::with_capacity(out_len);
    let mut pos = 0.0f64;
    while out.len() < out_len {
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = input.get(idx).copied().unwrap_or(0.0);
        let b = input.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
        pos += step;
    }
    out
}

// ── Error classification ────────────────────────────────────────────

fn classify_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::Unsupported,
        cpal::BuildStreamError::InvalidArgument => CaptureError::Unsupported,
        other => classify_message(&other.to_string()),
    }
}

fn classify_play_error(e: cpal::PlayStreamError) -> CaptureError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        other => classify_message(&other.to_string()),
    }
}

fn classify_config_error(e: cpal::DefaultStreamConfigError) -> CaptureError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceNotFound,
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => CaptureError::Unsupported,
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            classify_message(&err.to_string())
        }
    }
}

/// Sniff backend-specific error text for the failure classes ALSA, Pulse
/// and friends only report as strings.
fn classify_message(msg: &str) -> CaptureError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        CaptureError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        CaptureError::DeviceBusy
    } else if lower.contains("no such") || lower.contains("not found") {
        CaptureError::DeviceNotFound
    } else if lower.contains("host") || lower.contains("server") || lower.contains("refused") {
        CaptureError::HostUnavailable
    } else {
        CaptureError::Stream(msg.to_string())
    }
}

// ── Device listing ──────────────────────────────────────────────────

/// Enumerate input devices for the shell's device picker.
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut out = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for (idx, dev) in devices.enumerate() {
            if let Ok(name) = dev.name() {
                out.push(AudioDeviceInfo {
                    id: idx as i32,
                    name,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_at_double_rate() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&input, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // Every other input sample, linearly interpolated.
        assert!((out[1] - 2.0).abs() < 0.01);
        assert!((out[10] - 20.0).abs() < 0.01);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_448_to_16k_ratio() {
        let input = vec![0.5f32; 44_800];
        let out = resample(&input, 44_800, 16_000);
        assert_eq!(out.len(), 16_000);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 0.001));
    }

    #[test]
    fn mix_to_mono_averages_frames() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = mix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn mix_to_mono_passes_mono_through() {
        let input = vec![0.25, 0.75];
        assert_eq!(mix_to_mono(&input, 1), input);
    }

    #[test]
    fn message_classification_covers_the_taxonomy() {
        assert!(matches!(
            classify_message("ALSA: Permission denied"),
            CaptureError::PermissionDenied
        ));
        assert!(matches!(
            classify_message("Device or resource busy"),
            CaptureError::DeviceBusy
        ));
        assert!(matches!(
            classify_message("No such device"),
            CaptureError::DeviceNotFound
        ));
        assert!(matches!(
            classify_message("connection to audio server refused"),
            CaptureError::HostUnavailable
        ));
        assert!(matches!(
            classify_message("something else entirely"),
            CaptureError::Stream(_)
        ));
    }

    #[test]
    fn every_error_maps_to_a_notice() {
        let errors = [
            CaptureError::PermissionDenied,
            CaptureError::DeviceNotFound,
            CaptureError::DeviceBusy,
            CaptureError::HostUnavailable,
            CaptureError::Unsupported,
            CaptureError::Stream("x".into()),
        ];
        for err in errors {
            assert!(!err.notice().is_empty());
        }
    }

    #[test]
    fn listing_devices_does_not_panic() {
        // CI machines may have zero input devices; we only require that
        // enumeration completes.
        let _ = list_input_devices();
    }
}
