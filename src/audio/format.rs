//! Upload encoding selection and WAV container building.
//!
//! At capture start the pipeline probes the input device and keeps the
//! first entry of `FORMAT_PRIORITY` with a native source at that
//! encoding's sample depth: integer sources upload as compact PCM16,
//! float-only devices keep their samples as float WAV. The chosen
//! encoding determines the MIME type and filename extension the
//! transcription backend sees; unrecognized MIME types fall back to plain
//! WAV because the backend routes uploads by extension.

use cpal::SampleFormat;

/// Candidate upload encodings, most preferred first.
pub const FORMAT_PRIORITY: &[UploadFormat] = &[UploadFormat::WavPcm16, UploadFormat::WavFloat32];

/// Extension used when a MIME type has no table entry.
const DEFAULT_EXTENSION: &str = "wav";

/// Encodings we can build from captured PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    /// 16-bit PCM WAV — half the bytes, accepted everywhere.
    WavPcm16,
    /// 32-bit IEEE-float WAV — lossless passthrough of the capture data.
    WavFloat32,
}

/// What the probed input device can feed us.
#[derive(Debug, Clone, Default)]
pub struct DeviceCaps {
    sample_formats: Vec<SampleFormat>,
}

impl DeviceCaps {
    /// Note a sample format seen among the device's supported configs.
    pub fn record(&mut self, format: SampleFormat) {
        if !self.sample_formats.contains(&format) {
            self.sample_formats.push(format);
        }
    }

    fn has_integer_source(&self) -> bool {
        self.sample_formats
            .iter()
            .any(|f| matches!(f, SampleFormat::I16 | SampleFormat::U16))
    }

    fn has_float_source(&self) -> bool {
        self.sample_formats.contains(&SampleFormat::F32)
    }
}

impl UploadFormat {
    /// Whether the probed device has a source matching this encoding's
    /// sample depth.
    pub fn supported_by(self, caps: &DeviceCaps) -> bool {
        match self {
            UploadFormat::WavPcm16 => caps.has_integer_source(),
            UploadFormat::WavFloat32 => caps.has_float_source(),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            UploadFormat::WavPcm16 | UploadFormat::WavFloat32 => "audio/wav",
        }
    }

    /// Filename extension derived from the MIME type.
    pub fn extension(self) -> &'static str {
        extension_for_mime(self.mime_type())
    }

    /// Build the upload body from 16 kHz mono samples.
    pub fn encode(self, samples: &[f32], sample_rate: u32) -> Vec<u8> {
        match self {
            UploadFormat::WavPcm16 => encode_wav_pcm16(samples, sample_rate),
            UploadFormat::WavFloat32 => encode_wav_float32(samples, sample_rate),
        }
    }
}

/// First candidate the device can satisfy; `None` means recording is not
/// supported on this device at all.
pub fn pick_upload_format(caps: &DeviceCaps) -> Option<UploadFormat> {
    FORMAT_PRIORITY.iter().copied().find(|f| f.supported_by(caps))
}

/// Extension the transcription service expects for a given MIME type.
/// Unknown types ship as WAV so an upload is never rejected for its
/// filename alone.
pub fn extension_for_mime(mime: &str) -> &'static str {
    if mime.contains("wav") {
        "wav"
    } else if mime.contains("webm") {
        "webm"
    } else if mime.contains("ogg") {
        "ogg"
    } else if mime.contains("mp4") || mime.contains("m4a") {
        "m4a"
    } else if mime.contains("mpeg") || mime.contains("mp3") {
        "mp3"
    } else {
        DEFAULT_EXTENSION
    }
}

/// Multipart filename, e.g. `recording_1724580000000.wav`.
pub fn upload_file_name(format: UploadFormat) -> String {
    format!(
        "recording_{}.{}",
        chrono::Utc::now().timestamp_millis(),
        format.extension()
    )
}

fn put_fmt_chunk(buf: &mut Vec<u8>, format_tag: u16, sample_rate: u32, bits: u16) {
    let channels: u16 = 1;
    let bytes_per_sample = u32::from(bits / 8);
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&format_tag.to_le_bytes());
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    // Byte rate and block align collapse for mono.
    buf.extend_from_slice(&(sample_rate * bytes_per_sample).to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample as u16).to_le_bytes());
    buf.extend_from_slice(&bits.to_le_bytes());
}

/// Encode f32 samples as 16-bit PCM WAV.
fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_size = samples.len() as u32 * 2;
    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    put_fmt_chunk(&mut buf, 1, sample_rate, 16);
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        let pcm = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        buf.extend_from_slice(&pcm.to_le_bytes());
    }

    buf
}

/// Encode f32 samples as 32-bit IEEE-float WAV. Non-PCM WAV carries a
/// `fact` chunk with the frame count.
fn encode_wav_float32(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_size = samples.len() as u32 * 4;
    let mut buf = Vec::with_capacity(56 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(48 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    put_fmt_chunk(&mut buf, 3, sample_rate, 32);
    buf.extend_from_slice(b"fact");
    buf.extend_from_slice(&4u32.to_le_bytes());
    buf.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(formats: &[SampleFormat]) -> DeviceCaps {
        let mut caps = DeviceCaps::default();
        for &f in formats {
            caps.record(f);
        }
        caps
    }

    #[test]
    fn pcm16_header_is_well_formed() {
        let wav = encode_wav_pcm16(&[0.0, 0.5, -0.5, 1.0], 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 8);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        // format tag 1 = PCM
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 1);
        // mono, 16 kHz, 16 bits
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 8);
        assert_eq!(wav.len(), 44 + 8);
    }

    #[test]
    fn pcm16_clamps_out_of_range_samples() {
        let wav = encode_wav_pcm16(&[2.0, -2.0], 16_000);
        let first = i16::from_le_bytes(wav[44..46].try_into().unwrap());
        let second = i16::from_le_bytes(wav[46..48].try_into().unwrap());
        assert_eq!(first, 32767);
        assert_eq!(second, -32767);
    }

    #[test]
    fn float32_header_carries_fact_chunk() {
        let wav = encode_wav_float32(&[0.25; 3], 16_000);
        // format tag 3 = IEEE float, 32 bits
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 3);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 32);
        assert_eq!(&wav[36..40], b"fact");
        assert_eq!(u32::from_le_bytes(wav[44..48].try_into().unwrap()), 3);
        assert_eq!(&wav[48..52], b"data");
        assert_eq!(u32::from_le_bytes(wav[52..56].try_into().unwrap()), 12);
        assert_eq!(wav.len(), 56 + 12);
    }

    #[test]
    fn integer_sources_upload_pcm16() {
        let caps = caps_with(&[SampleFormat::F32, SampleFormat::I16]);
        assert_eq!(pick_upload_format(&caps), Some(UploadFormat::WavPcm16));

        let caps = caps_with(&[SampleFormat::U16]);
        assert_eq!(pick_upload_format(&caps), Some(UploadFormat::WavPcm16));
    }

    #[test]
    fn float_only_devices_fall_back_to_float_wav() {
        let caps = caps_with(&[SampleFormat::F32]);
        assert_eq!(pick_upload_format(&caps), Some(UploadFormat::WavFloat32));
    }

    #[test]
    fn no_openable_format_yields_none() {
        let caps = caps_with(&[SampleFormat::F64, SampleFormat::I32]);
        assert_eq!(pick_upload_format(&caps), None);
        assert_eq!(pick_upload_format(&DeviceCaps::default()), None);
    }

    #[test]
    fn extension_lookup_falls_back_to_wav() {
        assert_eq!(extension_for_mime("audio/wav"), "wav");
        assert_eq!(extension_for_mime("audio/webm;codecs=opus"), "webm");
        assert_eq!(extension_for_mime("audio/ogg"), "ogg");
        assert_eq!(extension_for_mime("audio/mp4"), "m4a");
        assert_eq!(extension_for_mime("audio/mpeg"), "mp3");
        assert_eq!(extension_for_mime("application/x-mystery"), "wav");
        assert_eq!(extension_for_mime(""), "wav");
    }

    #[test]
    fn upload_file_name_shape() {
        let name = upload_file_name(UploadFormat::WavPcm16);
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".wav"));
    }
}
