//! Compressed reply audio to f32 PCM via Symphonia.

use anyhow::{bail, Context};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

/// Mono samples at the rate the codec reported.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode downloaded reply audio (typically MP3) to mono f32 PCM.
///
/// `extension` is a probe hint taken from the download URL; decoding still
/// works without it because Symphonia sniffs the container.
pub fn decode_audio(bytes: Vec<u8>, extension: Option<&str>) -> anyhow::Result<DecodedAudio> {
    let cursor = std::io::Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("could not identify audio container")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .context("no audio track in response")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("decoder init failed")?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => bail!("packet read failed: {e}"),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                warn!("skipping undecodable packet: {e}");
                continue;
            }
        };

        let spec = *decoded.spec();
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }
        let channels = spec.channels.count().max(1);

        let duration = decoded.capacity();
        let mut sample_buf = SampleBuffer::<f32>::new(duration as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let interleaved = sample_buf.samples();

        if channels == 1 {
            samples.extend_from_slice(interleaved);
        } else {
            for frame in interleaved.chunks(channels) {
                let sum: f32 = frame.iter().sum();
                samples.push(sum / channels as f32);
            }
        }
    }

    if samples.is_empty() {
        bail!("no audio frames decoded");
    }
    let sample_rate = sample_rate.context("decoder reported no sample rate")?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_rejected() {
        let junk = vec![0u8, 1, 2, 3, 4, 5, 6, 7];
        assert!(decode_audio(junk, Some("mp3")).is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(decode_audio(Vec::new(), None).is_err());
    }

    #[test]
    fn duration_uses_the_decoded_rate() {
        let audio = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert!((audio.duration_secs() - 1.0).abs() < f32::EPSILON);
    }
}
