//! PCM sample loading for `@XPCM` definitions

use crate::error::{Error, Result};
use crate::targets::PcmSpec;
use serde::Serialize;
use std::path::Path;

/// Sample converted to the target's playback format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PcmSample {
    /// Playback rate in Hz
    pub rate: u32,
    /// Bits per sample (unsigned, centered at half range)
    pub bits: u8,
    pub data: Vec<u8>,
}

/// Load a WAV file and convert it for playback
///
/// `rate` is the requested playback rate, clamped to what the target can
/// play. `volume` is a percentage applied before quantizing.
pub fn load_pcm(path: &Path, rate: u32, volume: i64, spec: PcmSpec) -> Result<PcmSample> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Sample(format!("{}: {}", path.display(), e)))?;
    let wav = reader.spec();

    let samples: Vec<f32> = match wav.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (wav.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
    }
    .map_err(|e| Error::Sample(format!("{}: {}", path.display(), e)))?;

    let mono = downmix(&samples, wav.channels);
    if mono.is_empty() {
        return Err(Error::Sample(format!("{}: no samples", path.display())));
    }

    let rate = rate.clamp(1, spec.max_rate);
    let resampled = resample(&mono, wav.sample_rate, rate);
    let gain = volume as f32 / 100.0;

    Ok(PcmSample {
        rate,
        bits: spec.bits,
        data: resampled.iter().map(|&s| quantize(s * gain, spec.bits)).collect(),
    })
}

fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Simple linear resampling
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate {
        return samples.to_vec();
    }
    let ratio = src_rate as f64 / dst_rate as f64;
    let output_len = ((samples.len() as f64 / ratio) as usize).max(1);
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            let a = samples[src_idx];
            let b = samples[src_idx + 1];
            a + (b - a) * frac
        } else {
            samples[src_idx.min(samples.len() - 1)]
        };
        output.push(sample);
    }

    output
}

/// Map -1.0..=1.0 onto an unsigned `bits` wide value
fn quantize(sample: f32, bits: u8) -> u8 {
    let max = ((1u32 << bits) - 1) as f32;
    let v = ((sample.clamp(-1.0, 1.0) + 1.0) * 0.5 * max).round();
    v as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(-1.0, 8), 0);
        assert_eq!(quantize(1.0, 8), 255);
        assert_eq!(quantize(0.0, 5), 16);
        assert_eq!(quantize(2.0, 5), 31);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        assert_eq!(resample(&input, 16000, 8000).len(), 50);
        assert_eq!(resample(&input, 8000, 8000), input);
    }

    #[test]
    fn test_load_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, 16000, &[0, 16384, 32767, -32768, 0, 0, 0, 0]);

        let spec = PcmSpec { max_rate: 7000, bits: 5 };
        let sample = load_pcm(&path, 8000, 100, spec).unwrap();
        assert_eq!(sample.rate, 7000);
        assert_eq!(sample.bits, 5);
        assert!(!sample.data.is_empty());
        assert!(sample.data.iter().all(|&v| v <= 31));
        assert_eq!(sample.data[0], 16);
    }

    #[test]
    fn test_missing_file() {
        let spec = PcmSpec { max_rate: 8000, bits: 8 };
        let err = load_pcm(Path::new("/nonexistent/x.wav"), 8000, 100, spec).unwrap_err();
        assert!(matches!(err, Error::Sample(_)));
    }
}
