//! PCM16 helpers: byte framing, base64 transport encoding, resampling, and
//! decoding a full item buffer into a playable WAV artifact.

use std::io::Cursor;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{ParleyError, Result};

/// Interpret little-endian bytes as 16-bit samples. A trailing odd byte is dropped.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// Convert normalized float samples to PCM16, clamping out-of-range values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32_768.0) as i16
            } else {
                (clamped * i16::MAX as f32) as i16
            }
        })
        .collect()
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|sample| *sample as f32 / 32_768.0)
        .collect()
}

/// Base64 encoding used by `input_audio_buffer.append`.
pub fn encode_base64(samples: &[i16]) -> String {
    STANDARD.encode(pcm16_to_bytes(samples))
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload)
        .map_err(|error| ParleyError::Protocol(format!("Invalid base64 audio payload: {error}")))
}

/// Linear-interpolation resampler. Identity when the rates match.
pub fn resample_linear(samples: &[i16], rate_in: u32, rate_out: u32) -> Vec<i16> {
    if rate_in == rate_out || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = rate_in as f64 / rate_out as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|index| {
            let position = index as f64 * ratio;
            let base = (position.floor() as usize).min(last);
            let next = (base + 1).min(last);
            let t = position - base as f64;
            let start = samples[base] as f64;
            let end = samples[next] as f64;
            (start + (end - start) * t).round() as i16
        })
        .collect()
}

/// A fully materialized item audio buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub duration: Duration,
    /// Mono 16-bit WAV file bytes.
    pub wav: Vec<u8>,
}

/// Decode a raw PCM16 buffer recorded at `rate_in` into a WAV artifact at `rate_out`.
pub fn decode(bytes: &[u8], rate_in: u32, rate_out: u32) -> Result<DecodedAudio> {
    if rate_in == 0 || rate_out == 0 {
        return Err(ParleyError::Audio(format!(
            "Invalid sample rates {rate_in} -> {rate_out}"
        )));
    }
    let samples = resample_linear(&pcm16_from_bytes(bytes), rate_in, rate_out);
    let wav = encode_wav(&samples, rate_out)?;
    let duration = Duration::from_secs_f64(samples.len() as f64 / rate_out as f64);
    Ok(DecodedAudio {
        samples,
        sample_rate: rate_out,
        duration,
        wav,
    })
}

fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|error| ParleyError::Audio(format!("WAV header write failed: {error}")))?;
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|error| ParleyError::Audio(format!("WAV sample write failed: {error}")))?;
        }
        writer
            .finalize()
            .map_err(|error| ParleyError::Audio(format!("WAV finalize failed: {error}")))?;
    }
    Ok(cursor.into_inner())
}
