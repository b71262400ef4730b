//! PCM sample helpers and WAV framing

use bytes::Bytes;
use std::io::Cursor;

use crate::types::{AudioData, AudioFormat, PcmSpec, VoiceError};

/// Decode little-endian 16-bit samples. A trailing odd byte is ignored.
pub fn pcm_samples(pcm: &[u8]) -> impl Iterator<Item = i16> + '_ {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Encode samples as little-endian 16-bit PCM bytes
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Wrap raw 16-bit PCM in a WAV container
pub fn pcm_to_wav(pcm: &[u8], spec: PcmSpec) -> Result<Vec<u8>, VoiceError> {
    let wav_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec)
            .map_err(|e| VoiceError::AudioError(format!("WAV header: {}", e)))?;
        for sample in pcm_samples(pcm) {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceError::AudioError(format!("WAV write: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::AudioError(format!("WAV finalize: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

/// Strip a WAV container back to raw PCM, reporting the sample layout it declared
pub fn wav_to_pcm(wav: &[u8]) -> Result<AudioData, VoiceError> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| VoiceError::UnsupportedFormat(format!("not a WAV file: {}", e)))?;
    let header = reader.spec();
    if header.bits_per_sample != 16 || header.sample_format != hound::SampleFormat::Int {
        return Err(VoiceError::UnsupportedFormat(format!(
            "expected 16-bit integer WAV, got {}-bit {:?}",
            header.bits_per_sample, header.sample_format
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VoiceError::AudioError(format!("WAV read: {}", e)))?;

    Ok(AudioData {
        data: Bytes::from(samples_to_pcm(&samples)),
        format: AudioFormat::Pcm,
        spec: PcmSpec::new(header.sample_rate, header.channels),
    })
}
