//! C3 — per-client audio framing (§4.3).
//!
//! Turns a stream of small, bursty binary frames into transcription-ready
//! WAV payloads. No network I/O; pure buffering plus `hound`-backed WAV
//! encode/decode.

use crate::config::AudioBufferConfig;
use crate::error::{RelayError, Result};
use std::io::Cursor;
use std::time::Instant;

/// Per-client accumulator (§3 `ClientBuffer`).
pub struct ClientAudioBuffer {
    config: AudioBufferConfig,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
    first_pending_at: Option<Instant>,
}

impl ClientAudioBuffer {
    #[must_use]
    pub fn new(config: AudioBufferConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            pending_bytes: 0,
            first_pending_at: None,
        }
    }

    /// Feed in one incoming frame. Returns the concatenated PCM payload
    /// once a flush condition is met, per §4.3.
    pub fn add_chunk(&mut self, bytes: Vec<u8>) -> Option<Vec<u8>> {
        if bytes.len() > self.config.small_threshold_bytes {
            let mut combined = self.take_pending();
            combined.extend_from_slice(&bytes);
            return Some(combined);
        }

        if self.pending.is_empty() {
            self.first_pending_at = Some(Instant::now());
        }
        self.pending_bytes += bytes.len();
        self.pending.push(bytes);

        let elapsed = self
            .first_pending_at
            .map(|t| t.elapsed() >= self.config.max_duration)
            .unwrap_or(false);

        if self.pending.len() >= self.config.accumulate_count || elapsed {
            Some(self.take_pending())
        } else {
            None
        }
    }

    /// Flush whatever is pending, regardless of accumulation thresholds.
    pub fn force_flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending())
        }
    }

    fn take_pending(&mut self) -> Vec<u8> {
        self.first_pending_at = None;
        self.pending_bytes = 0;
        let segments = std::mem::take(&mut self.pending);
        segments.into_iter().flatten().collect()
    }
}

/// Emit a standards-compliant RIFF/WAVE header for 16-bit PCM (§4.3 `to_wav`).
///
/// # Errors
///
/// Returns [`RelayError::Audio`] if `pcm` is not a whole number of 16-bit
/// samples, or if the `hound` writer fails.
pub fn to_wav(pcm: &[u8], config: &AudioBufferConfig) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(RelayError::Audio(
            "PCM payload length is not a multiple of the 16-bit sample width".to_owned(),
        ));
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: config.sample_width * 8,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RelayError::Audio(format!("cannot open WAV writer: {e}")))?;
        for sample in pcm.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            writer
                .write_sample(value)
                .map_err(|e| RelayError::Audio(format!("cannot write PCM sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| RelayError::Audio(format!("cannot finalize WAV: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Parse a WAV buffer and return its raw 16-bit PCM samples as little-endian bytes.
fn extract_pcm(wav: &[u8], config: &AudioBufferConfig) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| RelayError::Audio(format!("cannot read WAV: {e}")))?;

    let spec = reader.spec();
    if spec.channels != config.channels
        || spec.sample_rate != config.sample_rate
        || spec.bits_per_sample != config.sample_width * 8
    {
        return Err(RelayError::Audio(format!(
            "WAV spec mismatch: expected {}ch/{}Hz/{}bit, got {}ch/{}Hz/{}bit",
            config.channels,
            config.sample_rate,
            config.sample_width * 8,
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample
        )));
    }

    let mut pcm = Vec::with_capacity(wav.len());
    for sample in reader.samples::<i16>() {
        let sample = sample.map_err(|e| RelayError::Audio(format!("bad PCM sample: {e}")))?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(pcm)
}

/// Parse each chunk, extract PCM frames, and re-emit a single WAV with the
/// union of samples (§4.3 `combine_wav`). A chunk whose spec mismatches
/// `config` is skipped with a warning rather than failing the whole combine.
///
/// # Errors
///
/// Returns [`RelayError::Audio`] if `chunks` is empty or every chunk failed
/// to parse.
pub fn combine_wav(chunks: &[Vec<u8>], config: &AudioBufferConfig) -> Result<Vec<u8>> {
    let mut pcm = Vec::new();
    let mut combined_any = false;

    for (index, chunk) in chunks.iter().enumerate() {
        match extract_pcm(chunk, config) {
            Ok(samples) => {
                pcm.extend_from_slice(&samples);
                combined_any = true;
            }
            Err(e) => {
                tracing::warn!(chunk_index = index, error = %e, "skipping mismatched WAV chunk");
            }
        }
    }

    if !combined_any {
        return Err(RelayError::Audio(
            "no chunk could be parsed as WAV".to_owned(),
        ));
    }

    to_wav(&pcm, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioBufferConfig {
        AudioBufferConfig::default()
    }

    fn pcm_samples(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn add_chunk_accumulates_small_frames_until_count_threshold() {
        let mut buffer = ClientAudioBuffer::new(AudioBufferConfig {
            accumulate_count: 2,
            ..config()
        });
        assert!(buffer.add_chunk(vec![1, 2]).is_none());
        let flushed = buffer.add_chunk(vec![3, 4]).expect("flush at threshold");
        assert_eq!(flushed, vec![1, 2, 3, 4]);
    }

    #[test]
    fn add_chunk_above_threshold_flushes_immediately_with_prefix() {
        let mut buffer = ClientAudioBuffer::new(AudioBufferConfig {
            small_threshold_bytes: 4,
            ..config()
        });
        assert!(buffer.add_chunk(vec![1, 2]).is_none());
        let big = vec![0u8; 8];
        let flushed = buffer.add_chunk(big.clone()).expect("large frame flushes");
        assert_eq!(flushed[..2], [1, 2]);
        assert_eq!(flushed[2..], big[..]);
    }

    #[test]
    fn force_flush_drains_pending_and_then_is_idempotent() {
        let mut buffer = ClientAudioBuffer::new(config());
        buffer.add_chunk(vec![9, 9]);
        assert_eq!(buffer.force_flush(), Some(vec![9, 9]));
        assert_eq!(buffer.force_flush(), None);
    }

    #[test]
    fn to_wav_round_trips_through_extract_pcm() {
        let cfg = config();
        let pcm = pcm_samples(&[100, -100, 32000, -32000]);
        let wav = to_wav(&pcm, &cfg).expect("encode");
        let extracted = extract_pcm(&wav, &cfg).expect("decode");
        assert_eq!(extracted, pcm);
    }

    #[test]
    fn combine_wav_concatenates_pcm_across_chunks() {
        let cfg = config();
        let a = to_wav(&pcm_samples(&[1, 2, 3]), &cfg).expect("encode a");
        let b = to_wav(&pcm_samples(&[4, 5, 6]), &cfg).expect("encode b");

        let combined = combine_wav(&[a, b], &cfg).expect("combine");
        let pcm = extract_pcm(&combined, &cfg).expect("decode combined");
        assert_eq!(pcm, pcm_samples(&[1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn combine_wav_skips_mismatched_chunk_but_keeps_the_rest() {
        let cfg = config();
        let good = to_wav(&pcm_samples(&[7, 8]), &cfg).expect("encode good");
        let mismatched_cfg = AudioBufferConfig {
            sample_rate: 8000,
            ..cfg.clone()
        };
        let bad = to_wav(&pcm_samples(&[1, 1]), &mismatched_cfg).expect("encode bad");

        let combined = combine_wav(&[good, bad], &cfg).expect("combine");
        let pcm = extract_pcm(&combined, &cfg).expect("decode combined");
        assert_eq!(pcm, pcm_samples(&[7, 8]));
    }

    #[test]
    fn combine_wav_with_no_parseable_chunk_errors() {
        let cfg = config();
        let result = combine_wav(&[vec![0, 1, 2, 3]], &cfg);
        assert!(result.is_err());
    }
}
