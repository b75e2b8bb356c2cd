//! Audio frame types and utilities

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Energy reported for an empty or all-zero frame
pub const SILENCE_FLOOR_DB: f32 = -96.0;

/// Full-scale reference for 16-bit PCM
const PCM16_FULL_SCALE: f32 = 32768.0;

/// Supported audio sample rates
///
/// Serialized as the plain rate in Hz so configuration files can say
/// `telephony_sample_rate: 8000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz
    Hz22050,
    /// 24kHz - Speech synthesis and realtime backends
    Hz24000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Look up a supported rate
    pub fn from_hz(hz: u32) -> Result<Self> {
        match hz {
            8000 => Ok(SampleRate::Hz8000),
            16000 => Ok(SampleRate::Hz16000),
            22050 => Ok(SampleRate::Hz22050),
            24000 => Ok(SampleRate::Hz24000),
            44100 => Ok(SampleRate::Hz44100),
            48000 => Ok(SampleRate::Hz48000),
            other => Err(Error::InvalidAudioFormat(format!(
                "unsupported sample rate {}Hz",
                other
            ))),
        }
    }

    /// Number of samples in a frame of `frame_ms` milliseconds
    pub fn samples_per_frame(&self, frame_ms: u32) -> usize {
        (self.as_u32() as usize * frame_ms as usize) / 1000
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self> {
        SampleRate::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.as_u32()
    }
}

impl std::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz", self.as_u32())
    }
}

/// Immutable buffer of mono 16-bit PCM samples at a declared rate
///
/// Every frame carries its source rate. Nothing in the bridge converts
/// between rates implicitly; a frame at the wrong rate is an
/// [`Error::InvalidAudioFormat`].
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw PCM samples
    pub samples: Arc<[i16]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when frame was captured/generated
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// RMS energy in dBFS
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from PCM samples
    pub fn new(samples: Vec<i16>, sample_rate: SampleRate, sequence: u64) -> Self {
        Self::with_timestamp(samples, sample_rate, sequence, Instant::now())
    }

    /// Create audio frame with explicit timestamp
    pub fn with_timestamp(
        samples: Vec<i16>,
        sample_rate: SampleRate,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        let duration = duration_of(samples.len(), sample_rate);
        let energy_db = energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            timestamp,
            duration,
            energy_db,
        }
    }

    /// Convert from PCM16 bytes (little-endian)
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(Error::InvalidAudioFormat(format!(
                "PCM16 payload has odd length {}",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();

        Ok(Self::new(samples, sample_rate, sequence))
    }

    /// Convert to PCM16 bytes (little-endian)
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fail unless the frame is at `expected`
    pub fn ensure_rate(&self, expected: SampleRate) -> Result<()> {
        if self.sample_rate != expected {
            return Err(Error::InvalidAudioFormat(format!(
                "frame {} is at {}, expected {}",
                self.sequence, self.sample_rate, expected
            )));
        }
        Ok(())
    }

    /// Concatenate frames that share a sample rate
    pub fn concat(frames: &[AudioFrame]) -> Result<AudioFrame> {
        let Some(first) = frames.first() else {
            return Err(Error::InvalidAudioFormat("no frames to concatenate".into()));
        };

        let total: usize = frames.iter().map(AudioFrame::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in frames {
            frame.ensure_rate(first.sample_rate)?;
            samples.extend_from_slice(&frame.samples);
        }

        Ok(AudioFrame::with_timestamp(
            samples,
            first.sample_rate,
            first.sequence,
            first.timestamp,
        ))
    }
}

/// RMS energy of a PCM16 buffer in dBFS, floored at [`SILENCE_FLOOR_DB`]
pub fn energy_db(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }

    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;

    if rms > 0.0 {
        (20.0 * (rms / PCM16_FULL_SCALE).log10()).max(SILENCE_FLOOR_DB)
    } else {
        SILENCE_FLOOR_DB
    }
}

/// Scale a normalized sample to PCM16 with clipping
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn duration_of(len: usize, sample_rate: SampleRate) -> Duration {
    Duration::from_nanos(len as u64 * 1_000_000_000 / sample_rate.as_u32() as u64)
}

/// Frames accumulated for one caller turn
///
/// Lives from the first speech frame until the turn is finalized and handed
/// to the transcription step.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    sample_rate: SampleRate,
    started_at: Instant,
    voiced: Duration,
}

impl Utterance {
    pub fn new(sample_rate: SampleRate, started_at: Instant) -> Self {
        Self {
            frames: Vec::new(),
            sample_rate,
            started_at,
            voiced: Duration::ZERO,
        }
    }

    /// Append a frame. `voiced` marks frames classified as speech.
    pub fn push(&mut self, frame: AudioFrame, voiced: bool) -> Result<()> {
        frame.ensure_rate(self.sample_rate)?;
        if voiced {
            self.voiced += frame.duration;
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Total buffered duration including trailing silence
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(|f| f.duration).sum()
    }

    /// Duration of frames classified as speech
    pub fn voiced_duration(&self) -> Duration {
        self.voiced
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Flatten into one contiguous frame for upload
    pub fn into_frame(self) -> AudioFrame {
        match AudioFrame::concat(&self.frames) {
            Ok(frame) => frame,
            Err(_) => AudioFrame::with_timestamp(Vec::new(), self.sample_rate, 0, self.started_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz24000.samples_per_frame(20), 480);
        assert_eq!(SampleRate::from_hz(24000).unwrap(), SampleRate::Hz24000);
        assert!(matches!(
            SampleRate::from_hz(11025),
            Err(Error::InvalidAudioFormat(_))
        ));
    }

    #[test]
    fn test_frame_duration_is_exact() {
        let frame = AudioFrame::new(vec![0; 160], SampleRate::Hz8000, 0);
        assert_eq!(frame.duration, Duration::from_millis(20));

        let frame = AudioFrame::new(vec![0; 441], SampleRate::Hz22050, 0);
        assert_eq!(frame.duration, Duration::from_millis(20));
    }

    #[test]
    fn test_pcm16_le_round_trip() {
        let bytes: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0];
        let frame = AudioFrame::from_pcm16_le(&bytes, SampleRate::Hz16000, 0).unwrap();

        assert_eq!(&*frame.samples, &[16384, -16384]);
        assert_eq!(frame.to_pcm16_le(), bytes);
    }

    #[test]
    fn test_odd_pcm_payload_rejected() {
        let result = AudioFrame::from_pcm16_le(&[0x00, 0x40, 0x00], SampleRate::Hz8000, 0);
        assert!(matches!(result, Err(Error::InvalidAudioFormat(_))));
    }

    #[test]
    fn test_energy_calculation() {
        let silent = AudioFrame::new(vec![0; 160], SampleRate::Hz8000, 0);
        assert_eq!(silent.energy_db, SILENCE_FLOOR_DB);

        let half_scale = AudioFrame::new(vec![16384; 160], SampleRate::Hz8000, 0);
        assert!((half_scale.energy_db - (-6.02)).abs() < 0.1);
    }

    #[test]
    fn test_concat_keeps_order_and_first_sequence() {
        let chunks: Vec<AudioFrame> = (0..3)
            .map(|n| AudioFrame::new(vec![n as i16; 160], SampleRate::Hz8000, 7 + n))
            .collect();

        let joined = AudioFrame::concat(&chunks).unwrap();
        assert_eq!(joined.len(), 480);
        assert_eq!(joined.sequence, 7);
        assert_eq!(joined.samples[159], 0);
        assert_eq!(joined.samples[160], 1);
        assert_eq!(joined.duration, Duration::from_millis(60));
    }

    #[test]
    fn test_concat_rejects_mixed_rates() {
        let a = AudioFrame::new(vec![0; 160], SampleRate::Hz8000, 0);
        let b = AudioFrame::new(vec![0; 320], SampleRate::Hz16000, 1);
        assert!(AudioFrame::concat(&[a, b]).is_err());
    }

    #[test]
    fn test_utterance_tracks_voiced_duration() {
        let mut utterance = Utterance::new(SampleRate::Hz16000, Instant::now());
        let speech = AudioFrame::new(vec![8000; 320], SampleRate::Hz16000, 0);
        let silence = AudioFrame::new(vec![0; 320], SampleRate::Hz16000, 1);

        utterance.push(speech, true).unwrap();
        utterance.push(silence, false).unwrap();

        assert_eq!(utterance.duration(), Duration::from_millis(40));
        assert_eq!(utterance.voiced_duration(), Duration::from_millis(20));
        assert_eq!(utterance.into_frame().len(), 640);
    }

    #[test]
    fn test_utterance_rejects_wrong_rate() {
        let mut utterance = Utterance::new(SampleRate::Hz16000, Instant::now());
        let frame = AudioFrame::new(vec![0; 160], SampleRate::Hz8000, 0);
        assert!(utterance.push(frame, true).is_err());
        assert_eq!(utterance.frame_count(), 0);
    }
}
