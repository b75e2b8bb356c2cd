//! Anti-aliased sample rate conversion
//!
//! Built on rubato's FFT resampler. The spectrum is band-limited to the
//! lower of the two Nyquist frequencies before any rate reduction, so content
//! above it is removed rather than folded back into the passband.
//!
//! Two entry points:
//! - [`resample`] / [`resample_frame`]: one-shot conversion of a complete
//!   buffer, delay-compensated so the output lines up with the input.
//! - [`StreamResampler`]: one instance per audio direction, carrying filter
//!   history across consecutive frames so frame boundaries don't click.

use rubato::{FftFixedIn, Resampler};
use std::collections::VecDeque;
use std::time::Instant;
use voice_bridge_core::audio::f32_to_i16;
use voice_bridge_core::{AudioFrame, SampleRate};

use crate::PipelineError;

const PCM16_FULL_SCALE: f32 = 32768.0;

/// Input block size for one-shot conversion
const ONE_SHOT_CHUNK: usize = 1024;

const SUB_CHUNKS: usize = 2;

fn new_engine(
    from: SampleRate,
    to: SampleRate,
    chunk_in: usize,
) -> Result<FftFixedIn<f32>, PipelineError> {
    FftFixedIn::<f32>::new(
        from.as_u32() as usize,
        to.as_u32() as usize,
        chunk_in,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| PipelineError::Resampler(e.to_string()))
}

fn normalize(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / PCM16_FULL_SCALE).collect()
}

/// Output length for `len` input samples, rounded to nearest
fn expected_len(len: usize, from: SampleRate, to: SampleRate) -> usize {
    let (from, to) = (from.as_u32() as u64, to.as_u32() as u64);
    ((len as u64 * to + from / 2) / from) as usize
}

/// Convert a PCM buffer between two rates given in Hz
///
/// Equal rates return the input unchanged. Unsupported rates fail with
/// [`PipelineError::InvalidAudioFormat`]; audio is never passed through
/// at the wrong rate.
pub fn resample(pcm: &[i16], from_hz: u32, to_hz: u32) -> Result<Vec<i16>, PipelineError> {
    let from = SampleRate::from_hz(from_hz)?;
    let to = SampleRate::from_hz(to_hz)?;
    convert(pcm, from, to)
}

/// Convert a complete frame to `to`, keeping its sequence and timestamp
pub fn resample_frame(frame: &AudioFrame, to: SampleRate) -> Result<AudioFrame, PipelineError> {
    let samples = convert(&frame.samples, frame.sample_rate, to)?;
    Ok(AudioFrame::with_timestamp(
        samples,
        to,
        frame.sequence,
        frame.timestamp,
    ))
}

fn convert(pcm: &[i16], from: SampleRate, to: SampleRate) -> Result<Vec<i16>, PipelineError> {
    if from == to {
        return Ok(pcm.to_vec());
    }
    if pcm.is_empty() {
        return Ok(Vec::new());
    }

    let chunk = pcm.len().min(ONE_SHOT_CHUNK);
    let mut engine = new_engine(from, to, chunk)?;
    let delay = engine.output_delay();
    let expected = expected_len(pcm.len(), from, to);
    let wanted = delay + expected;

    let input = normalize(pcm);
    let max_calls = wanted * from.as_u32() as usize / (to.as_u32() as usize * chunk) + 16;

    let mut output: Vec<f32> = Vec::with_capacity(wanted + 2 * chunk);
    let mut block = vec![0.0f32; chunk];
    let mut offset = 0;
    let mut calls = 0;

    while output.len() < wanted && calls < max_calls {
        block.fill(0.0);
        if offset < input.len() {
            let end = (offset + chunk).min(input.len());
            block[..end - offset].copy_from_slice(&input[offset..end]);
            offset = end;
        }

        let out = engine
            .process(std::slice::from_ref(&block), None)
            .map_err(|e| PipelineError::Resampler(e.to_string()))?;
        if let Some(channel) = out.first() {
            output.extend_from_slice(channel);
        }
        calls += 1;
    }

    let mut samples: Vec<i16> = output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| f32_to_i16(s))
        .collect();
    samples.resize(expected, 0);

    Ok(samples)
}

/// Per-direction resampler with carried filter history
///
/// Accepts frames of any length at the source rate and emits fixed-size
/// frames at the target rate. The history belongs to one direction of one
/// call; call [`StreamResampler::reset`] when the call ends.
pub struct StreamResampler {
    from: SampleRate,
    to: SampleRate,
    chunk_in: usize,
    frame_out: usize,
    engine: Option<FftFixedIn<f32>>,
    input: Vec<f32>,
    output: VecDeque<i16>,
    sequence: u64,
    timestamp: Instant,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("chunk_in", &self.chunk_in)
            .field("frame_out", &self.frame_out)
            .field("buffered_in", &self.input.len())
            .field("buffered_out", &self.output.len())
            .finish()
    }
}

impl StreamResampler {
    /// Create a resampler emitting `frame_ms` frames at `to`
    pub fn new(from: SampleRate, to: SampleRate, frame_ms: u32) -> Result<Self, PipelineError> {
        let chunk_in = from.samples_per_frame(frame_ms);
        let frame_out = to.samples_per_frame(frame_ms);
        if chunk_in == 0 || frame_out == 0 {
            return Err(PipelineError::InvalidAudioFormat(format!(
                "{}ms frames are empty at {} -> {}",
                frame_ms, from, to
            )));
        }

        let engine = if from == to {
            None
        } else {
            Some(new_engine(from, to, chunk_in)?)
        };

        tracing::debug!(
            from = from.as_u32(),
            to = to.as_u32(),
            chunk_in,
            frame_out,
            "Stream resampler initialized"
        );

        Ok(Self {
            from,
            to,
            chunk_in,
            frame_out,
            engine,
            input: Vec::with_capacity(chunk_in * 2),
            output: VecDeque::with_capacity(frame_out * 4),
            sequence: 0,
            timestamp: Instant::now(),
        })
    }

    pub fn from_rate(&self) -> SampleRate {
        self.from
    }

    pub fn to_rate(&self) -> SampleRate {
        self.to
    }

    /// Samples per emitted frame
    pub fn frame_samples(&self) -> usize {
        self.frame_out
    }

    pub fn is_identity(&self) -> bool {
        self.engine.is_none()
    }

    /// Feed one frame and collect every completed output frame
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<AudioFrame>, PipelineError> {
        if frame.sample_rate != self.from {
            return Err(PipelineError::InvalidAudioFormat(format!(
                "frame {} is at {}, resampler expects {}",
                frame.sequence, frame.sample_rate, self.from
            )));
        }
        self.timestamp = frame.timestamp;

        match self.engine.as_mut() {
            None => self.output.extend(frame.samples.iter().copied()),
            Some(engine) => {
                self.input.extend(normalize(&frame.samples));
                while self.input.len() >= self.chunk_in {
                    let block: Vec<f32> = self.input.drain(..self.chunk_in).collect();
                    let out = engine
                        .process(std::slice::from_ref(&block), None)
                        .map_err(|e| PipelineError::Resampler(e.to_string()))?;
                    if let Some(channel) = out.first() {
                        self.output.extend(channel.iter().map(|&s| f32_to_i16(s)));
                    }
                }
            },
        }

        Ok(self.drain_frames())
    }

    /// Push out everything still buffered, zero-padding the last frame
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>, PipelineError> {
        if let Some(engine) = self.engine.as_mut() {
            let delay_in = engine.output_delay() * self.from.as_u32() as usize
                / self.to.as_u32() as usize;
            let blocks = (self.input.len() + delay_in).div_ceil(self.chunk_in) + 1;

            let mut pending = std::mem::take(&mut self.input);
            for _ in 0..blocks {
                pending.resize(self.chunk_in, 0.0);
                let out = engine
                    .process(std::slice::from_ref(&pending), None)
                    .map_err(|e| PipelineError::Resampler(e.to_string()))?;
                if let Some(channel) = out.first() {
                    self.output.extend(channel.iter().map(|&s| f32_to_i16(s)));
                }
                pending.clear();
            }
        }

        let remainder = self.output.len() % self.frame_out;
        if remainder != 0 {
            self.output
                .extend(std::iter::repeat(0).take(self.frame_out - remainder));
        }

        Ok(self.drain_frames())
    }

    /// Drop all buffered audio and filter history
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        if self.engine.is_some() {
            self.engine = Some(new_engine(self.from, self.to, self.chunk_in)?);
        }
        self.input.clear();
        self.output.clear();
        self.sequence = 0;
        Ok(())
    }

    fn drain_frames(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::with_capacity(self.output.len() / self.frame_out);
        while self.output.len() >= self.frame_out {
            let samples: Vec<i16> = self.output.drain(..self.frame_out).collect();
            frames.push(AudioFrame::with_timestamp(
                samples,
                self.to,
                self.sequence,
                self.timestamp,
            ));
            self.sequence += 1;
        }
        frames
    }
}
