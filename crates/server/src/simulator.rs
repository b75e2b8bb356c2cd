//! WAV-driven call simulation
//!
//! Stands in for a telephony stack: a dedicated thread plays the caller's
//! WAV file into a [`BridgeSession`] at frame pace, and every frame the
//! session hands back is recorded to the output WAV.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use voice_bridge_agent::{
    Bridge, BridgeEvent, BridgeSession, CallAdapter, CallContext, SessionConfig,
};
use voice_bridge_config::Settings;
use voice_bridge_core::{AudioFrame, SampleRate};
use voice_bridge_pipeline::resample;

use crate::ServerError;

/// Call adapter recording outbound audio to a WAV file
pub struct WavCallAdapter {
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
    frames: AtomicU64,
}

impl WavCallAdapter {
    pub fn create(path: impl AsRef<Path>, sample_rate: SampleRate) -> Result<Self, ServerError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: sample_rate.as_u32(),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: Mutex::new(Some(WavWriter::create(path, spec)?)),
            frames: AtomicU64::new(0),
        })
    }

    /// Frames received so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Write the WAV header. Later frames are dropped.
    pub fn finalize(&self) -> Result<(), ServerError> {
        match self.writer.lock().take() {
            Some(writer) => Ok(writer.finalize()?),
            None => Ok(()),
        }
    }
}

impl CallAdapter for WavCallAdapter {
    fn send_audio_frame(&self, frame: AudioFrame) {
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return;
        };
        for &sample in frame.samples.iter() {
            if let Err(e) = writer.write_sample(sample) {
                tracing::warn!(error = %e, "Failed to record outbound audio");
                return;
            }
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Load a mono 16-bit WAV at `rate`, resampling if needed
pub fn load_caller_audio(path: impl AsRef<Path>, rate: SampleRate) -> Result<Vec<i16>, ServerError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
    {
        return Err(ServerError::InvalidInput(format!(
            "expected mono 16-bit PCM, got {} channel(s) at {} bits",
            spec.channels, spec.bits_per_sample
        )));
    }

    let samples = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    if spec.sample_rate == rate.as_u32() {
        return Ok(samples);
    }

    tracing::info!(
        from = spec.sample_rate,
        to = rate.as_u32(),
        "Resampling caller audio to telephony rate"
    );
    resample(&samples, spec.sample_rate, rate.as_u32())
        .map_err(|e| ServerError::InvalidInput(e.to_string()))
}

/// Cut `samples` into frames of `frame_len`, zero-padding the last one
fn split_frames(samples: &[i16], frame_len: usize) -> Vec<Vec<i16>> {
    samples
        .chunks(frame_len.max(1))
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(frame_len, 0);
            frame
        })
        .collect()
}

/// Outcome of one simulated call
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub frames_sent: u64,
    pub frames_played: u64,
    pub turns: usize,
    pub inbound_overruns: u64,
}

/// Real-time caller: one frame per frame period, then `tail` of silence,
/// then hang up
fn run_caller(session: Arc<BridgeSession>, frames: Vec<Vec<i16>>, tail: Duration) -> u64 {
    let rate = session.call_rate();
    let frame_len = frames.first().map(|f| f.len()).unwrap_or(0);
    let period = Duration::from_secs_f64(frame_len as f64 / rate.as_u32() as f64);
    let tail_frames = if period.is_zero() {
        0
    } else {
        (tail.as_millis() / period.as_millis().max(1)) as usize
    };

    let silence = vec![0i16; frame_len];
    let started = Instant::now();
    let mut sent = 0u64;

    for samples in frames.into_iter().chain(std::iter::repeat(silence).take(tail_frames)) {
        let due = started + period * sent as u32;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        let frame = AudioFrame::with_timestamp(samples, rate, sent, due);
        if let Err(e) = session.on_audio_frame(frame) {
            tracing::warn!(sequence = sent, error = %e, "Caller frame rejected");
        }
        sent += 1;
    }

    session.on_call_ended();
    sent
}

/// Run one call through `bridge` using the simulator settings
pub async fn simulate(settings: &Settings, bridge: Bridge) -> Result<SimulationReport, ServerError> {
    let input = settings
        .simulator
        .input_wav
        .as_deref()
        .ok_or_else(|| ServerError::InvalidInput("simulator.input_wav is not set".to_string()))?;

    let call_id = uuid::Uuid::new_v4().to_string();
    let context = CallContext::from_settings(call_id, &settings.bridge)?;
    let samples = load_caller_audio(input, context.sample_rate)?;
    let frames = split_frames(&samples, context.frame_samples());
    let adapter = Arc::new(WavCallAdapter::create(
        &settings.simulator.output_wav,
        context.sample_rate,
    )?);

    tracing::info!(
        input,
        output = %settings.simulator.output_wav,
        frames = frames.len(),
        "Simulated call starting"
    );

    let session = Arc::new(BridgeSession::start(
        context,
        adapter.clone(),
        bridge,
        SessionConfig::from_settings(settings),
    )?);

    let mut events = session.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::CallerTranscript { text }) => tracing::info!(%text, "Caller"),
                Ok(BridgeEvent::AssistantTranscript { text }) => {
                    tracing::info!(%text, "Assistant")
                },
                Ok(event) => tracing::debug!(?event, "Bridge event"),
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let tail = Duration::from_millis(settings.simulator.tail_ms);
    let caller = {
        let session = session.clone();
        std::thread::Builder::new()
            .name("call-clock".to_string())
            .spawn(move || run_caller(session, frames, tail))
            .map_err(|e| ServerError::Internal(e.to_string()))?
    };

    let frames_sent = tokio::task::spawn_blocking(move || caller.join())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .map_err(|_| ServerError::Internal("caller thread panicked".to_string()))?;

    let report = SimulationReport {
        frames_sent,
        frames_played: adapter.frames(),
        turns: session.history().len(),
        inbound_overruns: session.inbound_overruns(),
    };

    drop(session);
    logger.abort();
    adapter.finalize()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_split_frames_pads_last() {
        let frames = split_frames(&[1; 350], 160);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 160));
        assert_eq!(frames[2][29], 1);
        assert_eq!(frames[2][30], 0);
    }

    #[test]
    fn test_load_resamples_to_call_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caller.wav");
        write_wav(&path, 16000, 1, &vec![500; 16000]);

        let samples = load_caller_audio(&path, SampleRate::Hz8000).unwrap();
        assert!((7900..=8100).contains(&samples.len()), "got {}", samples.len());
    }

    #[test]
    fn test_load_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 8000, 2, &[0; 320]);

        assert!(matches!(
            load_caller_audio(&path, SampleRate::Hz8000),
            Err(ServerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_adapter_records_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let adapter = WavCallAdapter::create(&path, SampleRate::Hz8000).unwrap();

        for seq in 0..5 {
            adapter.send_audio_frame(AudioFrame::new(vec![100; 160], SampleRate::Hz8000, seq));
        }
        adapter.finalize().unwrap();
        adapter.send_audio_frame(AudioFrame::new(vec![100; 160], SampleRate::Hz8000, 5));

        assert_eq!(adapter.frames(), 5);
        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 800);
    }
}
