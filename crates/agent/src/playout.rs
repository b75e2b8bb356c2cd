//! Paced playout of assistant audio
//!
//! Assistant audio arrives in bursts far larger than the outbound queue
//! (a synthesized reply is seconds long, streaming deltas come faster than
//! real time). `Playout` resamples it to the call rate, holds it on the
//! worker side and feeds the outbound queue only as slots free up, so the
//! queue's drop-oldest policy never eats assistant speech.

use std::collections::VecDeque;
use std::sync::Arc;
use voice_bridge_core::{AudioFrame, SampleRate};
use voice_bridge_pipeline::{FrameQueue, PipelineError, StreamResampler};

pub struct Playout {
    resampler: StreamResampler,
    pending: VecDeque<AudioFrame>,
    queue: Arc<FrameQueue>,
    /// A response is still producing audio
    streaming: bool,
}

impl Playout {
    /// Playout from `from` (bridge output rate) into `queue` at `to`
    pub fn new(
        from: SampleRate,
        to: SampleRate,
        frame_ms: u32,
        queue: Arc<FrameQueue>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            resampler: StreamResampler::new(from, to, frame_ms)?,
            pending: VecDeque::new(),
            queue,
            streaming: false,
        })
    }

    /// Add assistant audio at the bridge output rate
    pub fn enqueue(&mut self, audio: &AudioFrame) -> Result<(), PipelineError> {
        self.streaming = true;
        let frames = self.resampler.process(audio)?;
        self.pending.extend(frames);
        Ok(())
    }

    /// Mark the current response complete and release buffered tail audio
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        let tail = self.resampler.flush()?;
        self.pending.extend(tail);
        Ok(())
    }

    /// Move pending frames into free outbound slots, returns frames moved
    ///
    /// The worker is the queue's only producer, so free slots can only
    /// grow between the check and the push.
    pub fn pump(&mut self) -> usize {
        let mut moved = 0;
        while self.queue.free_slots() > 0 {
            match self.pending.pop_front() {
                Some(frame) => {
                    self.queue.push(frame);
                    moved += 1;
                },
                None => break,
            }
        }
        moved
    }

    /// Drop everything not yet played, returns frames discarded
    pub fn cancel(&mut self) -> usize {
        let discarded = self.pending.len() + self.queue.flush();
        self.pending.clear();
        self.streaming = false;
        if let Err(e) = self.resampler.reset() {
            tracing::warn!(error = %e, "Playout resampler reset failed");
        }
        discarded
    }

    /// Response finished and every frame has been taken by the call
    pub fn is_drained(&self) -> bool {
        !self.streaming && self.pending.is_empty() && self.queue.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Frames held back from the outbound queue
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Playout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playout")
            .field("pending", &self.pending.len())
            .field("queued", &self.queue.len())
            .field("streaming", &self.streaming)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_bridge_pipeline::Direction;

    fn tone(ms: u64, rate: SampleRate) -> AudioFrame {
        let n = rate.as_u32() as usize * ms as usize / 1000;
        let samples = (0..n)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        AudioFrame::new(samples, rate, 0)
    }

    #[test]
    fn test_pump_never_overruns() {
        let queue = Arc::new(FrameQueue::new(Direction::Outbound, 5));
        let mut playout =
            Playout::new(SampleRate::Hz8000, SampleRate::Hz8000, 20, queue.clone()).unwrap();

        playout.enqueue(&tone(1000, SampleRate::Hz8000)).unwrap();
        playout.finish().unwrap();
        assert_eq!(playout.pending_frames(), 50);

        assert_eq!(playout.pump(), 5);
        assert_eq!(playout.pump(), 0);
        assert_eq!(queue.overruns(), 0);

        // the call consumes two frames
        queue.try_pop();
        queue.try_pop();
        assert_eq!(playout.pump(), 2);
        assert_eq!(playout.pending_frames(), 43);
    }

    #[test]
    fn test_resamples_to_call_rate() {
        let queue = Arc::new(FrameQueue::new(Direction::Outbound, 50));
        let mut playout =
            Playout::new(SampleRate::Hz24000, SampleRate::Hz8000, 20, queue.clone()).unwrap();

        playout.enqueue(&tone(400, SampleRate::Hz24000)).unwrap();
        playout.finish().unwrap();
        playout.pump();

        let frames: Vec<AudioFrame> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert!(frames.len() >= 20);
        assert!(frames
            .iter()
            .all(|f| f.sample_rate == SampleRate::Hz8000 && f.len() == 160));
    }

    #[test]
    fn test_drained_only_after_finish_and_playback() {
        let queue = Arc::new(FrameQueue::new(Direction::Outbound, 10));
        let mut playout =
            Playout::new(SampleRate::Hz8000, SampleRate::Hz8000, 20, queue.clone()).unwrap();
        assert!(playout.is_drained());

        playout.enqueue(&tone(60, SampleRate::Hz8000)).unwrap();
        playout.pump();
        while queue.try_pop().is_some() {}
        assert!(!playout.is_drained(), "response still streaming");

        playout.finish().unwrap();
        playout.pump();
        while queue.try_pop().is_some() {}
        assert!(playout.is_drained());
    }

    #[test]
    fn test_cancel_empties_queue_and_backlog() {
        let queue = Arc::new(FrameQueue::new(Direction::Outbound, 5));
        let mut playout =
            Playout::new(SampleRate::Hz8000, SampleRate::Hz8000, 20, queue.clone()).unwrap();

        playout.enqueue(&tone(500, SampleRate::Hz8000)).unwrap();
        playout.pump();
        assert_eq!(queue.len(), 5);

        assert_eq!(playout.cancel(), 25);
        assert!(queue.is_empty());
        assert!(playout.is_drained());
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let queue = Arc::new(FrameQueue::new(Direction::Outbound, 5));
        let mut playout =
            Playout::new(SampleRate::Hz24000, SampleRate::Hz8000, 20, queue).unwrap();
        assert!(playout.enqueue(&tone(20, SampleRate::Hz16000)).is_err());
    }
}
