//! Bounded frame queues between the real-time thread and the worker
//!
//! One queue per direction, one producer and one consumer each. `push`
//! never blocks: on a full queue the oldest frame is dropped and the overrun
//! is counted. Consumers either block on [`FrameQueue::pop`] (plain threads)
//! or await [`FrameQueue::recv`] (worker tasks).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use voice_bridge_core::AudioFrame;

/// Audio direction a queue carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller to bridge
    Inbound,
    /// Bridge to caller
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The oldest frame was dropped; `dropped` is the running total
    Overrun { dropped: u64 },
}

impl PushOutcome {
    pub fn is_overrun(&self) -> bool {
        matches!(self, PushOutcome::Overrun { .. })
    }
}

/// Bounded drop-oldest FIFO of audio frames
pub struct FrameQueue {
    direction: Direction,
    capacity: usize,
    frames: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    notify: Notify,
    overruns: AtomicU64,
    log_every: u64,
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("direction", &self.direction)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("overruns", &self.overruns())
            .finish()
    }
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(direction: Direction, capacity: usize) -> Self {
        use voice_bridge_config::constants::queues::OVERRUN_LOG_EVERY;

        let capacity = capacity.max(1);
        Self {
            direction,
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            notify: Notify::new(),
            overruns: AtomicU64::new(0),
            log_every: OVERRUN_LOG_EVERY,
        }
    }

    /// Enqueue a frame without blocking, dropping the oldest on overflow
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        let outcome = {
            let mut frames = self.frames.lock();
            let outcome = if frames.len() >= self.capacity {
                frames.pop_front();
                let dropped = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                PushOutcome::Overrun { dropped }
            } else {
                PushOutcome::Queued
            };
            frames.push_back(frame);
            outcome
        };

        self.available.notify_one();
        self.notify.notify_one();

        if let PushOutcome::Overrun { dropped } = outcome {
            metrics::counter!(
                "voice_bridge_queue_overruns_total",
                "direction" => self.direction.as_str()
            )
            .increment(1);

            if dropped == 1 || dropped % self.log_every == 0 {
                tracing::warn!(
                    direction = %self.direction,
                    dropped,
                    capacity = self.capacity,
                    "Frame queue overrun, oldest frame dropped"
                );
            }
        }

        outcome
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    /// Block the calling thread up to `timeout` for a frame
    ///
    /// Returns `None` on timeout. Never call this from an async task.
    pub fn pop(&self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }
            if self.available.wait_until(&mut frames, deadline).timed_out() {
                return frames.pop_front();
            }
        }
    }

    /// Await a frame for up to `timeout`
    ///
    /// Returns `None` on timeout. Single consumer only.
    pub async fn recv(&self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Discard every queued frame, returning how many were removed
    pub fn flush(&self) -> usize {
        let mut frames = self.frames.lock();
        let removed = frames.len();
        frames.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Free slots before the next push overruns
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Total frames dropped since creation
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voice_bridge_core::SampleRate;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0; 160], SampleRate::Hz8000, seq)
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(Direction::Inbound, 4);
        for i in 0..3 {
            assert_eq!(queue.push(frame(i)), PushOutcome::Queued);
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = FrameQueue::new(Direction::Outbound, 3);
        for i in 0..3 {
            queue.push(frame(i));
        }

        assert_eq!(queue.push(frame(3)), PushOutcome::Overrun { dropped: 1 });
        assert_eq!(queue.push(frame(4)), PushOutcome::Overrun { dropped: 2 });
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.overruns(), 2);

        let order: Vec<u64> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn test_capacity_bounded_for_any_interleaving() {
        let queue = FrameQueue::new(Direction::Inbound, 5);
        let mut seed: u32 = 0x2545_f491;
        let mut next_seq = 0u64;
        let mut last_popped: Option<u64> = None;
        let mut pushed = 0u64;
        let mut popped = 0u64;

        for _ in 0..10_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            // bias towards pushing so the queue spends time full
            if seed % 3 != 0 {
                queue.push(frame(next_seq));
                next_seq += 1;
                pushed += 1;
            } else if let Some(f) = queue.try_pop() {
                if let Some(prev) = last_popped {
                    assert!(f.sequence > prev, "frames reordered");
                }
                last_popped = Some(f.sequence);
                popped += 1;
            }
            assert!(queue.len() <= queue.capacity());
        }

        assert_eq!(pushed, popped + queue.overruns() + queue.len() as u64);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue = Arc::new(FrameQueue::new(Direction::Inbound, 8));
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    queue.push(frame(i));
                }
            })
        };

        let mut received = Vec::new();
        while let Some(f) = queue.pop(Duration::from_millis(200)) {
            assert!(queue.len() <= 8);
            received.push(f.sequence);
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(received.len() as u64 + queue.overruns(), 5_000);
    }

    #[test]
    fn test_pop_times_out() {
        let queue = FrameQueue::new(Direction::Inbound, 2);
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_flush_empties_queue() {
        let queue = FrameQueue::new(Direction::Outbound, 10);
        for i in 0..7 {
            queue.push(frame(i));
        }
        assert_eq!(queue.free_slots(), 3);
        assert_eq!(queue.flush(), 7);
        assert!(queue.is_empty());
        assert_eq!(queue.overruns(), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = Arc::new(FrameQueue::new(Direction::Inbound, 4));
        let pusher = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.push(frame(42));
            })
        };

        let got = queue.recv(Duration::from_secs(2)).await;
        pusher.join().unwrap();
        assert_eq!(got.map(|f| f.sequence), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_times_out() {
        let queue = FrameQueue::new(Direction::Inbound, 4);
        assert!(queue.recv(Duration::from_millis(500)).await.is_none());
    }
}
