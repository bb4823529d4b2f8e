//! Bounded queues between the control loop and the recognizer thread.
//!
//! Uses std::sync::mpsc sync channels, one in each direction, each with a
//! single producer and a single consumer. The control loop never blocks on
//! either end: frames are offered with `try_send` and dropped when the
//! recognizer is busy, results are drained with `try_recv`.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use crate::capture::Frame;
use crate::ocr::RewardEvent;

/// Frames waiting for recognition. Small: a stale drop banner is useless.
pub const SCAN_QUEUE_CAPACITY: usize = 2;
/// Results waiting for the control loop.
pub const RESULT_QUEUE_CAPACITY: usize = 16;

/// The control loop's end of the recognizer queues.
pub struct RecognizerLink {
    scans: SyncSender<Frame>,
    results: Receiver<RewardEvent>,
}

/// The worker's end of the recognizer queues.
pub struct WorkerEnds {
    pub scans: Receiver<Frame>,
    pub results: SyncSender<RewardEvent>,
}

/// Creates both queues and splits them into the two ends.
pub fn create_recognizer_queues() -> (RecognizerLink, WorkerEnds) {
    let (scan_tx, scan_rx) = sync_channel(SCAN_QUEUE_CAPACITY);
    let (result_tx, result_rx) = sync_channel(RESULT_QUEUE_CAPACITY);
    (
        RecognizerLink {
            scans: scan_tx,
            results: result_rx,
        },
        WorkerEnds {
            scans: scan_rx,
            results: result_tx,
        },
    )
}

impl RecognizerLink {
    /// Offers a frame without blocking. Returns false if it was dropped.
    pub fn submit(&self, frame: Frame) -> bool {
        match self.scans.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Recognizer busy, dropping scan");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Recognizer has exited, dropping scan");
                false
            }
        }
    }

    /// Takes every result that is ready right now.
    pub fn drain(&self) -> Vec<RewardEvent> {
        self.results.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::time::Instant;

    fn frame() -> Frame {
        Frame::new(RgbaImage::new(4, 4), Instant::now())
    }

    #[test]
    fn test_scan_queue_drops_when_full() {
        let (link, worker) = create_recognizer_queues();

        for _ in 0..SCAN_QUEUE_CAPACITY {
            assert!(link.submit(frame()));
        }
        assert!(!link.submit(frame()));

        assert!(worker.scans.try_recv().is_ok());
        assert!(link.submit(frame()));
    }

    #[test]
    fn test_drain_is_non_blocking() {
        let (link, worker) = create_recognizer_queues();
        assert!(link.drain().is_empty());

        worker
            .results
            .send(RewardEvent::new("Candy Corn".to_string(), None))
            .unwrap();
        worker
            .results
            .send(RewardEvent::new("Old Boot".to_string(), None))
            .unwrap();

        let drained = link.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].recognized_text, "Candy Corn");
    }

    #[test]
    fn test_submit_after_worker_exit_is_dropped() {
        let (link, worker) = create_recognizer_queues();
        drop(worker);

        assert!(!link.submit(frame()));
        assert!(link.drain().is_empty());
    }
}
