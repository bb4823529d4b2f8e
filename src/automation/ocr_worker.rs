//! Recognizer worker thread.
//!
//! Receives drop-region frames from the control loop, runs the OCR pipeline
//! on them and sends reward events back. Errors stay on this thread: they are
//! logged and the next frame is processed as usual.

use std::sync::mpsc::TrySendError;
use std::thread::{self, JoinHandle};

use crate::automation::queue::WorkerEnds;
use crate::ocr::{OcrEngine, Recognizer};

/// Runs the recognizer loop until the control loop drops its end.
///
/// This function blocks, so it should be run in a dedicated thread.
pub fn run_ocr_worker<E: OcrEngine>(mut recognizer: Recognizer<E>, ends: WorkerEnds) {
    log::info!("OCR worker started");

    for frame in ends.scans.iter() {
        let event = match recognizer.recognize(&frame) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("OCR worker: recognition failed: {}", e);
                continue;
            }
        };

        match ends.results.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    "OCR worker: result queue full, dropping {:?}",
                    event.recognized_text
                );
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    log::info!("OCR worker finished");
}

/// Starts the worker on its own thread.
pub fn spawn_ocr_worker<E>(recognizer: Recognizer<E>, ends: WorkerEnds) -> std::io::Result<JoinHandle<()>>
where
    E: OcrEngine + Send + 'static,
{
    thread::Builder::new()
        .name("ocr-worker".to_string())
        .spawn(move || run_ocr_worker(recognizer, ends))
}
