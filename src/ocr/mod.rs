//! Reward notification recognition.
//!
//! Pipeline: crop → preprocess → Tesseract → cleanup → tier lookup.
//! Runs on the recognizer worker thread, never on the control loop.

pub mod classify;
pub mod engine;
pub mod preprocess;

pub use classify::{classify_tier, clean_text, RewardEvent, RewardTier};
pub use engine::{OcrEngine, OcrLine, TesseractEngine};

use std::time::{Duration, Instant};
use thiserror::Error;

use crate::automation::config::OcrConfig;
use crate::capture::Frame;
use preprocess::prepare_for_ocr;

/// Recognition failures. Logged by the worker, never passed to the session.
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("OCR engine failed: {0}")]
    EngineFailed(String),
    #[error("OCR temp file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Settings for one recognizer instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerSettings {
    /// Bright-pixel threshold for the fixed binarisation candidate
    pub threshold: u8,
    pub scale: u32,
    /// Lines scored below this are treated as noise
    pub min_confidence: f32,
    /// Frames captured closer together than this are skipped
    pub cooldown: Duration,
}

impl From<&OcrConfig> for RecognizerSettings {
    fn from(config: &OcrConfig) -> Self {
        Self {
            threshold: config.threshold,
            scale: config.scale,
            min_confidence: config.min_confidence,
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

pub struct Recognizer<E: OcrEngine> {
    engine: E,
    settings: RecognizerSettings,
    last_scan: Option<Instant>,
}

impl<E: OcrEngine> Recognizer<E> {
    pub fn new(engine: E, settings: RecognizerSettings) -> Self {
        Self {
            engine,
            settings,
            last_scan: None,
        }
    }

    /// Reads a drop-region frame.
    ///
    /// `Ok(None)` means there was nothing to read (cooldown, blank crop, or
    /// only banner/noise text). Unclassified text still yields an event with
    /// `classified_tier: None`.
    pub fn recognize(&mut self, frame: &Frame) -> Result<Option<RewardEvent>, RecognizerError> {
        let captured_at = frame.captured_at();
        if let Some(last) = self.last_scan {
            if captured_at.saturating_duration_since(last) < self.settings.cooldown {
                log::debug!("OCR scan skipped (cooldown)");
                return Ok(None);
            }
        }
        self.last_scan = Some(captured_at);

        let Some(prepared) =
            prepare_for_ocr(frame.pixels(), self.settings.threshold, self.settings.scale)
        else {
            return Ok(None);
        };

        let lines = self.engine.read_lines(&prepared)?;
        let min_confidence = self.settings.min_confidence;
        for line in lines.iter().filter(|l| l.confidence < min_confidence) {
            log::debug!("OCR line {:?} dropped at confidence {:.0}", line.text, line.confidence);
        }
        let raw = lines
            .iter()
            .filter(|l| l.confidence >= min_confidence)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let text = clean_text(&raw);
        if text.is_empty() {
            log::debug!("OCR found no meaningful text in {:?}", raw);
            return Ok(None);
        }

        let tier = classify_tier(&text);
        log::info!("OCR read {:?} -> {:?}", text, tier);
        Ok(Some(RewardEvent::new(text, tier)))
    }
}
