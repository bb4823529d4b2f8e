//! Binarisation of drop-notification crops ahead of Tesseract.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};

/// Largest upscale factor accepted for OCR crops.
pub const MAX_SCALE: u32 = 8;

/// Ink ratio a binarised text crop usually lands near.
const TARGET_INK_RATIO: f32 = 0.12;
/// Candidates with less ink than this hold no readable text.
const MIN_INK_RATIO: f32 = 0.005;
/// Candidates with more ink than this are mostly background.
const MAX_INK_RATIO: f32 = 0.5;

/// Converts image to binary by keeping only bright pixels.
///
/// Pixels where R > threshold AND G > threshold AND B > threshold become black (text).
/// All other pixels become white (background).
///
/// Notification text is drawn bright over the darker game world, so this
/// isolates it well when the background is not itself bright.
pub fn threshold_bright_pixels(img: &RgbaImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        if p[0] > threshold && p[1] > threshold && p[2] > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Otsu's threshold: the grey level that best separates the histogram in two.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background = 0u64;
    let mut background_sum = 0.0f64;
    let mut best = (0u8, -1.0f64);
    for (level, &count) in histogram.iter().enumerate() {
        background += count;
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        background_sum += level as f64 * count as f64;
        let mean_b = background_sum / background as f64;
        let mean_f = (weighted_total - background_sum) / foreground as f64;
        let between = background as f64 * foreground as f64 * (mean_b - mean_f).powi(2);
        if between > best.1 {
            best = (level as u8, between);
        }
    }
    best.0
}

/// Marks pixels brighter than `threshold` as ink (black) on white.
fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Fraction of black pixels.
pub fn ink_ratio(img: &GrayImage) -> f32 {
    let total = img.width() as usize * img.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let ink = img.pixels().filter(|p| p[0] == 0).count();
    ink as f32 / total as f32
}

/// Prepares a notification crop for Tesseract.
///
/// Upscales by `scale`, then binarises twice (fixed bright threshold and
/// Otsu on the grayscale) and keeps whichever result looks most like text.
/// Returns `None` when neither candidate has a plausible amount of ink, or
/// when `scale` is outside 1..=`MAX_SCALE`.
pub fn prepare_for_ocr(img: &RgbaImage, threshold: u8, scale: u32) -> Option<GrayImage> {
    if !(1..=MAX_SCALE).contains(&scale) {
        log::warn!("OCR scale {} out of range 1-{}", scale, MAX_SCALE);
        return None;
    }
    let width = img.width().checked_mul(scale)?;
    let height = img.height().checked_mul(scale)?;
    let scaled = imageops::resize(img, width, height, FilterType::CatmullRom);
    let gray = imageops::grayscale(&scaled);
    let otsu = otsu_threshold(&gray);

    [threshold_bright_pixels(&scaled, threshold), binarize(&gray, otsu)]
        .into_iter()
        .map(|candidate| (ink_ratio(&candidate), candidate))
        .filter(|(ratio, _)| (MIN_INK_RATIO..=MAX_INK_RATIO).contains(ratio))
        .min_by(|a, b| {
            let da = (a.0 - TARGET_INK_RATIO).abs();
            let db = (b.0 - TARGET_INK_RATIO).abs();
            da.total_cmp(&db)
        })
        .map(|(_, candidate)| candidate)
}
