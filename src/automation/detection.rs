//! Indicator location via colour analysis of the reeling bar.
//!
//! The bar is recognised purely by colour:
//! 1. The frame colour gives the bar's span across the axis and its extent along it
//! 2. Zone-coloured pixels inside the span form the target zone
//! 3. Indicator-coloured pixels give the indicator position
//!
//! All positions are normalised to 0.0-1.0 along the bar, so the controller
//! never sees pixels.

use std::time::Instant;

use crate::automation::config::{BarAxis, BarGeometry};
use crate::capture::Frame;

/// Target zone bounds, normalised along the bar (`low <= high`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetZone {
    pub low: f32,
    pub high: f32,
}

/// What the locator saw in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Indicator and zone both located
    Found { position: f32, zone: TargetZone },
    /// No plausible indicator (bar absent or indicator missing)
    NotFound,
    /// Bar visible but the target zone is not rendered
    ZoneUnknown,
}

/// Span of the bar across its axis, in frame pixels. Reused as a search hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarSpan {
    pub start: u32,
    pub end: u32,
}

/// One locator result per control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSample {
    pub reading: Reading,
    /// 0.0 when nothing was found
    pub confidence: f32,
    pub timestamp: Instant,
    pub bar: Option<BarSpan>,
}

impl IndicatorSample {
    pub fn not_found(timestamp: Instant, bar: Option<BarSpan>) -> Self {
        Self {
            reading: Reading::NotFound,
            confidence: 0.0,
            timestamp,
            bar,
        }
    }

    pub fn zone_unknown(timestamp: Instant, bar: BarSpan) -> Self {
        Self {
            reading: Reading::ZoneUnknown,
            confidence: 0.0,
            timestamp,
            bar: Some(bar),
        }
    }

    /// True when the indicator was found with usable confidence.
    pub fn is_valid(&self, confidence_threshold: f32) -> bool {
        matches!(self.reading, Reading::Found { .. }) && self.confidence >= confidence_threshold
    }
}

/// Locator parameters derived from the config.
#[derive(Debug, Clone)]
pub struct LocatorSettings {
    pub geometry: BarGeometry,
}

/// Frame accessor in bar coordinates: `u` runs along the bar, `v` across it.
struct AxisView<'a> {
    frame: &'a Frame,
    axis: BarAxis,
    tolerance: u8,
}

impl<'a> AxisView<'a> {
    fn along_len(&self) -> u32 {
        match self.axis {
            BarAxis::Vertical => self.frame.height(),
            BarAxis::Horizontal => self.frame.width(),
        }
    }

    fn across_len(&self) -> u32 {
        match self.axis {
            BarAxis::Vertical => self.frame.width(),
            BarAxis::Horizontal => self.frame.height(),
        }
    }

    fn matches(&self, u: u32, v: u32, color: [u8; 3]) -> bool {
        let rgb = match self.axis {
            BarAxis::Vertical => self.frame.rgb(v, u),
            BarAxis::Horizontal => self.frame.rgb(u, v),
        };
        color_matches(rgb, color, self.tolerance)
    }

    /// Number of pixels of `color` on line `u` within `span`.
    fn count_in_line(&self, u: u32, span: BarSpan, color: [u8; 3]) -> u32 {
        (span.start..=span.end)
            .filter(|&v| self.matches(u, v, color))
            .count() as u32
    }

    fn line_has(&self, u: u32, span: BarSpan, color: [u8; 3]) -> bool {
        (span.start..=span.end).any(|v| self.matches(u, v, color))
    }
}

/// Per-channel colour comparison with tolerance.
pub fn color_matches(pixel: [u8; 3], target: [u8; 3], tolerance: u8) -> bool {
    pixel
        .iter()
        .zip(target.iter())
        .all(|(&p, &t)| p.abs_diff(t) <= tolerance)
}

/// Finds the bar span by the first frame-coloured pixel in scan order and the
/// last frame-coloured pixel on the same line.
fn find_bar_span(view: &AxisView, frame_color: [u8; 3]) -> Option<BarSpan> {
    let across = view.across_len();
    for u in 0..view.along_len() {
        if let Some(start) = (0..across).find(|&v| view.matches(u, v, frame_color)) {
            let end = (start..across)
                .rev()
                .find(|&v| view.matches(u, v, frame_color))
                .unwrap_or(start);
            return Some(BarSpan { start, end });
        }
    }
    None
}

/// Checks that a previously found span still shows the bar frame.
fn span_still_valid(view: &AxisView, span: BarSpan, frame_color: [u8; 3]) -> bool {
    if span.end >= view.across_len() || span.start > span.end {
        return false;
    }
    (0..view.along_len()).any(|u| view.matches(u, span.start, frame_color))
}

/// Groups sorted line indices into sections, bridging gaps up to `max_gap` lines.
fn group_sections(lines: &[u32], max_gap: u32) -> Vec<(u32, u32)> {
    let mut sections = Vec::new();
    let mut iter = lines.iter().copied();
    let Some(first) = iter.next() else {
        return sections;
    };

    let mut start = first;
    let mut prev = first;
    for line in iter {
        if line - prev - 1 > max_gap {
            sections.push((start, prev));
            start = line;
        }
        prev = line;
    }
    sections.push((start, prev));
    sections
}

/// Locates the indicator and target zone in `frame`.
///
/// `previous` supplies the bar span found on the last tick; it is tried first
/// and the full frame is scanned only when the bar has moved. The result only
/// depends on the frame contents and the hint.
pub fn locate(
    frame: &Frame,
    previous: Option<&IndicatorSample>,
    settings: &LocatorSettings,
) -> IndicatorSample {
    let geometry = &settings.geometry;
    let timestamp = frame.captured_at();
    let view = AxisView {
        frame,
        axis: geometry.axis,
        tolerance: geometry.color_tolerance,
    };

    if view.along_len() == 0 || view.across_len() == 0 {
        return IndicatorSample::not_found(timestamp, None);
    }

    let hinted = previous
        .and_then(|p| p.bar)
        .filter(|span| span_still_valid(&view, *span, geometry.frame_color));
    let Some(span) = hinted.or_else(|| find_bar_span(&view, geometry.frame_color)) else {
        return IndicatorSample::not_found(timestamp, None);
    };

    // Extent of the bar along its axis, from the frame outline
    let frame_lines: Vec<u32> = (0..view.along_len())
        .filter(|&u| view.line_has(u, span, geometry.frame_color))
        .collect();
    let bar_start = frame_lines.first().copied().unwrap_or(0);
    let mut bar_end = frame_lines.last().copied().unwrap_or(0);
    if bar_end < bar_start + 2 {
        // Only a border line is visible; the bar runs to the end of the capture
        bar_end = view.along_len() - 1;
    }

    let zone_lines: Vec<u32> = (bar_start..=bar_end)
        .filter(|&u| view.line_has(u, span, geometry.zone_color))
        .collect();
    if zone_lines.is_empty() {
        return IndicatorSample::zone_unknown(timestamp, span);
    }

    let mut indicator_first = None;
    let mut indicator_last = 0;
    let mut indicator_lines = 0u32;
    let mut indicator_pixels = 0u32;
    for u in bar_start..=bar_end {
        let count = view.count_in_line(u, span, geometry.indicator_color);
        if count > 0 {
            indicator_first.get_or_insert(u);
            indicator_last = u;
            indicator_lines += 1;
            indicator_pixels += count;
        }
    }
    let Some(indicator_first) = indicator_first else {
        return IndicatorSample::not_found(timestamp, Some(span));
    };
    if indicator_pixels < geometry.min_indicator_pixels {
        return IndicatorSample::not_found(timestamp, Some(span));
    }

    let indicator_height = indicator_last - indicator_first + 1;
    // The indicator overdraws the zone, so bridge gaps up to twice its height
    let sections = group_sections(&zone_lines, indicator_height * 2);
    let Some(&(zone_start, zone_end)) = sections
        .iter()
        .reduce(|best, s| if s.1 - s.0 > best.1 - best.0 { s } else { best })
    else {
        return IndicatorSample::zone_unknown(timestamp, span);
    };

    let length = (bar_end - bar_start).max(1) as f32;
    let normalize = |u: f32| ((u - bar_start as f32) / length).clamp(0.0, 1.0);
    let center = (indicator_first + indicator_last) as f32 / 2.0;

    IndicatorSample {
        reading: Reading::Found {
            position: normalize(center),
            zone: TargetZone {
                low: normalize(zone_start as f32),
                high: normalize(zone_end as f32),
            },
        },
        confidence: indicator_lines as f32 / indicator_height as f32,
        timestamp,
        bar: Some(span),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const BACKGROUND: [u8; 3] = [80, 80, 80];

    /// Bar outline at columns 10..=40, rows 20..=220 (200 rows of travel).
    pub(crate) fn bar_frame(zones: &[(u32, u32)], indicator_rows: &[u32]) -> Frame {
        let geometry = BarGeometry::default();
        let mut img = RgbaImage::from_pixel(
            60,
            260,
            Rgba([BACKGROUND[0], BACKGROUND[1], BACKGROUND[2], 255]),
        );
        let paint = |img: &mut RgbaImage, x: u32, y: u32, c: [u8; 3]| {
            img.put_pixel(x, y, Rgba([c[0], c[1], c[2], 255]));
        };

        for y in 20..=220 {
            paint(&mut img, 10, y, geometry.frame_color);
            paint(&mut img, 40, y, geometry.frame_color);
        }
        for x in 10..=40 {
            paint(&mut img, x, 20, geometry.frame_color);
            paint(&mut img, x, 220, geometry.frame_color);
        }
        for &(start, end) in zones {
            for y in start..=end {
                for x in 11..=39 {
                    paint(&mut img, x, y, geometry.zone_color);
                }
            }
        }
        for &y in indicator_rows {
            for x in 15..=35 {
                paint(&mut img, x, y, geometry.indicator_color);
            }
        }
        Frame::new(img, Instant::now())
    }

    fn settings() -> LocatorSettings {
        LocatorSettings {
            geometry: BarGeometry::default(),
        }
    }

    fn found(sample: &IndicatorSample) -> (f32, TargetZone) {
        match sample.reading {
            Reading::Found { position, zone } => (position, zone),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_locates_indicator_and_zone() {
        let indicator: Vec<u32> = (115..=125).collect();
        let frame = bar_frame(&[(100, 140)], &indicator);

        let sample = locate(&frame, None, &settings());
        let (position, zone) = found(&sample);

        assert!((position - 0.5).abs() < 1e-6, "position {}", position);
        assert!((zone.low - 0.4).abs() < 1e-6);
        assert!((zone.high - 0.6).abs() < 1e-6);
        assert_eq!(sample.confidence, 1.0);
        assert_eq!(sample.bar, Some(BarSpan { start: 10, end: 40 }));
    }

    #[test]
    fn test_empty_screen_is_not_found() {
        let frame = Frame::new(
            RgbaImage::from_pixel(60, 260, Rgba([0, 0, 0, 255])),
            Instant::now(),
        );
        let sample = locate(&frame, None, &settings());

        assert_eq!(sample.reading, Reading::NotFound);
        assert_eq!(sample.confidence, 0.0);
        assert_eq!(sample.bar, None);
    }

    #[test]
    fn test_bar_without_zone_is_zone_unknown() {
        let frame = bar_frame(&[], &[100, 101, 102]);
        let sample = locate(&frame, None, &settings());

        assert_eq!(sample.reading, Reading::ZoneUnknown);
        assert_eq!(sample.confidence, 0.0);
    }

    #[test]
    fn test_bar_without_indicator_is_not_found() {
        let frame = bar_frame(&[(100, 140)], &[]);
        let sample = locate(&frame, None, &settings());

        assert_eq!(sample.reading, Reading::NotFound);
        assert!(sample.bar.is_some());
    }

    #[test]
    fn test_indicator_at_edge_is_found_not_missing() {
        let frame = bar_frame(&[(100, 140)], &[21, 22, 23]);
        let (position, _) = found(&locate(&frame, None, &settings()));

        assert!(position < 0.02, "position {}", position);
    }

    #[test]
    fn test_largest_zone_section_wins() {
        let frame = bar_frame(&[(40, 50), (120, 170)], &[60, 61, 62, 63]);
        let (_, zone) = found(&locate(&frame, None, &settings()));

        assert!((zone.low - 0.5).abs() < 1e-6);
        assert!((zone.high - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_sparse_indicator_lowers_confidence() {
        let frame = bar_frame(&[(100, 140)], &[100, 110]);
        let sample = locate(&frame, None, &settings());

        assert!(sample.confidence < 0.5, "confidence {}", sample.confidence);
        assert!(!sample.is_valid(0.5));
    }

    #[test]
    fn test_locate_is_deterministic_and_uses_hint() {
        let indicator: Vec<u32> = (115..=125).collect();
        let frame = bar_frame(&[(100, 140)], &indicator);

        let first = locate(&frame, None, &settings());
        let second = locate(&frame, Some(&first), &settings());
        assert_eq!(first.reading, second.reading);
        assert_eq!(first.bar, second.bar);
    }

    #[test]
    fn test_stale_hint_falls_back_to_full_scan() {
        let indicator: Vec<u32> = (115..=125).collect();
        let frame = bar_frame(&[(100, 140)], &indicator);
        let stale = IndicatorSample::not_found(Instant::now(), Some(BarSpan { start: 50, end: 55 }));

        let sample = locate(&frame, Some(&stale), &settings());
        assert_eq!(sample.bar, Some(BarSpan { start: 10, end: 40 }));
    }

    #[test]
    fn test_group_sections_bridges_small_gaps() {
        let lines = [1, 2, 3, 6, 7, 20, 21];
        assert_eq!(group_sections(&lines, 2), vec![(1, 7), (20, 21)]);
        assert_eq!(group_sections(&lines, 1), vec![(1, 3), (6, 7), (20, 21)]);
        assert!(group_sections(&[], 4).is_empty());
    }

    #[test]
    fn test_color_matches_with_tolerance() {
        assert!(color_matches([85, 170, 255], [85, 170, 255], 0));
        assert!(color_matches([90, 165, 250], [85, 170, 255], 8));
        assert!(!color_matches([95, 170, 255], [85, 170, 255], 8));
    }
}
