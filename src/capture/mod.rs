//! Screen capture: the frame type, the capture trait, and the platform backend.
//!
//! This module provides:
//! - Immutable frames with capture timestamps (`Frame`)
//! - Screen rectangles shared with the config (`ScreenRect`)
//! - The capture contract used by the control loop (`FrameSource`)
//! - A threaded screen-region source with a GDI grabber on Windows (`ScreenSource`)

pub mod frame;
pub mod screen;

pub use frame::{CaptureError, Frame, FrameSource, ScreenRect};
pub use screen::ScreenSource;
