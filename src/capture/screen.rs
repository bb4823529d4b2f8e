//! Screen-region capture on a dedicated thread.
//!
//! The grab runs off the control loop so that a stalled desktop (secure
//! desktop, display mode change) shows up as a `Timeout` instead of freezing
//! the loop. On Windows the grabber is a GDI `BitBlt`.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use super::frame::{CaptureError, Frame, FrameSource, ScreenRect};

struct CaptureRequest {
    id: u64,
    region: ScreenRect,
}

struct CaptureReply {
    id: u64,
    result: Result<Frame, CaptureError>,
}

/// Frame source backed by a capture thread.
pub struct ScreenSource {
    requests: Sender<CaptureRequest>,
    replies: Receiver<CaptureReply>,
    timeout: Duration,
    next_id: u64,
}

impl ScreenSource {
    /// GDI-backed source. `timeout` bounds every `capture` call.
    #[cfg(windows)]
    pub fn new(timeout: Duration) -> Self {
        Self::with_grabber(gdi::blit_region, timeout)
    }

    /// Spawns the capture thread around `grab`.
    pub fn with_grabber<G>(grab: G, timeout: Duration) -> Self
    where
        G: Fn(&ScreenRect) -> Result<Frame, CaptureError> + Send + 'static,
    {
        let (requests, request_rx) = channel::<CaptureRequest>();
        let (reply_tx, replies) = channel::<CaptureReply>();

        thread::spawn(move || {
            log::debug!("Capture thread started");
            while let Ok(request) = request_rx.recv() {
                let result = grab(&request.region);
                if reply_tx
                    .send(CaptureReply {
                        id: request.id,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            log::debug!("Capture thread finished");
        });

        Self {
            requests,
            replies,
            timeout,
            next_id: 0,
        }
    }
}

impl FrameSource for ScreenSource {
    fn capture(&mut self, region: &ScreenRect) -> Result<Frame, CaptureError> {
        if region.is_empty() {
            return Err(CaptureError::EmptyRegion(*region));
        }

        self.next_id += 1;
        let id = self.next_id;
        self.requests
            .send(CaptureRequest {
                id,
                region: *region,
            })
            .map_err(|_| CaptureError::Unavailable("capture thread exited".to_string()))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                // Late replies to requests that already timed out are stale: drop them
                Ok(reply) if reply.id != id => continue,
                Ok(reply) => return reply.result,
                Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Unavailable(
                        "capture thread exited".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(windows)]
mod gdi {
    use std::ffi::c_void;
    use std::time::Instant;

    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
        ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
    };

    use crate::capture::frame::{CaptureError, Frame, ScreenRect};

    /// Copies `region` of the primary desktop into a frame.
    pub(super) fn blit_region(region: &ScreenRect) -> Result<Frame, CaptureError> {
        let width = region.width as i32;
        let height = region.height as i32;

        unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.is_invalid() {
                return Err(CaptureError::Unavailable("GetDC failed".to_string()));
            }

            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, bitmap);

            let blit = BitBlt(
                mem_dc, 0, 0, width, height, screen_dc, region.x, region.y, SRCCOPY,
            );

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    // Negative height = top-down rows
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut buffer = vec![0u8; region.width as usize * region.height as usize * 4];
            let lines = if blit.is_ok() {
                GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    region.height,
                    Some(buffer.as_mut_ptr() as *mut c_void),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            } else {
                0
            };

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen_dc);

            if let Err(e) = blit {
                return Err(CaptureError::Unavailable(format!("BitBlt failed: {}", e)));
            }
            if lines != height {
                return Err(CaptureError::Unavailable(format!(
                    "GetDIBits copied {} of {} rows",
                    lines, height
                )));
            }

            Frame::from_bgra(region.width, region.height, &buffer, Instant::now())
                .ok_or_else(|| CaptureError::Unavailable("short pixel buffer".to_string()))
        }
    }
}
