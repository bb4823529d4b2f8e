//! Autofish
//!
//! Plays the fishing minigame: casts, keeps the reel indicator inside the
//! target zone, sells the catch, and reads drop notifications. Controlled
//! with global hotkeys (F1 start/pause, F2 layout, F3 stop).

mod automation;
mod capture;
mod logging;
mod ocr;
mod paths;

use anyhow::Result;
use std::thread::JoinHandle;

use automation::config::{parse_config, OcrConfig};
use automation::ocr_worker::spawn_ocr_worker;
use automation::queue::RecognizerLink;
use ocr::{Recognizer, RecognizerSettings, TesseractEngine};

fn main() -> Result<()> {
    let log_path = paths::get_log_file();
    if let Err(e) = paths::ensure_directories() {
        eprintln!("Could not create {}: {}", paths::get_logs_dir().display(), e);
    }
    logging::install_panic_hook(&log_path);

    // The log level comes from the config, so peek at it before the logger exists
    let verbose = std::fs::read_to_string(paths::get_config_path())
        .ok()
        .and_then(|contents| parse_config(&contents).ok())
        .is_some_and(|config| config.verbose_logging);
    logging::init(&log_path, verbose);
    log::info!("autofish {} starting", env!("CARGO_PKG_VERSION"));

    automation::init_config();
    let config = automation::get_config();
    if let Err(e) = config.validate() {
        log::error!("Config is invalid, sessions will refuse to start: {}", e);
    }

    run(config)
}

/// Starts the recognizer thread when OCR is enabled and Tesseract is found.
fn start_recognizer(config: &OcrConfig) -> Option<(RecognizerLink, JoinHandle<()>)> {
    if !config.enabled {
        log::info!("OCR disabled, drop notifications will not be read");
        return None;
    }

    let engine = match TesseractEngine::locate(config.tesseract_path.as_deref()) {
        Ok(engine) => engine,
        Err(e) => {
            log::warn!("{}. Continuing without drop recognition.", e);
            return None;
        }
    };

    let (link, ends) = automation::create_recognizer_queues();
    let recognizer = Recognizer::new(engine, RecognizerSettings::from(config));
    match spawn_ocr_worker(recognizer, ends) {
        Ok(handle) => Some((link, handle)),
        Err(e) => {
            log::warn!("Failed to start OCR worker: {}", e);
            None
        }
    }
}

#[cfg(not(windows))]
fn run(_config: &automation::FishingConfig) -> Result<()> {
    log::error!("Screen capture and input simulation are only available on Windows");
    Err(anyhow::anyhow!("unsupported platform"))
}

#[cfg(windows)]
fn run(config: &automation::FishingConfig) -> Result<()> {
    hotkeys::run(config)
}

#[cfg(windows)]
mod hotkeys {
    use anyhow::{anyhow, Result};
    use std::time::Instant;

    use windows::core::w;
    use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::Input::KeyboardAndMouse::{RegisterHotKey, UnregisterHotKey, MOD_NOREPEAT};
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
        KillTimer, PostQuitMessage, RegisterClassW, SetTimer, TranslateMessage, CW_USEDEFAULT,
        MSG, WINDOW_EX_STYLE, WM_DESTROY, WM_HOTKEY, WM_TIMER, WNDCLASSW, WS_OVERLAPPEDWINDOW,
    };

    use crate::automation::input::SendInputBackend;
    use crate::automation::{spawn_session, Command, ControlLoop, FishingConfig, LogNotifier, SessionHandle};
    use crate::capture::ScreenSource;

    const HOTKEY_TOGGLE_LOOP: i32 = 1;
    const HOTKEY_TOGGLE_LAYOUT: i32 = 2;
    const HOTKEY_STOP: i32 = 3;
    /// Polls for a session that stopped on its own
    const WATCH_TIMER_ID: usize = 1;
    const WATCH_INTERVAL_MS: u32 = 250;

    pub fn run(config: &FishingConfig) -> Result<()> {
        let recognizer = super::start_recognizer(&config.ocr);
        let (link, worker) = match recognizer {
            Some((link, worker)) => (Some(link), Some(worker)),
            None => (None, None),
        };

        let control = ControlLoop::new(
            config.clone(),
            ScreenSource::new(config.capture_timeout()),
            SendInputBackend,
            LogNotifier,
            link,
            Instant::now(),
        );
        let session = spawn_session(control, config.tick_period())?;

        let hwnd = create_message_window()?;
        let bindings = [
            (HOTKEY_TOGGLE_LOOP, config.hotkeys.toggle_loop, "start/pause"),
            (HOTKEY_TOGGLE_LAYOUT, config.hotkeys.toggle_layout, "toggle layout"),
            (HOTKEY_STOP, config.hotkeys.stop, "stop"),
        ];
        for (id, vk, name) in bindings {
            unsafe {
                RegisterHotKey(hwnd, id, MOD_NOREPEAT, vk)
                    .map_err(|e| anyhow!("Failed to register {} hotkey (vk {:#04x}): {}", name, vk, e))?;
            }
            log::info!("Hotkey vk {:#04x}: {}", vk, name);
        }

        unsafe {
            SetTimer(hwnd, WATCH_TIMER_ID, WATCH_INTERVAL_MS, None);
        }

        log::info!("Ready. Press the start hotkey to begin fishing.");

        let mut msg = MSG::default();
        unsafe {
            while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
                match msg.message {
                    WM_HOTKEY => on_hotkey(&session, msg.wParam.0 as i32),
                    WM_TIMER if msg.wParam.0 == WATCH_TIMER_ID => {
                        if session.is_finished() {
                            log::info!("Session ended");
                            PostQuitMessage(0);
                        }
                    }
                    _ => {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }
            }

            let _ = KillTimer(hwnd, WATCH_TIMER_ID);
            for (id, _, _) in bindings {
                let _ = UnregisterHotKey(hwnd, id);
            }
            let _ = DestroyWindow(hwnd);
        }

        session.send(Command::Stop);
        let status = session.join();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("OCR worker panicked");
            }
        }

        log::info!(
            "Final stats: {} casts, {} catches, {} drops, {} sells, {} errors",
            status.stats.casts,
            status.stats.catches,
            status.stats.drops,
            status.stats.sells,
            status.stats.errors
        );
        if let Some(error) = status.error {
            log::warn!("Session ended with error: {}", error);
        }
        Ok(())
    }

    fn on_hotkey(session: &SessionHandle, id: i32) {
        let command = match id {
            HOTKEY_TOGGLE_LOOP => match session.status().toggle {
                Some(command) => command,
                None => {
                    log::info!("Session already stopped");
                    return;
                }
            },
            HOTKEY_TOGGLE_LAYOUT => Command::ToggleLayout,
            HOTKEY_STOP => Command::Stop,
            _ => return,
        };

        log::info!("Hotkey: {:?}", command);
        if !session.send(command) {
            log::warn!("Session thread has exited, {:?} ignored", command);
        }
        if command == Command::Stop {
            unsafe { PostQuitMessage(0) };
        }
    }

    /// Hidden window that owns the hotkeys and the watch timer.
    fn create_message_window() -> Result<HWND> {
        unsafe {
            let hinstance = GetModuleHandleW(None)?;
            let class_name = w!("AutofishHotkeyClass");

            let wc = WNDCLASSW {
                lpfnWndProc: Some(window_proc),
                hInstance: hinstance.into(),
                lpszClassName: class_name,
                ..Default::default()
            };

            if RegisterClassW(&wc) == 0 {
                return Err(anyhow!("Failed to register window class"));
            }

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                class_name,
                w!("Autofish"),
                WS_OVERLAPPEDWINDOW,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                None,
                None,
                hinstance,
                None,
            )?;

            Ok(hwnd)
        }
    }

    unsafe extern "system" fn window_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        unsafe {
            match msg {
                WM_DESTROY => {
                    PostQuitMessage(0);
                    LRESULT(0)
                }
                _ => DefWindowProcW(hwnd, msg, wparam, lparam),
            }
        }
    }
}
