//! Logger setup: every record goes to stderr and to the log file.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writes each formatted record to stderr and, when open, to the log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // A failing log file must never take the console output down with it
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

/// Installs the global logger.
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` when verbose
/// logging is enabled in the config.
pub fn init(log_path: &Path, verbose: bool) {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .ok();
    let file_missing = file.is_none();

    let default_level = if verbose { "debug" } else { "info" };
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] {:<5} {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    })
    .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
    .try_init();

    if let Err(e) = result {
        eprintln!("Logger already initialized: {}", e);
    }
    if file_missing {
        log::warn!("Could not open log file {}", log_path.display());
    }
}

/// Installs a panic hook that appends the panic to the log file.
pub fn install_panic_hook(log_path: &Path) {
    let log_path = log_path.to_path_buf();
    std::panic::set_hook(Box::new(move |panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        let line = format!("[PANIC]{} {}\n", location, msg);
        eprint!("{}", line);
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            let _ = file.write_all(line.as_bytes());
        }
    }));
}
