use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        OnceLock,
    },
    thread,
    time::Duration,
};

use crate::APP_TAG;

/* =========================
   GLOBAL STATE
   ========================= */

static ENABLED: AtomicBool = AtomicBool::new(false);
static ECHO: AtomicBool = AtomicBool::new(true);
static LOG_TX: OnceLock<Sender<LogMessage>> = OnceLock::new();

enum LogMessage {
    Line(String),
    Flush(Sender<()>),
}

/* =========================
   PUBLIC API
   ========================= */

/// Starts the file sink. Lines are still echoed to stdout when the log file
/// cannot be opened.
pub fn init(debug: bool, path: PathBuf) {
    ENABLED.store(debug, Ordering::Relaxed);

    if LOG_TX.get().is_some() {
        return;
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("[{APP_TAG}] Cannot open log file {}: {e}", path.display());
            return;
        }
    };

    let (tx, rx) = mpsc::channel::<LogMessage>();
    if LOG_TX.set(tx).is_err() {
        return;
    }

    thread::spawn(move || {
        let mut file = file;
        while let Ok(msg) = rx.recv() {
            match msg {
                LogMessage::Line(line) => {
                    let _ = writeln!(file, "{line}");
                }
                LogMessage::Flush(ack) => {
                    let _ = file.flush();
                    let _ = ack.send(());
                }
            }
        }
    });
}

/// Background processes have no terminal; keep their output in the file only.
pub fn set_echo(echo: bool) {
    ECHO.store(echo, Ordering::Relaxed);
}

/// Waits briefly for the writer thread to drain queued lines.
pub fn flush() {
    let Some(tx) = LOG_TX.get() else {
        return;
    };
    let (ack_tx, ack_rx) = mpsc::channel();
    if tx.send(LogMessage::Flush(ack_tx)).is_ok() {
        let _ = ack_rx.recv_timeout(Duration::from_millis(500));
    }
}

/// Everything but `DEBUG` is always written.
#[inline]
pub fn should_log(level: &str) -> bool {
    if !ENABLED.load(Ordering::Relaxed) {
        return level != "DEBUG";
    }
    true
}

/* =========================
   INTERNAL
   ========================= */

#[inline]
pub fn enqueue(level: &str, msg: String) {
    if ECHO.load(Ordering::Relaxed) {
        println!("[{APP_TAG}] {msg}");
    }
    if let Some(tx) = LOG_TX.get() {
        let ts = timestamp();
        let _ = tx.send(LogMessage::Line(format!("{ts} [{level}] {msg}")));
    }
}

fn timestamp() -> String {
    let now = chrono::Local::now();
    now.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/* =========================
   MACROS
   ========================= */

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if $crate::logging::should_log("DEBUG") {
            $crate::logging::enqueue(
                "DEBUG",
                format!($($arg)*)
            );
        }
    }};
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if $crate::logging::should_log("INFO") {
            $crate::logging::enqueue(
                "INFO",
                format!($($arg)*)
            );
        }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        $crate::logging::enqueue(
            "WARN",
            format!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::logging::enqueue(
            "ERROR",
            format!($($arg)*)
        );
    }};
}
