//! Countdown displays: the per-run deadline on stderr and the time to the
//! next slideshow change in a file that status bars can read.

use std::{
    fs,
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{deadline::Deadline, APP_TAG};

const TICK: Duration = Duration::from_secs(1);
const STOP_POLL: Duration = Duration::from_millis(100);

/// `MM:SS`; minutes are not wrapped into hours.
pub fn format_timer(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Best-effort: a status bar file that cannot be written is not worth failing a run for.
pub fn write_countdown(path: &Path, seconds: u64) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = fs::write(path, format_timer(seconds));
}

/// Background ticker thread, stopped and joined on drop.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(body: impl FnOnce(&AtomicBool) + Send + 'static) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("countdown".into())
            .spawn(move || body(&flag))
            .ok();
        Self { stop, handle }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Waits one tick; `false` once asked to stop.
fn tick(stop: &AtomicBool) -> bool {
    let until = Deadline::after(TICK);
    while !until.is_expired() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        until.sleep_at_most(STOP_POLL);
    }
    !stop.load(Ordering::Relaxed)
}

/// Rewrites `Time left: NNs` on stderr until the run deadline or drop.
/// Does nothing without a terminal.
pub fn start_run_countdown(deadline: Deadline) -> Option<Ticker> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    Some(Ticker::spawn(move |stop| {
        let mut err = std::io::stderr();
        while tick(stop) {
            let left = deadline.seconds_left();
            let _ = write!(err, "\r[{APP_TAG}] Time left: {left:02}s ");
            let _ = err.flush();
            if left == 0 {
                break;
            }
        }
        let _ = writeln!(err);
    }))
}

/// Counts `interval` down into `path` once per second, ending at `00:00`.
pub fn start_slideshow_countdown(path: PathBuf, interval: Duration) -> Option<Ticker> {
    if interval.is_zero() {
        return None;
    }
    Some(Ticker::spawn(move |stop| {
        let until = Deadline::after(interval);
        write_countdown(&path, interval.as_secs());
        while tick(stop) {
            let left = until.seconds_left();
            write_countdown(&path, left);
            if left == 0 {
                break;
            }
        }
        write_countdown(&path, 0);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_formatting() {
        assert_eq!(format_timer(0), "00:00");
        assert_eq!(format_timer(59), "00:59");
        assert_eq!(format_timer(61), "01:01");
        assert_eq!(format_timer(3600), "60:00");
    }

    #[test]
    fn slideshow_countdown_resets_file_when_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bar").join("next");
        let ticker = start_slideshow_countdown(path.clone(), Duration::from_secs(120)).unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(ticker);
        assert_eq!(fs::read_to_string(&path).unwrap(), "00:00");
    }

    #[test]
    fn zero_interval_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(start_slideshow_countdown(dir.path().join("x"), Duration::ZERO).is_none());
    }
}
