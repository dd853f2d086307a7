//! Single-instance lock for foreground runs.
//!
//! Ownership is an exclusive OS lock on `run.lock.guard`, held for the life
//! of the guard; `run.lock` records the owner's PID so a newer run knows whom
//! to stop. A newer run wins: a live holder is asked to stop, then killed.
//! The OS drops the lock with the process, so a crashed run never blocks.

use std::{
    fs::{File, OpenOptions},
    io, thread,
    time::Duration,
};

use fs2::FileExt;

use crate::{
    error::{Error, Result},
    info,
    paths::Paths,
    process::{read_pid_file, remove_pid_file_if_owned, stop_process, write_pid_atomic, ProcessControl},
    stock::cleanup_partial_files,
    warn,
};

const ACQUIRE_ATTEMPTS: usize = 3;
/// Pause when the OS lock is taken but no live PID is recorded yet.
const HANDOVER_PAUSE: Duration = Duration::from_millis(100);

/// Held lock. Dropping it releases the PID record if it still names us, then
/// the OS lock.
#[must_use]
#[derive(Debug)]
pub struct RunLockGuard<'a> {
    paths: &'a Paths,
    pid: u32,
    _os_lock: File,
}

impl RunLockGuard<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        remove_pid_file_if_owned(&self.paths.lock_file, self.pid);
    }
}

fn open_guard_file(paths: &Paths) -> io::Result<File> {
    if let Some(parent) = paths.lock_guard_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.lock_guard_file)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

pub fn acquire<'a>(paths: &'a Paths, procs: &dyn ProcessControl) -> Result<RunLockGuard<'a>> {
    let me = procs.current_pid();
    let os_lock = open_guard_file(paths).map_err(|e| {
        warn!("Cannot open {}: {e}", paths.lock_guard_file.display());
        Error::LockUnavailable
    })?;
    let mut locked = false;

    for attempt in 1..=ACQUIRE_ATTEMPTS {
        if !locked {
            match os_lock.try_lock_exclusive() {
                Ok(()) => locked = true,
                Err(e) if is_contended(&e) => {
                    match read_pid_file(&paths.lock_file) {
                        Some(holder) if holder != me && procs.is_alive(holder) => {
                            info!("Another run (pid {holder}) is active; asking it to stop.");
                            if !stop_process(procs, holder) {
                                warn!("Pid {holder} still holds the run lock.");
                                return Err(Error::LockUnavailable);
                            }
                        }
                        // the holder is between locking and recording its pid
                        _ => thread::sleep(HANDOVER_PAUSE),
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Cannot lock {}: {e}", paths.lock_guard_file.display());
                    return Err(Error::LockUnavailable);
                }
            }
        }

        if let Err(e) = write_pid_atomic(&paths.lock_file, me) {
            warn!("Lock write failed (attempt {attempt}/{ACQUIRE_ATTEMPTS}): {e}");
            continue;
        }

        match read_pid_file(&paths.lock_file) {
            Some(pid) if pid == me => {
                let removed = cleanup_partial_files(&paths.partial_download_dirs());
                if removed > 0 {
                    info!("Removed {removed} partial downloads left by an earlier run.");
                }
                return Ok(RunLockGuard {
                    paths,
                    pid: me,
                    _os_lock: os_lock,
                });
            }
            other => {
                warn!(
                    "Lock record reads {} (attempt {attempt}/{ACQUIRE_ATTEMPTS})",
                    other.map_or_else(|| "nothing".to_string(), |p| format!("pid {p}"))
                );
            }
        }
    }

    Err(Error::LockUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, fs, sync::Mutex};

    #[derive(Clone, Copy, PartialEq)]
    enum Holder {
        Obeys,
        IgnoresTerm,
        Unkillable,
    }

    /// Fake OS with one foreign run holding the OS lock through `held`.
    /// Stopping that run drops its handle, releasing the lock.
    struct FakeProcs {
        me: u32,
        alive: Mutex<HashSet<u32>>,
        held: Mutex<Option<File>>,
        holder: Holder,
        signals: Mutex<Vec<(&'static str, u32)>>,
    }

    impl FakeProcs {
        fn new(me: u32, alive: &[u32], holder: Holder) -> Self {
            Self {
                me,
                alive: Mutex::new(alive.iter().copied().collect()),
                held: Mutex::new(None),
                holder,
                signals: Mutex::new(Vec::new()),
            }
        }

        /// Pretends `pid` is a live run that owns the lock.
        fn hold(&self, paths: &Paths, pid: u32) {
            let file = open_guard_file(paths).unwrap();
            file.try_lock_exclusive().unwrap();
            *self.held.lock().unwrap() = Some(file);
            self.alive.lock().unwrap().insert(pid);
            fs::write(&paths.lock_file, pid.to_string()).unwrap();
        }

        fn exit(&self, pid: u32) {
            self.held.lock().unwrap().take();
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessControl for FakeProcs {
        fn current_pid(&self) -> u32 {
            self.me
        }
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
        fn terminate(&self, pid: u32) -> io::Result<()> {
            self.signals.lock().unwrap().push(("term", pid));
            if self.holder == Holder::Obeys {
                self.exit(pid);
            }
            Ok(())
        }
        fn kill(&self, pid: u32) -> io::Result<()> {
            self.signals.lock().unwrap().push(("kill", pid));
            if self.holder == Holder::Unkillable {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.exit(pid);
            Ok(())
        }
    }

    fn paths() -> (tempfile::TempDir, Paths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::under(dir.path().join("state"), dir.path().join("cache"));
        paths.ensure_dirs().unwrap();
        (dir, paths)
    }

    #[test]
    fn stale_record_is_taken_without_signals() {
        let (_dir, paths) = paths();
        fs::write(&paths.lock_file, "999").unwrap();
        let procs = FakeProcs::new(10, &[10], Holder::Obeys);
        let guard = acquire(&paths, &procs).unwrap();
        assert_eq!(guard.pid(), 10);
        assert_eq!(read_pid_file(&paths.lock_file), Some(10));
        assert!(procs.signals.lock().unwrap().is_empty());
        drop(guard);
        assert!(!paths.lock_file.exists());
    }

    #[test]
    fn recycled_pid_without_the_lock_is_left_alone() {
        let (_dir, paths) = paths();
        fs::write(&paths.lock_file, "20").unwrap();
        let procs = FakeProcs::new(10, &[10, 20], Holder::Obeys);
        let _guard = acquire(&paths, &procs).unwrap();
        assert!(procs.signals.lock().unwrap().is_empty());
        assert!(procs.is_alive(20));
    }

    #[test]
    fn live_holder_is_terminated_first() {
        let (_dir, paths) = paths();
        let procs = FakeProcs::new(10, &[10], Holder::Obeys);
        procs.hold(&paths, 20);
        let guard = acquire(&paths, &procs).unwrap();
        assert_eq!(guard.pid(), 10);
        assert_eq!(*procs.signals.lock().unwrap(), vec![("term", 20)]);
    }

    #[test]
    fn stubborn_holder_is_killed() {
        let (_dir, paths) = paths();
        let procs = FakeProcs::new(10, &[10], Holder::IgnoresTerm);
        procs.hold(&paths, 20);
        let _guard = acquire(&paths, &procs).unwrap();
        assert_eq!(
            *procs.signals.lock().unwrap(),
            vec![("term", 20), ("kill", 20)]
        );
    }

    #[test]
    fn unkillable_holder_keeps_the_lock() {
        let (_dir, paths) = paths();
        let procs = FakeProcs::new(10, &[10], Holder::Unkillable);
        procs.hold(&paths, 20);
        let err = acquire(&paths, &procs).unwrap_err();
        assert!(matches!(err, Error::LockUnavailable));
        assert_eq!(read_pid_file(&paths.lock_file), Some(20));
    }

    #[test]
    fn partial_downloads_are_cleaned_once_held() {
        let (_dir, paths) = paths();
        let part = paths.stock_dir.join("wallpaper-1-1234.jpg.part");
        fs::write(&part, b"half").unwrap();
        let procs = FakeProcs::new(10, &[10], Holder::Obeys);
        let _guard = acquire(&paths, &procs).unwrap();
        assert!(!part.exists());
    }

    #[test]
    fn release_leaves_a_newer_record_alone() {
        let (_dir, paths) = paths();
        let procs = FakeProcs::new(10, &[10], Holder::Obeys);
        let guard = acquire(&paths, &procs).unwrap();
        fs::write(&paths.lock_file, "77").unwrap();
        drop(guard);
        assert_eq!(read_pid_file(&paths.lock_file), Some(77));
    }

    #[test]
    fn lock_is_free_again_after_release() {
        let (_dir, paths) = paths();
        let procs = FakeProcs::new(10, &[10], Holder::Obeys);
        drop(acquire(&paths, &procs).unwrap());
        let again = acquire(&paths, &procs).unwrap();
        assert_eq!(again.pid(), 10);
    }
}
