//! Process liveness and termination behind one small interface, plus the PID
//! file helpers the lock and the helper share.

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::warn;

const EXIT_POLLS: usize = 20;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait ProcessControl: Send + Sync {
    fn current_pid(&self) -> u32;
    fn is_alive(&self, pid: u32) -> bool;
    /// Polite stop request. Platforms without one fall back to `kill`.
    fn terminate(&self, pid: u32) -> io::Result<()>;
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// The real OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

#[cfg(unix)]
mod imp {
    use std::io;

    use nix::{
        errno::Errno,
        sys::{
            signal::{kill, Signal},
            wait::{waitpid, WaitPidFlag, WaitStatus},
        },
        unistd::Pid,
    };

    fn target(pid: u32) -> io::Result<Pid> {
        i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .map(Pid::from_raw)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("bad pid {pid}")))
    }

    fn signal(pid: u32, sig: Signal) -> io::Result<()> {
        kill(target(pid)?, sig).map_err(io::Error::from)
    }

    /// An exited child of ours lingers as a zombie that `kill(pid, 0)` still
    /// finds, so children are reaped here first.
    pub fn is_alive(pid: u32) -> bool {
        let Ok(pid) = target(pid) else {
            return false;
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => return false,
            // still running, or not our child
            Ok(_) | Err(_) => {}
        }
        match kill(pid, None) {
            Ok(()) => true,
            // exists, owned by someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub fn terminate(pid: u32) -> io::Result<()> {
        signal(pid, Signal::SIGTERM)
    }

    pub fn kill_now(pid: u32) -> io::Result<()> {
        signal(pid, Signal::SIGKILL)
    }
}

#[cfg(windows)]
mod imp {
    use std::io;

    use windows::Win32::{
        Foundation::{CloseHandle, HANDLE, STILL_ACTIVE},
        System::Threading::{
            GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
            PROCESS_TERMINATE,
        },
    };

    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    fn open(pid: u32, access: windows::Win32::System::Threading::PROCESS_ACCESS_RIGHTS) -> io::Result<OwnedHandle> {
        unsafe { OpenProcess(access, false, pid) }
            .map(OwnedHandle)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    pub fn is_alive(pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let Ok(handle) = open(pid, PROCESS_QUERY_LIMITED_INFORMATION) else {
            return false;
        };
        let mut code = 0u32;
        match unsafe { GetExitCodeProcess(handle.0, &mut code) } {
            Ok(()) => code == STILL_ACTIVE.0 as u32,
            Err(_) => false,
        }
    }

    pub fn terminate(pid: u32) -> io::Result<()> {
        kill_now(pid)
    }

    pub fn kill_now(pid: u32) -> io::Result<()> {
        let handle = open(pid, PROCESS_TERMINATE)?;
        unsafe { TerminateProcess(handle.0, 1) }.map_err(|e| io::Error::other(e.to_string()))
    }
}

impl ProcessControl for SystemProcesses {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn is_alive(&self, pid: u32) -> bool {
        imp::is_alive(pid)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        imp::terminate(pid)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        imp::kill_now(pid)
    }
}

fn wait_for_exit(procs: &dyn ProcessControl, pid: u32) -> bool {
    for _ in 0..EXIT_POLLS {
        if !procs.is_alive(pid) {
            return true;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
    !procs.is_alive(pid)
}

/// Asks `pid` to stop and escalates to a kill if it is still around after
/// roughly a second. `true` once the process is gone.
pub fn stop_process(procs: &dyn ProcessControl, pid: u32) -> bool {
    if let Err(e) = procs.terminate(pid) {
        warn!("Could not signal pid {pid}: {e}");
    }
    if wait_for_exit(procs, pid) {
        return true;
    }

    warn!("Pid {pid} ignored the stop request; killing it.");
    if let Err(e) = procs.kill(pid) {
        warn!("Could not kill pid {pid}: {e}");
    }
    let gone = wait_for_exit(procs, pid);
    if !gone {
        warn!("Pid {pid} survived a kill.");
    }
    gone
}

/// `None` for a missing, empty or garbled file.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Writes `pid` to a per-writer temp file and renames it over `path`, so
/// readers never see a half-written value.
pub fn write_pid_atomic(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path, pid);
    fs::write(&tmp, pid.to_string())?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Removes `path` only while it still names `pid`.
pub fn remove_pid_file_if_owned(path: &Path, pid: u32) -> bool {
    if read_pid_file(path) != Some(pid) {
        return false;
    }
    fs::remove_file(path).is_ok()
}

fn temp_sibling(path: &Path, pid: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{pid}.tmp"));
    PathBuf::from(name)
}
