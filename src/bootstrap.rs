// Makes sure the background download helper is up before a foreground run.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::Mutex,
};

use crate::{
    info,
    paths::Paths,
    process::{read_pid_file, remove_pid_file_if_owned, stop_process, write_pid_atomic, ProcessControl},
    warn,
};

/// Subcommand the helper process is launched with.
pub const HELPER_SUBCOMMAND: &str = "helper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperStatus {
    AlreadyRunning(u32),
    Started(u32),
}

/// Starts a detached helper process and returns its pid.
pub trait HelperLauncher {
    fn launch(&self) -> io::Result<u32>;

    /// Collects helpers this launcher started that have since exited.
    fn reap(&self) {}
}

/// Relaunches the current executable with the `helper` subcommand, detached
/// from the terminal and with its output discarded. Children are kept so a
/// long-lived parent can reap them.
#[derive(Debug, Default)]
pub struct ExeLauncher {
    command: Option<(PathBuf, Vec<OsString>)>,
    children: Mutex<Vec<Child>>,
}

impl ExeLauncher {
    /// Launches `program args...` instead of this executable.
    pub fn with_command(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            command: Some((program.into(), args.into_iter().map(Into::into).collect())),
            children: Mutex::default(),
        }
    }
}

impl HelperLauncher for ExeLauncher {
    fn launch(&self) -> io::Result<u32> {
        let mut cmd = match &self.command {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            None => {
                let mut cmd = Command::new(std::env::current_exe()?);
                cmd.arg(HELPER_SUBCOMMAND);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);
        let child = cmd.spawn()?;
        let pid = child.id();
        if let Ok(mut children) = self.children.lock() {
            children.push(child);
        }
        Ok(pid)
    }

    fn reap(&self) {
        let Ok(mut children) = self.children.lock() else {
            return;
        };
        children.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!("Download helper (pid {}) exited: {status}", child.id());
                false
            }
            // already collected elsewhere
            Err(_) => false,
        });
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// Pid of a live helper, if the pid file names one.
pub fn helper_pid(pid_file: &Path, procs: &dyn ProcessControl) -> Option<u32> {
    read_pid_file(pid_file).filter(|pid| procs.is_alive(*pid))
}

/// Idempotent: a live helper is left alone. A fresh helper's pid is recorded
/// right away so a second call cannot race the child's own registration.
pub fn ensure_helper_running(
    paths: &Paths,
    procs: &dyn ProcessControl,
    launcher: &dyn HelperLauncher,
) -> io::Result<HelperStatus> {
    launcher.reap();
    if let Some(pid) = helper_pid(&paths.helper_pid_file, procs) {
        info!("Download helper already running (pid {pid}).");
        return Ok(HelperStatus::AlreadyRunning(pid));
    }

    let pid = launcher.launch().map_err(|e| {
        warn!("Failed to start download helper: {e}");
        e
    })?;
    write_pid_atomic(&paths.helper_pid_file, pid)?;
    info!("Started download helper in background (pid {pid}).");
    Ok(HelperStatus::Started(pid))
}

/// Stops a live helper so nothing it fetched under an old configuration lands
/// afterwards. `true` when no helper is left running.
pub fn stop_helper(paths: &Paths, procs: &dyn ProcessControl) -> bool {
    let Some(pid) = helper_pid(&paths.helper_pid_file, procs) else {
        return true;
    };
    if pid == procs.current_pid() {
        return false;
    }
    info!("Stopping download helper (pid {pid}).");
    let stopped = stop_process(procs, pid);
    if stopped {
        remove_pid_file_if_owned(&paths.helper_pid_file, pid);
    }
    stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SystemProcesses;
    use std::{thread, time::Duration};

    #[cfg(unix)]
    #[test]
    fn exited_helpers_are_reaped() {
        let launcher = ExeLauncher::with_command("true", Vec::<OsString>::new());
        let pid = launcher.launch().unwrap();
        assert_eq!(launcher.children.lock().unwrap().len(), 1);

        for _ in 0..100 {
            launcher.reap();
            if launcher.children.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(launcher.children.lock().unwrap().is_empty());
        assert!(!SystemProcesses.is_alive(pid));
    }

    #[test]
    fn own_pid_is_never_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::under(dir.path().join("state"), dir.path().join("cache"));
        paths.ensure_dirs().unwrap();
        let me = SystemProcesses.current_pid();
        write_pid_atomic(&paths.helper_pid_file, me).unwrap();

        assert!(!stop_helper(&paths, &SystemProcesses));
        assert_eq!(read_pid_file(&paths.helper_pid_file), Some(me));
    }
}
