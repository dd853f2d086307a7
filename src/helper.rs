//! The long-lived download helper: a worker pool fed by periodic scheduler passes.

use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::{
    deadline::Deadline,
    engine::Engine,
    error::Result,
    info,
    process::{read_pid_file, remove_pid_file_if_owned, write_pid_atomic, ProcessControl},
    scheduler::{enqueue_needed, run_task, selection_is_stale, Job},
    warn,
};

const QUEUE_POLL: Duration = Duration::from_millis(500);
const STOP_POLL: Duration = Duration::from_millis(250);
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// Keeps the helper pid file for as long as this process runs.
struct PidFileGuard<'a> {
    path: &'a Path,
    pid: u32,
}

impl Drop for PidFileGuard<'_> {
    fn drop(&mut self) {
        remove_pid_file_if_owned(self.path, self.pid);
    }
}

fn worker_loop(engine: Engine, jobs: Receiver<Job>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let task = match jobs.recv_timeout(QUEUE_POLL) {
            Ok(Job::Download(task)) => task,
            Ok(Job::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| run_task(&engine, &task))) {
            Ok(Ok(Some(path))) => info!("Download helper: {} saved to {}", task.label, path.display()),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Download helper task {} failed: {e}", task.label),
            Err(_) => warn!("Download helper task {} panicked", task.label),
        }
    }
}

/// Sleeps up to `total`, waking early once `stop` is set or `wake` fires.
fn idle(total: Duration, stop: &AtomicBool, wake: impl Fn() -> bool) {
    let deadline = Deadline::after(total);
    while !stop.load(Ordering::Relaxed) && !deadline.is_expired() && !wake() {
        deadline.sleep_at_most(STOP_POLL);
    }
}

fn shut_down(workers: Vec<JoinHandle<()>>, queue: &crossbeam_channel::Sender<Job>) {
    for _ in &workers {
        // fails only once every worker is gone, which is the goal anyway
        let _ = queue.send(Job::Stop);
    }
    for worker in workers {
        let grace = Deadline::after(JOIN_GRACE);
        while !worker.is_finished() && !grace.is_expired() {
            grace.sleep_at_most(Duration::from_millis(20));
        }
        if worker.is_finished() && worker.join().is_err() {
            warn!("Download worker exited with a panic");
        }
    }
}

/// Runs the pool until `stop` is set or a foreground run saves a different
/// rating selection. Returns early when another live helper already owns the
/// pid file.
pub fn run_until(engine: Engine, procs: &dyn ProcessControl, stop: Arc<AtomicBool>) -> Result<()> {
    let me = procs.current_pid();
    let pid_file = engine.paths.helper_pid_file.clone();
    if let Some(other) = read_pid_file(&pid_file) {
        if other != me && procs.is_alive(other) {
            info!("Download helper already running (pid {other}); exiting.");
            return Ok(());
        }
    }
    write_pid_atomic(&pid_file, me)?;
    let _pid_guard = PidFileGuard { path: &pid_file, pid: me };

    let (queue, jobs) = unbounded::<Job>();
    let threads = engine.settings.download_threads.max(1);
    let mut workers = Vec::with_capacity(threads);
    for i in 0..threads {
        let (engine, jobs, stop) = (engine.clone(), jobs.clone(), stop.clone());
        let spawned = thread::Builder::new()
            .name(format!("download-worker-{}", i + 1))
            .spawn(move || worker_loop(engine, jobs, stop));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => warn!("Could not start download worker {}: {e}", i + 1),
        }
    }
    info!("Download helper is running with {} workers.", workers.len());

    while !stop.load(Ordering::Relaxed) {
        if selection_is_stale(&engine) {
            info!("Rating selection changed; download helper exiting so a fresh one can start.");
            break;
        }
        let pause = if enqueue_needed(&engine, &queue) == 0 {
            engine.settings.helper_interval
        } else {
            STOP_POLL
        };
        idle(pause, &stop, || selection_is_stale(&engine));
    }

    info!("Download helper stopping.");
    shut_down(workers, &queue);
    Ok(())
}

/// Entry point for the `helper` subcommand. Ctrl-C and SIGTERM stop it cleanly.
pub fn run(engine: Engine, procs: &dyn ProcessControl) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        warn!("Could not install stop handler: {e}");
    }
    run_until(engine, procs, stop)
}
