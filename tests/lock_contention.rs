mod common;

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    fs, io,
    sync::{
        mpsc::{self, Sender},
        Arc, Barrier, Mutex,
    },
    thread,
};

use common::FakeProcs;
use yande_walls::{
    bootstrap::{ensure_helper_running, HelperLauncher, HelperStatus},
    error::Error,
    lock,
    paths::Paths,
    process::{read_pid_file, ProcessControl},
};

fn paths() -> (tempfile::TempDir, Paths) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::under(dir.path().join("state"), dir.path().join("cache"));
    paths.ensure_dirs().unwrap();
    (dir, paths)
}

/// Pids shared between threads standing in for separate runs. Terminating a
/// pid asks its thread to release its lock and exit.
#[derive(Clone, Default)]
struct World {
    alive: Arc<Mutex<HashSet<u32>>>,
    stops: Arc<Mutex<HashMap<u32, Sender<()>>>>,
}

struct RunProcs {
    me: u32,
    world: World,
}

impl ProcessControl for RunProcs {
    fn current_pid(&self) -> u32 {
        self.me
    }
    fn is_alive(&self, pid: u32) -> bool {
        self.world.alive.lock().unwrap().contains(&pid)
    }
    fn terminate(&self, pid: u32) -> io::Result<()> {
        if let Some(stop) = self.world.stops.lock().unwrap().remove(&pid) {
            let _ = stop.send(());
        }
        Ok(())
    }
    fn kill(&self, pid: u32) -> io::Result<()> {
        self.terminate(pid)
    }
}

#[test]
fn newer_run_takes_the_lock_from_a_live_holder() {
    let (_dir, paths) = paths();
    let world = World::default();
    world.alive.lock().unwrap().extend([100, 200]);
    let (stop_tx, stop_rx) = mpsc::channel();
    world.stops.lock().unwrap().insert(100, stop_tx);
    let (held_tx, held_rx) = mpsc::channel();

    thread::scope(|s| {
        let paths = &paths;
        let old_world = world.clone();
        let old = s.spawn(move || {
            let procs = RunProcs { me: 100, world: old_world.clone() };
            let guard = lock::acquire(paths, &procs).unwrap();
            held_tx.send(()).unwrap();
            stop_rx.recv().unwrap();
            drop(guard);
            old_world.alive.lock().unwrap().remove(&100);
        });
        held_rx.recv().unwrap();
        assert_eq!(read_pid_file(&paths.lock_file), Some(100));

        let newer = lock::acquire(paths, &RunProcs { me: 200, world: world.clone() }).unwrap();
        assert_eq!(newer.pid(), 200);
        old.join().unwrap();
        // the old run's release did not touch the new record
        assert_eq!(read_pid_file(&paths.lock_file), Some(200));
        drop(newer);
    });
    assert!(!paths.lock_file.exists());
}

#[test]
fn simultaneous_runs_leave_exactly_one_holder() {
    for _ in 0..3 {
        let (_dir, paths) = paths();
        let world = World::default();
        world.alive.lock().unwrap().extend([100, 200]);
        let start = Barrier::new(2);

        let results: Vec<_> = thread::scope(|s| {
            let racers: Vec<_> = [100, 200]
                .into_iter()
                .map(|me| {
                    let (paths, start, world) = (&paths, &start, world.clone());
                    s.spawn(move || {
                        start.wait();
                        lock::acquire(paths, &RunProcs { me, world })
                    })
                })
                .collect();
            racers.into_iter().map(|r| r.join().unwrap()).collect()
        });

        let holders: Vec<u32> = results.iter().filter_map(|r| r.as_ref().ok()).map(|g| g.pid()).collect();
        assert_eq!(holders.len(), 1, "holders: {holders:?}");
        assert_eq!(read_pid_file(&paths.lock_file), Some(holders[0]));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::LockUnavailable)));
    }
}

#[test]
fn garbage_lock_file_is_treated_as_stale() {
    let (_dir, paths) = paths();
    fs::write(&paths.lock_file, "not a pid").unwrap();
    let guard = lock::acquire(&paths, &FakeProcs::new(300, &[])).unwrap();
    assert_eq!(guard.pid(), 300);
}

#[test]
fn acquiring_sweeps_partial_downloads() {
    let (_dir, paths) = paths();
    let partial = paths.stock_dir.join("half.jpg.part");
    let kept = paths.stock_dir.join("whole.jpg");
    fs::write(&partial, b"xx").unwrap();
    fs::write(&kept, b"xx").unwrap();

    let _guard = lock::acquire(&paths, &FakeProcs::new(1, &[])).unwrap();
    assert!(!partial.exists());
    assert!(kept.exists());
}

#[test]
fn unwritable_lock_reports_unavailable() {
    let (_dir, paths) = paths();
    // a directory squatting on the lock path cannot be renamed over
    fs::create_dir_all(paths.lock_file.join("occupied")).unwrap();
    let err = lock::acquire(&paths, &FakeProcs::new(1, &[])).unwrap_err();
    assert!(matches!(err, Error::LockUnavailable));
}

/// Hands out consecutive pids starting at `first`.
struct CountingLauncher {
    next_pid: Cell<u32>,
    launches: Cell<usize>,
    reaps: Cell<usize>,
}

impl CountingLauncher {
    fn starting_at(first: u32) -> Self {
        Self {
            next_pid: Cell::new(first),
            launches: Cell::new(0),
            reaps: Cell::new(0),
        }
    }
}

impl HelperLauncher for CountingLauncher {
    fn launch(&self) -> io::Result<u32> {
        self.launches.set(self.launches.get() + 1);
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        Ok(pid)
    }

    fn reap(&self) {
        self.reaps.set(self.reaps.get() + 1);
    }
}

#[test]
fn helper_is_started_once() {
    let (_dir, paths) = paths();
    let launcher = CountingLauncher::starting_at(4321);
    let procs = FakeProcs::new(1, &[4321]);

    let first = ensure_helper_running(&paths, &procs, &launcher).unwrap();
    let second = ensure_helper_running(&paths, &procs, &launcher).unwrap();

    assert_eq!(first, HelperStatus::Started(4321));
    assert_eq!(second, HelperStatus::AlreadyRunning(4321));
    assert_eq!(launcher.launches.get(), 1);
    assert_eq!(read_pid_file(&paths.helper_pid_file), Some(4321));
}

#[test]
fn dead_helper_is_replaced() {
    let (_dir, paths) = paths();
    fs::write(&paths.helper_pid_file, "999").unwrap();
    let launcher = CountingLauncher::starting_at(1000);
    let status = ensure_helper_running(&paths, &FakeProcs::new(1, &[1000]), &launcher).unwrap();
    assert_eq!(status, HelperStatus::Started(1000));
    assert_eq!(read_pid_file(&paths.helper_pid_file), Some(1000));
}

#[test]
fn helper_is_relaunched_after_it_dies() {
    let (_dir, paths) = paths();
    let launcher = CountingLauncher::starting_at(500);
    let procs = FakeProcs::new(1, &[500, 501]);

    assert_eq!(ensure_helper_running(&paths, &procs, &launcher).unwrap(), HelperStatus::Started(500));
    procs.alive.lock().unwrap().remove(&500);
    assert_eq!(ensure_helper_running(&paths, &procs, &launcher).unwrap(), HelperStatus::Started(501));
    assert_eq!(
        ensure_helper_running(&paths, &procs, &launcher).unwrap(),
        HelperStatus::AlreadyRunning(501)
    );

    assert_eq!(launcher.launches.get(), 2);
    assert_eq!(launcher.reaps.get(), 3);
    assert_eq!(read_pid_file(&paths.helper_pid_file), Some(501));
}
