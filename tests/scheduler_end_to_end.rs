mod common;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use common::{fixture, seed_stock, FakeProcs};
use yande_walls::{
    data_loaders::config::{CollageMode, Settings},
    helper,
    process::read_pid_file,
    scheduler::{enqueue_needed, run_task, DownloadTask, Job},
    utility::Orientation,
};

fn collage_settings(target: usize) -> Settings {
    Settings {
        collage_mode: CollageMode::StockCollage,
        stock_target: target,
        download_threads: 4,
        show_download_progress: false,
        helper_interval: Duration::from_secs(5),
        ..Settings::default()
    }
}

#[test]
fn one_pass_queues_the_whole_gap_and_workers_fill_it() {
    let fx = fixture(collage_settings(30));
    let engine = &fx.engine;
    let (queue, jobs) = crossbeam_channel::unbounded();

    assert_eq!(enqueue_needed(engine, &queue), 30);
    assert_eq!(engine.ledger.get(Orientation::Portrait), 30);
    // pending downloads count against the gap
    assert_eq!(enqueue_needed(engine, &queue), 0);

    let tasks: Vec<DownloadTask> = jobs
        .try_iter()
        .filter_map(|job| match job {
            Job::Download(task) => Some(task),
            Job::Stop => None,
        })
        .collect();
    assert_eq!(tasks.len(), 30);
    assert!(tasks.iter().all(|t| t.orientation == Orientation::Portrait));

    for task in &tasks {
        assert!(run_task(engine, task).unwrap().is_some());
    }
    assert_eq!(engine.stock(Orientation::Portrait).count(), 30);
    assert_eq!(engine.ledger.get(Orientation::Portrait), 0);
    assert!(fx.engine.stock(Orientation::Landscape).list().is_empty());
}

#[test]
fn task_is_skipped_once_stock_reached_target() {
    let fx = fixture(collage_settings(5));
    seed_stock(&fx.engine.paths.stock_dir, 5);

    let task = DownloadTask {
        orientation: Orientation::Portrait,
        label: "portrait 1".into(),
    };
    fx.engine.ledger.increment(Orientation::Portrait, 1);
    assert_eq!(run_task(&fx.engine, &task).unwrap(), None);
    assert_eq!(fx.engine.ledger.get(Orientation::Portrait), 0);
    assert_eq!(fx.fetch.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn partial_stock_only_queues_the_difference() {
    let fx = fixture(collage_settings(10));
    seed_stock(&fx.engine.paths.stock_dir, 7);
    let (queue, _jobs) = crossbeam_channel::unbounded();
    assert_eq!(enqueue_needed(&fx.engine, &queue), 3);
}

#[test]
fn helper_pool_fills_stock_and_cleans_up_its_pid_file() {
    let fx = fixture(collage_settings(12));
    let engine = fx.engine.clone();
    let pid_file = engine.paths.helper_pid_file.clone();
    let stop = Arc::new(AtomicBool::new(false));

    let runner = {
        let stop = stop.clone();
        thread::spawn(move || helper::run_until(engine, &FakeProcs::new(777, &[]), stop))
    };

    let started = Instant::now();
    while fx.engine.stock(Orientation::Portrait).count() < 12 && started.elapsed() < Duration::from_secs(20) {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(read_pid_file(&pid_file), Some(777));

    stop.store(true, Ordering::Relaxed);
    runner.join().unwrap().unwrap();

    assert_eq!(fx.engine.stock(Orientation::Portrait).count(), 12);
    assert_eq!(fx.engine.ledger.get(Orientation::Portrait), 0);
    assert!(!pid_file.exists());
}

#[test]
fn helper_defers_to_a_live_instance() {
    let fx = fixture(collage_settings(12));
    let pid_file = fx.engine.paths.helper_pid_file.clone();
    std::fs::write(&pid_file, "555").unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    helper::run_until(fx.engine.clone(), &FakeProcs::new(777, &[555]), stop).unwrap();

    assert_eq!(read_pid_file(&pid_file), Some(555));
    assert_eq!(fx.engine.stock(Orientation::Portrait).count(), 0);
}
