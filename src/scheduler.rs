//! Decides how many downloads each orientation needs and queues them.

use std::{fs, path::PathBuf};

use crossbeam_channel::Sender;

use crate::{
    data_loaders::{
        config::{CollageMode, Settings},
        state::load_saved_ratings,
    },
    deadline::Deadline,
    engine::Engine,
    error::{Error, Result},
    info,
    utility::Orientation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub orientation: Orientation,
    pub label: String,
}

/// Work for a helper worker. `Stop` unblocks one worker at shutdown.
#[derive(Debug)]
pub enum Job {
    Download(DownloadTask),
    Stop,
}

/// Stock level the active mode keeps for an orientation; 0 when unused.
pub fn target_for(settings: &Settings, orientation: Orientation) -> usize {
    match (settings.collage_mode, orientation) {
        (CollageMode::Alternating, Orientation::Portrait) => settings.mode2_targets().0,
        (CollageMode::Alternating, Orientation::Landscape) => settings.mode2_targets().1,
        (CollageMode::StockCollage, Orientation::Portrait) => settings.stock_target,
        (CollageMode::LandscapeOnly, Orientation::Landscape) => settings.stock_target,
        _ => 0,
    }
}

pub fn relevant_orientations(mode: CollageMode) -> &'static [Orientation] {
    match mode {
        CollageMode::LandscapeOnly => &[Orientation::Landscape],
        CollageMode::StockCollage => &[Orientation::Portrait],
        CollageMode::Alternating => &Orientation::ALL,
    }
}

/// `target - on_disk - pending`, floored at zero.
pub fn needed(engine: &Engine, orientation: Orientation) -> usize {
    let target = target_for(&engine.settings, orientation);
    if target == 0 {
        return 0;
    }
    let on_disk = engine.stock(orientation).count();
    let pending = engine.ledger.get(orientation);
    target.saturating_sub(on_disk + pending)
}

/// Queues the gap for one orientation. The ledger is bumped before any task
/// is sent so an overlapping pass cannot count the same gap twice.
pub fn enqueue_for_orientation(engine: &Engine, orientation: Orientation, queue: &Sender<Job>) -> usize {
    let count = needed(engine, orientation);
    if count == 0 {
        return 0;
    }

    let tasks: Vec<DownloadTask> = (0..count)
        .map(|_| DownloadTask {
            orientation,
            label: engine.ledger.next_label(orientation),
        })
        .collect();
    engine.ledger.increment(orientation, tasks.len());

    let mut sent = 0;
    for task in tasks {
        if queue.send(Job::Download(task)).is_err() {
            break;
        }
        sent += 1;
    }
    if sent < count {
        engine.ledger.decrement(orientation, count - sent);
    }

    info!("Download helper: queued {sent} downloads for {orientation}.");
    sent
}

/// One scheduler pass over every orientation the mode uses.
pub fn enqueue_needed(engine: &Engine, queue: &Sender<Job>) -> usize {
    relevant_orientations(engine.settings.collage_mode)
        .iter()
        .map(|&o| enqueue_for_orientation(engine, o, queue))
        .sum()
}

/// `true` once a foreground run has saved a rating selection other than the
/// one this engine was configured with.
pub fn selection_is_stale(engine: &Engine) -> bool {
    let saved = load_saved_ratings(&engine.paths.ratings_file);
    !saved.is_empty() && saved != engine.settings.rating_keys()
}

/// Executes one queued download. The task's ledger slot is released on every
/// path out, including errors and panics.
pub fn run_task(engine: &Engine, task: &DownloadTask) -> Result<Option<PathBuf>> {
    let _slot = engine.ledger.adopt(task.orientation, 1);
    let orientation = task.orientation;
    if selection_is_stale(engine) {
        info!("Download helper: rating selection changed, dropping {}.", task.label);
        return Ok(None);
    }

    let target = target_for(&engine.settings, orientation);
    let stock = engine.stock(orientation);
    let current = stock.count();
    if current >= target {
        info!(
            "Download helper: {orientation} stock already at target ({current}/{target}), skipping {}.",
            task.label
        );
        return Ok(None);
    }

    let deadline = Deadline::after(engine.settings.run_timeout);
    let Some(record) = engine.pick(1, orientation, &deadline).into_iter().next() else {
        return Err(Error::NoCandidates);
    };
    let path = engine.fetch_into(&record, stock.path(), &deadline, &task.label)?;
    if selection_is_stale(engine) {
        // the pools were cleared while this was in flight
        let _ = fs::remove_file(&path);
        info!("Download helper: rating selection changed, discarded {}.", task.label);
        return Ok(None);
    }
    Ok(Some(path))
}

/// Synchronous foreground refill of up to `count` images. Returns how many
/// landed in stock. A no-op when direct downloads are off.
pub fn refill_now(engine: &Engine, orientation: Orientation, count: usize, deadline: &Deadline) -> usize {
    if !engine.downloads_allowed() || count == 0 || deadline.is_expired() {
        return 0;
    }

    let picked = engine.pick(count, orientation, deadline);
    if picked.is_empty() {
        info!("No {orientation} images found.");
        return 0;
    }

    let _reserved = engine.ledger.reserve(orientation, picked.len());
    let added = engine.download_batch(&picked, orientation, deadline).len();
    if added > 0 {
        info!("Added {added} {orientation} images to stock.");
    }
    added
}

/// Brings one orientation back up to its target, if downloads are allowed.
pub fn top_up(engine: &Engine, orientation: Orientation, deadline: &Deadline) -> usize {
    let count = needed(engine, orientation);
    if count > 0 && engine.downloads_allowed() {
        info!(
            "Stock: {}/{} {orientation}, downloading {count} more.",
            engine.stock(orientation).count(),
            target_for(&engine.settings, orientation)
        );
    }
    refill_now(engine, orientation, count, deadline)
}
