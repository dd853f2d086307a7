//! Picks what to show for one run: a stock image, a collage of stock
//! portraits, or a freshly downloaded image, depending on the collage mode.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use rand::seq::SliceRandom;

use crate::{
    bootstrap::stop_helper,
    collage::{choose_collage_count, compose_collage},
    data_loaders::{
        config::CollageMode,
        state::{
            load_saved_ratings, record_current_wallpaper, save_selected_ratings, Mode2Log,
            RunCounter, ServedKind,
        },
    },
    deadline::Deadline,
    engine::Engine,
    error::{Error, Result},
    info,
    process::ProcessControl,
    scheduler::{needed, refill_now, relevant_orientations, target_for, top_up},
    stock::StockDir,
    utility::{random_wallpaper_name, Orientation},
    wallpaper_engine::WallpaperSetter,
    warn,
};

/// Synchronous refills are skipped with less than this left on the clock.
const MIN_REFILL_WINDOW: Duration = Duration::from_secs(10);
const COLLAGE_ATTEMPTS: usize = 10;
/// Stock collages need at least this many tiles; alternating mode uses exactly this many.
const COLLAGE_TILES: usize = 3;

pub struct Selector<'a> {
    engine: &'a Engine,
    setter: &'a dyn WallpaperSetter,
    deadline: &'a Deadline,
    counter: RunCounter,
    helper_procs: Option<&'a dyn ProcessControl>,
}

impl<'a> Selector<'a> {
    pub fn new(engine: &'a Engine, setter: &'a dyn WallpaperSetter, deadline: &'a Deadline) -> Self {
        Self {
            engine,
            setter,
            deadline,
            counter: RunCounter::new(&engine.paths.counter_file),
            helper_procs: None,
        }
    }

    /// A rating change also stops the running download helper through `procs`.
    pub fn stopping_helper(mut self, procs: &'a dyn ProcessControl) -> Self {
        self.helper_procs = Some(procs);
        self
    }

    /// One foreground pass: settle the rating selection, then serve per mode.
    pub fn run(&self) -> Result<PathBuf> {
        self.sync_ratings();
        self.serve()
    }

    /// Serves one wallpaper per the collage mode.
    pub fn serve(&self) -> Result<PathBuf> {
        let settings = &self.engine.settings;
        info!(
            "Active ratings: {:?} | Collage mode: {}",
            settings.rating_keys(),
            settings.collage_mode.describe()
        );

        match settings.collage_mode {
            CollageMode::LandscapeOnly => self.serve_landscape_only(),
            CollageMode::StockCollage => self.serve_stock_collage(),
            CollageMode::Alternating => self.serve_alternating(),
        }
    }

    /// Clears every stock pool when the rating selection differs from the
    /// last run's. The new selection is saved first, so a helper still
    /// running on the old one discards its work, and that helper is stopped
    /// before the pools are emptied.
    pub fn sync_ratings(&self) -> bool {
        let paths = &self.engine.paths;
        let current = self.engine.settings.rating_keys();
        let previous = load_saved_ratings(&paths.ratings_file);
        if previous == current {
            return false;
        }

        info!("Rating selection changed: {previous:?} -> {current:?}; clearing stock and refilling.");
        if let Err(e) = save_selected_ratings(&paths.ratings_file, &current) {
            warn!("Could not save rating selection: {e}");
        }
        if let Some(procs) = self.helper_procs {
            if !stop_helper(paths, procs) {
                warn!("Download helper did not stop; it will drop its remaining work on its own.");
            }
        }
        for orientation in Orientation::ALL {
            let removed = self.engine.stock(orientation).clear();
            if removed > 0 {
                info!("Removed {removed} {orientation} stock images.");
            }
        }
        self.refill_for_mode();
        true
    }

    fn refill_for_mode(&self) {
        for &orientation in relevant_orientations(self.engine.settings.collage_mode) {
            let portrait_in_alternating = self.engine.settings.collage_mode == CollageMode::Alternating
                && orientation == Orientation::Portrait;
            if portrait_in_alternating && self.deadline.remaining() <= MIN_REFILL_WINDOW {
                continue;
            }
            top_up(self.engine, orientation, self.deadline);
        }
    }

    fn has_refill_window(&self) -> bool {
        self.deadline.remaining() > MIN_REFILL_WINDOW
    }

    fn finish(&self, applied: PathBuf) -> Result<PathBuf> {
        if let Err(e) = record_current_wallpaper(&self.engine.paths.current_wallpaper_file, &applied) {
            warn!("Could not record current wallpaper: {e}");
        }
        info!("Wallpaper set successfully");
        Ok(applied)
    }

    /// Archives a copy of `chosen`, applies it, then removes `chosen` from stock.
    fn apply_stock_file(&self, stock: &StockDir, chosen: &Path) -> Result<PathBuf> {
        let used_dir = &self.engine.paths.used_dir;
        let archived = self.counter.archive_copy(chosen, used_dir)?;
        if let Err(e) = self.setter.apply(&archived) {
            // stock keeps the original; the copy is dead weight
            let _ = fs::remove_file(&archived);
            return Err(e);
        }
        if let Err(e) = stock.remove_consumed(chosen) {
            warn!("Consumed stock file kept: {e}");
        }
        self.finish(archived)
    }

    fn apply_random_stock(&self, orientation: Orientation) -> Result<PathBuf> {
        let stock = self.engine.stock(orientation);
        let files = stock.list();
        let chosen = files
            .choose(&mut rand::thread_rng())
            .ok_or(Error::NoCandidates)?;
        self.apply_stock_file(&stock, chosen)
    }

    /// Composes `parts` into a numbered collage and applies it. The stock
    /// files are deleted only after the desktop accepted the result.
    fn apply_collage(&self, parts: &[PathBuf], prefix: &str) -> Result<PathBuf> {
        let settings = &self.engine.settings;
        let used_dir = &self.engine.paths.used_dir;
        let target = used_dir.join(random_wallpaper_name(prefix, "jpg"));
        let composed = compose_collage(parts, settings.target_width, settings.target_height, &target)?;
        let numbered = self.counter.archive(&composed, used_dir)?;
        if let Err(e) = self.setter.apply(&numbered) {
            let _ = fs::remove_file(&numbered);
            return Err(e);
        }

        let stock = self.engine.stock(Orientation::Portrait);
        for part in parts {
            if let Err(e) = stock.remove_consumed(part) {
                warn!("Consumed stock file kept: {e}");
            }
        }
        self.finish(numbered)
    }

    fn serve_landscape_only(&self) -> Result<PathBuf> {
        let orientation = Orientation::Landscape;
        let stock = self.engine.stock(orientation);
        let quarter = target_for(&self.engine.settings, orientation) / 4;

        if stock.count() == 0 && self.has_refill_window() {
            info!("Mode 0: Refilling landscape stock...");
            refill_now(self.engine, orientation, quarter.max(3), self.deadline);
        }
        if stock.count() == 0 {
            info!("No landscape stock available and could not download.");
            return Err(Error::NoCandidates);
        }

        let applied = self.apply_random_stock(orientation).inspect_err(|e| {
            info!("Failed to set landscape wallpaper: {e}");
        })?;
        info!("Mode 0: Landscape wallpaper set");

        let top_up_count = needed(self.engine, orientation).min(quarter.max(1));
        refill_now(self.engine, orientation, top_up_count, self.deadline);
        Ok(applied)
    }

    fn serve_stock_collage(&self) -> Result<PathBuf> {
        let settings = &self.engine.settings;
        let stock = self.engine.stock(Orientation::Portrait);
        let tile_count = |n: usize| choose_collage_count(n, settings.target_width, settings.min_tile_width);

        for attempt in 1..=COLLAGE_ATTEMPTS {
            let mut files = stock.list();
            let mut desired = tile_count(files.len());
            if desired < COLLAGE_TILES {
                info!("Not enough stock images ({}), downloading more...", files.len());
                top_up(self.engine, Orientation::Portrait, self.deadline);
                files = stock.list();
                desired = tile_count(files.len());
                if desired < COLLAGE_TILES {
                    info!("Still not enough stock ({}), will use single image instead.", files.len());
                    break;
                }
            }

            let parts: Vec<PathBuf> = files
                .choose_multiple(&mut rand::thread_rng(), desired)
                .cloned()
                .collect();
            info!(
                "Building collage from stock: {desired} images (available: {}), attempt {attempt}/{COLLAGE_ATTEMPTS}.",
                files.len()
            );
            match self.apply_collage(&parts, "wallpaper-collage") {
                Ok(applied) => {
                    top_up(self.engine, Orientation::Portrait, self.deadline);
                    return Ok(applied);
                }
                Err(e) => warn!("Collage attempt failed, trying different images: {e}"),
            }
        }

        self.serve_fresh_single()
    }

    /// Last resort for the collage mode: download one landscape straight into
    /// the archive.
    fn serve_fresh_single(&self) -> Result<PathBuf> {
        if !self.engine.downloads_allowed() {
            info!("Downloads disabled; helper should refill stock before running.");
            return Err(Error::NoCandidates);
        }
        let Some(record) = self.engine.pick(1, Orientation::Landscape, self.deadline).into_iter().next() else {
            info!("Could not find a suitable image from configured sources.");
            return Err(Error::NoCandidates);
        };
        info!("Source: {} ({})", record.source_name, record.rating_tag);
        info!("Downloading: {}", record.file_url);

        let used_dir = &self.engine.paths.used_dir;
        let file = self.engine.fetch_into(&record, used_dir, self.deadline, "image 1")?;
        let numbered = self.counter.archive(&file, used_dir)?;
        if let Err(e) = self.setter.apply(&numbered) {
            info!("Could not set wallpaper automatically (unsupported desktop environment).");
            info!("Image downloaded to: {}", numbered.display());
            return Err(e);
        }
        let applied = self.finish(numbered)?;
        top_up(self.engine, Orientation::Portrait, self.deadline);
        Ok(applied)
    }

    fn refill_alternating(&self) {
        if self.has_refill_window() {
            top_up(self.engine, Orientation::Portrait, self.deadline);
        }
        top_up(self.engine, Orientation::Landscape, self.deadline);
    }

    fn log_served(&self, kind: ServedKind) {
        if let Err(e) = Mode2Log::new(&self.engine.paths.mode2_log_file).append(kind) {
            warn!("Could not append to mode 2 log: {e}");
        }
    }

    fn serve_alternating(&self) -> Result<PathBuf> {
        let last = Mode2Log::new(&self.engine.paths.mode2_log_file).last();
        let want_collage = last.action == ServedKind::Landscape;
        let portraits = self.engine.stock(Orientation::Portrait);
        let landscapes = self.engine.stock(Orientation::Landscape);

        info!(
            "Mode 2: portraits={}, landscapes={}, want_collage={want_collage}, last={:?}, total_landscapes={}, total_collages={}",
            portraits.count(),
            landscapes.count(),
            last.action,
            last.total_landscapes,
            last.total_collages
        );

        let starved = if want_collage {
            portraits.count() < COLLAGE_TILES
        } else {
            landscapes.count() < 1
        };
        if starved && self.has_refill_window() {
            info!("Mode 2: Stock low; refilling...");
            self.refill_alternating();
        }

        if want_collage {
            let files = portraits.list();
            if files.len() >= COLLAGE_TILES {
                info!("Mode 2: Creating collage from stock ({COLLAGE_TILES} portraits)...");
                let parts: Vec<PathBuf> = files
                    .choose_multiple(&mut rand::thread_rng(), COLLAGE_TILES)
                    .cloned()
                    .collect();
                match self.apply_collage(&parts, "wallpaper-mode2") {
                    Ok(applied) => {
                        info!("Mode 2: Collage wallpaper set from stock");
                        self.refill_alternating();
                        self.log_served(ServedKind::Collage);
                        return Ok(applied);
                    }
                    Err(e) => warn!("Failed to create collage from stock: {e}"),
                }
            }
            info!("Mode 2: Collage not possible, falling back to landscape...");
        }

        if landscapes.count() == 0 {
            info!("No landscape stock available, downloading one...");
            self.download_landscape_into_stock()?;
        }

        let applied = self.apply_random_stock(Orientation::Landscape).inspect_err(|e| {
            info!("Failed to set landscape wallpaper: {e}");
        })?;
        info!("Mode 2: Landscape wallpaper set from stock");
        self.refill_alternating();
        self.log_served(ServedKind::Landscape);
        Ok(applied)
    }

    fn download_landscape_into_stock(&self) -> Result<PathBuf> {
        if !self.engine.downloads_allowed() {
            info!("Downloads disabled; helper should refill stock.");
            return Err(Error::NoCandidates);
        }
        let Some(record) = self.engine.pick(1, Orientation::Landscape, self.deadline).into_iter().next() else {
            info!("Could not find a suitable landscape image.");
            return Err(Error::NoCandidates);
        };
        let stock = self.engine.stock(Orientation::Landscape);
        self.engine.fetch_into(&record, stock.path(), self.deadline, "landscape")
    }
}
