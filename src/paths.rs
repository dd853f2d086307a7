// ~/yande-walls/src/paths.rs

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use crate::utility::Orientation;

const APP_DIR_NAME: &str = "yandere-wallpaper";

pub fn user_home_dir() -> Option<PathBuf> {
    if let Some(home) = env::var_os("HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home));
    }

    // Windows keeps the profile here instead
    if let Some(profile) = env::var_os("USERPROFILE").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(profile));
    }

    let drive = env::var("HOMEDRIVE").ok();
    let path = env::var("HOMEPATH").ok();
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(format!("{d}{p}"))),
        _ => None,
    }
}

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    if let Some(dir) = env::var_os(var).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }

    let mut base = user_home_dir().unwrap_or_else(|| {
        env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    });
    for part in fallback {
        base.push(part);
    }
    base
}

/// Every on-disk location the engine touches. Built once at start.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub stock_dir: PathBuf,
    pub landscape_stock_dir: PathBuf,
    pub used_dir: PathBuf,
    pub lock_file: PathBuf,
    /// Held with an exclusive OS lock for as long as a run owns `lock_file`.
    pub lock_guard_file: PathBuf,
    pub helper_pid_file: PathBuf,
    pub counter_file: PathBuf,
    pub mode2_log_file: PathBuf,
    pub current_wallpaper_file: PathBuf,
    pub ratings_file: PathBuf,
    pub log_file: PathBuf,
}

impl Paths {
    /// `$XDG_STATE_HOME/yandere-wallpaper` and `$XDG_CACHE_HOME/yandere-wallpaper`,
    /// defaulting to `~/.local/state` and `~/.cache`.
    pub fn resolve() -> Self {
        let state = xdg_dir("XDG_STATE_HOME", &[".local", "state"]).join(APP_DIR_NAME);
        let cache = xdg_dir("XDG_CACHE_HOME", &[".cache"]).join(APP_DIR_NAME);
        Self::under(state, cache)
    }

    pub fn under(state_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let cache_dir = cache_dir.into();
        Self {
            stock_dir: cache_dir.join("stock"),
            landscape_stock_dir: cache_dir.join("stock-landscape"),
            used_dir: cache_dir.join("used-walls"),
            lock_file: state_dir.join("run.lock"),
            lock_guard_file: state_dir.join("run.lock.guard"),
            helper_pid_file: state_dir.join("download-helper.pid"),
            counter_file: state_dir.join("wallpaper-counter"),
            mode2_log_file: state_dir.join("mode2.log"),
            current_wallpaper_file: state_dir.join("current_wallpaper"),
            ratings_file: state_dir.join("selected_ratings"),
            log_file: state_dir.join("yande-walls.log"),
            state_dir,
            cache_dir,
        }
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            &self.state_dir,
            &self.cache_dir,
            &self.stock_dir,
            &self.landscape_stock_dir,
            &self.used_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn stock_dir_for(&self, orientation: Orientation) -> &Path {
        match orientation {
            Orientation::Portrait => &self.stock_dir,
            Orientation::Landscape => &self.landscape_stock_dir,
        }
    }

    /// Directories that may hold `.part` leftovers from a killed run.
    pub fn partial_download_dirs(&self) -> [&Path; 4] {
        [
            &self.cache_dir,
            &self.stock_dir,
            &self.landscape_stock_dir,
            &self.used_dir,
        ]
    }
}
