//! Small files under the state directory that survive between runs.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::utility::unix_time;

/// Archive numbering never goes below this.
pub const COUNTER_FLOOR: u64 = 233;

/// Monotonic counter naming the files in `used-walls/`.
pub struct RunCounter {
    path: PathBuf,
}

impl RunCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Last number handed out, or one below the floor when unset.
    pub fn last(&self) -> u64 {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(COUNTER_FLOOR - 1)
    }

    pub fn next(&self) -> u64 {
        let last = self.last();
        if last >= COUNTER_FLOOR {
            last + 1
        } else {
            COUNTER_FLOOR
        }
    }

    fn numbered_target(&self, src: &Path, used_dir: &Path) -> io::Result<(u64, PathBuf)> {
        let number = self.next();
        let ext = src.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
        fs::create_dir_all(used_dir)?;
        Ok((number, used_dir.join(format!("wallpaper-{number}.{ext}"))))
    }

    fn record(&self, number: u64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, number.to_string())
    }

    /// Copies `src` to `<used_dir>/wallpaper-<n>.<ext>` and records `n`. The
    /// source is left for the caller to delete once the copy is in use.
    pub fn archive_copy(&self, src: &Path, used_dir: &Path) -> io::Result<PathBuf> {
        let (number, target) = self.numbered_target(src, used_dir)?;
        fs::copy(src, &target)?;
        self.record(number)?;
        Ok(target)
    }

    /// Moves `src` into the archive under the next number.
    pub fn archive(&self, src: &Path, used_dir: &Path) -> io::Result<PathBuf> {
        let (number, target) = self.numbered_target(src, used_dir)?;
        if fs::rename(src, &target).is_err() {
            fs::copy(src, &target)?;
            // the numbered copy is what matters; a leftover source is harmless
            let _ = fs::remove_file(src);
        }
        self.record(number)?;
        Ok(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedKind {
    Landscape,
    Collage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode2Entry {
    #[serde(default)]
    pub timestamp: u64,
    pub action: ServedKind,
    #[serde(default)]
    pub total_landscapes: u64,
    #[serde(default)]
    pub total_collages: u64,
}

impl Default for Mode2Entry {
    fn default() -> Self {
        Self {
            timestamp: 0,
            action: ServedKind::Landscape,
            total_landscapes: 0,
            total_collages: 0,
        }
    }
}

/// Append-only JSON-lines log of what alternating mode served.
pub struct Mode2Log {
    path: PathBuf,
}

impl Mode2Log {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Last record; a missing or unreadable log reads as "landscape last".
    pub fn last(&self) -> Mode2Entry {
        let Ok(text) = fs::read_to_string(&self.path) else {
            return Mode2Entry::default();
        };
        text.lines()
            .map(str::trim)
            .filter(|ln| !ln.is_empty())
            .last()
            .and_then(|ln| serde_json::from_str(ln).ok())
            .unwrap_or_default()
    }

    pub fn append(&self, action: ServedKind) -> io::Result<Mode2Entry> {
        let prev = self.last();
        let entry = Mode2Entry {
            timestamp: unix_time(),
            action,
            total_landscapes: prev.total_landscapes + u64::from(action == ServedKind::Landscape),
            total_collages: prev.total_collages + u64::from(action == ServedKind::Collage),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(entry)
    }
}

pub fn load_saved_ratings(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|txt| {
            txt.trim()
                .split(',')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn save_selected_ratings(path: &Path, keys: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, keys.join(","))
}

pub fn record_current_wallpaper(path: &Path, image: &Path) -> io::Result<()> {
    fs::write(path, image.to_string_lossy().as_bytes())
}

pub fn read_current_wallpaper(path: &Path) -> Option<PathBuf> {
    let txt = fs::read_to_string(path).ok()?;
    let trimmed = txt.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}
