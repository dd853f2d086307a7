use std::{
    env, fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Extensions accepted for stock images and download targets.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Portrait, Orientation::Landscape];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }

    /// Square images count as portrait.
    pub fn accepts(self, width: u32, height: u32, min_width: u32, min_height: u32) -> bool {
        match self {
            Self::Landscape => width > height && width >= min_width && height >= min_height,
            Self::Portrait => width <= height,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_image_extension(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&lower.as_str())
}

pub fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(is_image_extension)
            .unwrap_or(false)
}

pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

static NAME_SEQ: AtomicU32 = AtomicU32::new(0);
static NAME_OFFSET: OnceLock<u32> = OnceLock::new();

/// `wallpaper-<unix_time>-<1000..=9999>.<ext>`. The suffix starts at a random
/// point and steps per call, so parallel downloads in one process never share
/// a name within a 9000-name window.
pub fn random_wallpaper_name(prefix: &str, ext: &str) -> String {
    let offset = *NAME_OFFSET.get_or_init(|| rand::thread_rng().gen_range(0..9000));
    let seq = NAME_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix = 1000 + (offset + seq % 9000) % 9000;
    format!("{prefix}-{}-{suffix}.{ext}", unix_time())
}

pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Looks a program up on `PATH` the way a shell would.
pub fn command_exists(program: &str) -> bool {
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return true;
        }
        cfg!(windows) && dir.join(format!("{program}.exe")).is_file()
    })
}

#[cfg(windows)]
pub fn to_wstring(s: &str) -> Vec<u16> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
