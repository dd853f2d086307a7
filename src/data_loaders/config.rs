use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use super::yaml::load_yaml_map;
use crate::paths::user_home_dir;

const CONFIG_FILE_NAME: &str = "configuration.conf";
const YAML_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollageMode {
    /// Mode 0: single landscape images from the landscape pool.
    LandscapeOnly,
    /// Mode 1: collages built from the portrait pool.
    StockCollage,
    /// Mode 2: strict alternation between collage and landscape.
    Alternating,
}

impl CollageMode {
    fn from_number(n: i64) -> Option<Self> {
        match n {
            0 => Some(Self::LandscapeOnly),
            1 => Some(Self::StockCollage),
            2 => Some(Self::Alternating),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::LandscapeOnly => "landscape-only stock",
            Self::StockCollage => "stock-based collage",
            Self::Alternating => "alternating collage/landscape",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rating {
    Safe,
    Questionable,
    Explicit,
}

impl Rating {
    pub const ORDER: [Rating; 3] = [Rating::Safe, Rating::Questionable, Rating::Explicit];

    pub fn key(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Questionable => "questionable",
            Self::Explicit => "explicit",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ORDER.into_iter().find(|r| r.key() == key)
    }

    fn default_enabled(self) -> bool {
        !matches!(self, Self::Safe)
    }
}

/// Immutable run configuration. Built once in `main` and shared by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub min_width: u32,
    pub min_height: u32,
    pub max_api_page: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub collage_mode: CollageMode,
    pub stock_target: usize,
    pub mode2_portrait_target: Option<usize>,
    pub mode2_landscape_target: Option<usize>,
    pub download_threads: usize,
    pub download_retries: u32,
    pub request_timeout_cap: Duration,
    pub run_timeout: Duration,
    pub slideshow_minutes: u64,
    pub show_countdown: bool,
    pub show_download_progress: bool,
    pub min_tile_width: u32,
    pub helper_interval: Duration,
    pub helper_threshold: f64,
    pub countdown_path: Option<PathBuf>,
    pub force_downloads: bool,
    pub debug: bool,
    pub ratings: Vec<Rating>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_width: 1600,
            min_height: 900,
            max_api_page: 300,
            target_width: 1920,
            target_height: 1080,
            collage_mode: CollageMode::StockCollage,
            stock_target: 30,
            mode2_portrait_target: None,
            mode2_landscape_target: None,
            download_threads: 8,
            download_retries: 3,
            request_timeout_cap: Duration::from_secs(30),
            run_timeout: Duration::from_secs(300),
            slideshow_minutes: 0,
            show_countdown: false,
            show_download_progress: true,
            min_tile_width: 500,
            helper_interval: Duration::from_secs(30),
            helper_threshold: 0.5,
            countdown_path: None,
            force_downloads: false,
            debug: false,
            ratings: Rating::ORDER
                .into_iter()
                .filter(|r| r.default_enabled())
                .collect(),
        }
    }
}

/// Layered key lookup: environment first, then the config file.
struct Sources<'a> {
    file: &'a HashMap<String, String>,
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Sources<'_> {
    fn raw(&self, key: &str) -> Option<String> {
        if let Some(v) = (self.env)(key).filter(|v| !v.trim().is_empty()) {
            return Some(v.trim().to_string());
        }
        self.file
            .get(&key.to_ascii_lowercase())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn int_at(&self, key: &str) -> Option<i64> {
        self.raw(key)?.parse().ok()
    }

    fn float_at(&self, key: &str) -> Option<f64> {
        self.raw(key)?.parse().ok()
    }

    fn bool_at(&self, key: &str) -> Option<bool> {
        self.raw(key).map(|v| parse_flag(&v))
    }

    fn path_at(&self, key: &str) -> Option<PathBuf> {
        self.raw(key).map(|v| expand_home(&v))
    }
}

impl Settings {
    /// Reads the first config file found and the process environment.
    /// Malformed values keep their defaults.
    pub fn load() -> Self {
        let file = discover_config_file()
            .and_then(|path| read_config_file(&path))
            .unwrap_or_default();
        let env_lookup = |key: &str| env::var(key).ok();
        Self::from_sources(&file, &env_lookup)
    }

    pub fn from_sources(
        file: &HashMap<String, String>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let src = Sources { file, env };
        let d = Self::default();

        let dim = |key: &str, default: u32| {
            src.int_at(key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };
        let at_least = |key: &str, default: i64, floor: i64| {
            src.int_at(key).unwrap_or(default).max(floor)
        };

        let mode2_target = |key: &str| {
            src.int_at(key).map(|v| v.max(1) as usize)
        };

        Self {
            min_width: dim("MIN_WIDTH", d.min_width),
            min_height: dim("MIN_HEIGHT", d.min_height),
            max_api_page: dim("MAX_API_PAGE", d.max_api_page).max(1),
            target_width: dim("TARGET_WIDTH", d.target_width).max(1),
            target_height: dim("TARGET_HEIGHT", d.target_height).max(1),
            collage_mode: src
                .int_at("COLLAGE_MODE")
                .and_then(CollageMode::from_number)
                .unwrap_or(d.collage_mode),
            stock_target: at_least("STOCK_TARGET", d.stock_target as i64, 3) as usize,
            mode2_portrait_target: mode2_target("MODE2_PORTRAIT_TARGET"),
            mode2_landscape_target: mode2_target("MODE2_LANDSCAPE_TARGET"),
            download_threads: at_least("DOWNLOAD_THREADS", d.download_threads as i64, 2) as usize,
            download_retries: d.download_retries,
            request_timeout_cap: d.request_timeout_cap,
            run_timeout: Duration::from_secs(
                at_least("RUN_TIMEOUT", d.run_timeout.as_secs() as i64, 10) as u64,
            ),
            slideshow_minutes: at_least("SLIDESHOW_MINUTES", 0, 0) as u64,
            show_countdown: src.bool_at("SHOW_COUNTDOWN").unwrap_or(d.show_countdown),
            show_download_progress: src
                .bool_at("SHOW_DOWNLOAD_PROGRESS")
                .unwrap_or(d.show_download_progress),
            min_tile_width: dim("MIN_TILE_WIDTH", d.min_tile_width).max(1),
            helper_interval: Duration::from_secs(
                at_least("DOWNLOAD_HELPER_INTERVAL", d.helper_interval.as_secs() as i64, 5) as u64,
            ),
            helper_threshold: src
                .float_at("DOWNLOAD_HELPER_THRESHOLD")
                .filter(|v| v.is_finite())
                .unwrap_or(d.helper_threshold)
                .clamp(0.1, 0.9),
            countdown_path: src.path_at("NEXT_WALLPAPER_COUNTDOWN_PATH"),
            force_downloads: src.bool_at("FORCE_DOWNLOADS").unwrap_or(d.force_downloads),
            debug: src.bool_at("DEBUG").unwrap_or(d.debug),
            ratings: parse_ratings(file, env),
        }
    }

    /// Mode 2 pool sizes: portrait defaults to the stock target, landscape to a
    /// third of portrait.
    pub fn mode2_targets(&self) -> (usize, usize) {
        let portrait = self.mode2_portrait_target.unwrap_or(self.stock_target).max(1);
        let landscape = self
            .mode2_landscape_target
            .unwrap_or_else(|| (portrait / 3).max(1));
        (portrait, landscape)
    }

    /// Stock level below which `status` reports an orientation as low.
    pub fn low_water_mark(&self, target: usize) -> usize {
        ((target as f64 * self.helper_threshold) as usize).max(1)
    }

    pub fn rating_keys(&self) -> Vec<String> {
        self.ratings.iter().map(|r| r.key().to_string()).collect()
    }
}

fn parse_flag(value: &str) -> bool {
    if let Ok(n) = value.trim().parse::<i64>() {
        return n != 0;
    }
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Config keys `safe`/`questionable`/`explicit`, then `YANDERE_RATINGS` as
/// either `k1,k2` or `k1=1,k2=0`.
fn parse_ratings(file: &HashMap<String, String>, env: &dyn Fn(&str) -> Option<String>) -> Vec<Rating> {
    let mut selected: HashMap<Rating, bool> = Rating::ORDER
        .into_iter()
        .map(|r| (r, r.default_enabled()))
        .collect();

    for rating in Rating::ORDER {
        if let Some(v) = file.get(rating.key()) {
            selected.insert(rating, parse_flag(v));
        }
    }

    if let Some(raw) = env("YANDERE_RATINGS") {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((k, v)) => {
                    if let Some(rating) = Rating::from_key(&k.trim().to_ascii_lowercase()) {
                        selected.insert(rating, parse_flag(v));
                    }
                }
                None => {
                    if let Some(rating) = Rating::from_key(&part.to_ascii_lowercase()) {
                        selected.insert(rating, true);
                    }
                }
            }
        }
    }

    Rating::ORDER
        .into_iter()
        .filter(|r| selected.get(r).copied().unwrap_or(false))
        .collect()
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = user_home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn config_candidates() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    if let Some(home) = user_home_dir() {
        dirs.push(home.join(".config"));
    }

    let mut candidates = Vec::new();
    if let Some(explicit) = env::var_os("YANDERE_CONFIG").filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(explicit));
    }
    for dir in dirs {
        candidates.push(dir.join(CONFIG_FILE_NAME));
        candidates.push(dir.join(YAML_FILE_NAME));
    }
    candidates
}

fn discover_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.is_file())
}

/// YAML files go through the YAML loader; anything else is `key=value` lines.
pub fn read_config_file(path: &Path) -> Option<HashMap<String, String>> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        return load_yaml_map(path);
    }

    let text = fs::read_to_string(path).ok()?;
    Some(parse_key_values(&text))
}

pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|ln| !ln.is_empty() && !ln.starts_with('#'))
        .filter_map(|ln| ln.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect()
}
