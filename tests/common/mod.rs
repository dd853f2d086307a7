#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use yande_walls::{
    data_loaders::config::Settings,
    deadline::Deadline,
    downloader::Fetch,
    engine::Engine,
    error::{Error, Result},
    paths::Paths,
    process::ProcessControl,
    remote::{CandidateSource, PostBatch, RawPost},
    utility::Orientation,
    wallpaper_engine::WallpaperSetter,
};

/// Endless supply of distinct posts in both orientations.
#[derive(Default)]
pub struct FakeSource {
    next_id: AtomicUsize,
}

impl CandidateSource for FakeSource {
    fn fetch_batch(&self, orientation: Orientation, _deadline: &Deadline) -> Option<PostBatch> {
        let (width, height) = match orientation {
            Orientation::Portrait => (1200, 2400),
            Orientation::Landscape => (2560, 1440),
        };
        let posts = (0..20)
            .map(|_| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                RawPost {
                    width,
                    height,
                    file_url: Some(format!("//img.test/{id}.png")),
                    file_ext: Some("png".into()),
                }
            })
            .collect();
        Some(PostBatch {
            source_name: "fake".into(),
            rating_tag: "rating:questionable".into(),
            posts,
        })
    }
}

/// Writes a small real PNG for every url.
#[derive(Default)]
pub struct FakeFetch {
    pub calls: AtomicUsize,
}

impl Fetch for FakeFetch {
    fn fetch(
        &self,
        url: &str,
        ext: &str,
        out_dir: &Path,
        deadline: &Deadline,
        _progress_label: Option<&str>,
    ) -> Result<PathBuf> {
        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(out_dir)?;
        let stem = url.rsplit('/').next().unwrap_or("img").replace('.', "_");
        let path = out_dir.join(format!("fetched-{n}-{stem}.{ext}"));
        RgbImage::from_pixel(40, 80, Rgb([(n % 255) as u8, 90, 160])).save(&path)?;
        Ok(path)
    }
}

/// Remembers what it was asked to show.
#[derive(Default)]
pub struct FakeSetter {
    pub applied: Mutex<Vec<PathBuf>>,
    pub fail: bool,
}

impl WallpaperSetter for FakeSetter {
    fn apply(&self, image: &Path) -> Result<()> {
        if self.fail {
            return Err(Error::Apply("display unavailable".into()));
        }
        self.applied.lock().unwrap().push(image.to_path_buf());
        Ok(())
    }
}

/// Pids are plain numbers; only those in `alive` exist.
pub struct FakeProcs {
    pub me: u32,
    pub alive: Mutex<HashSet<u32>>,
}

impl FakeProcs {
    pub fn new(me: u32, alive: &[u32]) -> Self {
        Self {
            me,
            alive: Mutex::new(alive.iter().copied().collect()),
        }
    }
}

impl ProcessControl for FakeProcs {
    fn current_pid(&self) -> u32 {
        self.me
    }
    fn is_alive(&self, pid: u32) -> bool {
        pid == self.me || self.alive.lock().unwrap().contains(&pid)
    }
    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.alive.lock().unwrap().remove(&pid);
        Ok(())
    }
    fn kill(&self, pid: u32) -> io::Result<()> {
        self.terminate(pid)
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub engine: Engine,
    pub fetch: Arc<FakeFetch>,
}

pub fn fixture(settings: Settings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::under(dir.path().join("state"), dir.path().join("cache"));
    paths.ensure_dirs().unwrap();
    let fetch = Arc::new(FakeFetch::default());
    let engine = Engine::new(settings, paths, Arc::new(FakeSource::default()), fetch.clone());
    Fixture { dir, engine, fetch }
}

/// Drops `n` small portrait PNGs straight into stock.
pub fn seed_stock(dir: &Path, n: usize) -> Vec<PathBuf> {
    static SEEDED: AtomicU32 = AtomicU32::new(0);
    fs::create_dir_all(dir).unwrap();
    (0..n)
        .map(|_| {
            let id = SEEDED.fetch_add(1, Ordering::Relaxed);
            let path = dir.join(format!("seed-{id}.png"));
            RgbImage::from_pixel(30, 60, Rgb([200, 40, 40])).save(&path).unwrap();
            path
        })
        .collect()
}
