//! Streams remote files into a directory with retries and atomic renames.

use std::{
    fs::{self, File},
    io::{BufWriter, IsTerminal, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use reqwest::{blocking::Client, header::REFERER};

use crate::{
    deadline::Deadline,
    error::{Error, Result},
    info,
    ranker::CandidateRecord,
    utility::{partial_path, random_wallpaper_name},
    warn,
};

const RETRY_PAUSE: Duration = Duration::from_millis(500);
const CHUNK_SIZE: usize = 8192;
const BAR_TEMPLATE: &str = "[{prefix}] {bar:24} {percent:>3}% {bytes}/{total_bytes}";
const SPINNER_TEMPLATE: &str = "[{prefix}] {spinner} {bytes}";

/// Produces one file inside `out_dir` or fails.
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        ext: &str,
        out_dir: &Path,
        deadline: &Deadline,
        progress_label: Option<&str>,
    ) -> Result<PathBuf>;
}

/// Per-file terminal progress. Rendering problems never reach the download.
struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    fn start(label: Option<&str>, total: Option<u64>) -> Self {
        let Some(label) = label else {
            return Self { bar: None };
        };
        if !std::io::stderr().is_terminal() {
            return Self { bar: None };
        }

        let (bar, template) = match total {
            Some(len) if len > 0 => (ProgressBar::new(len), BAR_TEMPLATE),
            _ => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
        };
        bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#-");
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        Self { bar: Some(bar) }
    }

    fn advance(&self, bytes: usize) {
        if let Some(bar) = &self.bar {
            bar.inc(bytes as u64);
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish();
        }
    }

    fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }
}

pub struct Downloader {
    http: Client,
    retries: u32,
    request_timeout_cap: Duration,
}

impl Downloader {
    pub fn new(http: Client, retries: u32, request_timeout_cap: Duration) -> Self {
        Self {
            http,
            retries: retries.max(1),
            request_timeout_cap,
        }
    }

    fn attempt(
        &self,
        url: &str,
        target: &Path,
        tmp: &Path,
        deadline: &Deadline,
        progress_label: Option<&str>,
    ) -> Result<()> {
        let timeout = deadline.timeout_for(self.request_timeout_cap)?;
        let referer = url.split('?').next().unwrap_or(url);
        let mut resp = self
            .http
            .get(url)
            .header(REFERER, referer)
            .timeout(timeout)
            .send()?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus(resp.status().as_u16()));
        }

        let progress = Progress::start(progress_label, resp.content_length());
        let streamed = (|| -> Result<()> {
            let mut out = BufWriter::new(File::create(tmp)?);
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                let n = resp.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                progress.advance(n);
            }
            out.flush()?;
            Ok(())
        })();

        match streamed {
            Ok(()) => progress.finish(),
            Err(e) => {
                progress.abandon();
                return Err(e);
            }
        }

        fs::rename(tmp, target)?;
        Ok(())
    }
}

impl Fetch for Downloader {
    fn fetch(
        &self,
        url: &str,
        ext: &str,
        out_dir: &Path,
        deadline: &Deadline,
        progress_label: Option<&str>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(out_dir)?;
        let target = out_dir.join(random_wallpaper_name("wallpaper", ext));
        let tmp = partial_path(&target);

        let mut last_err = None;
        for attempt in 1..=self.retries {
            match self.attempt(url, &target, &tmp, deadline, progress_label) {
                Ok(()) => return Ok(target),
                Err(e) => {
                    // a partial file is never worth keeping; it may not exist yet
                    let _ = fs::remove_file(&tmp);
                    if matches!(e, Error::DeadlineExceeded) {
                        return Err(e);
                    }
                    info!("Download attempt {attempt}/{} for {url} failed: {e}", self.retries);
                    last_err = Some(e);
                    deadline.sleep_at_most(RETRY_PAUSE);
                }
            }
        }

        Err(Error::DownloadFailed(Box::new(
            last_err.unwrap_or(Error::DeadlineExceeded),
        )))
    }
}

/// Downloads a batch. With progress shown the files go one at a time under
/// `<label_prefix> N` labels; otherwise a pool of `min(threads, items)` workers runs
/// them in parallel. Failures are logged and skipped.
pub fn download_many(
    fetcher: &dyn Fetch,
    items: &[CandidateRecord],
    out_dir: &Path,
    deadline: &Deadline,
    threads: usize,
    show_progress: bool,
    label_prefix: &str,
) -> Vec<PathBuf> {
    if items.is_empty() {
        return Vec::new();
    }

    let fetch_one = |item: &CandidateRecord, label: Option<&str>| {
        match fetcher.fetch(&item.file_url, &item.file_ext, out_dir, deadline, label) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Download of {} failed: {e}", item.file_url);
                None
            }
        }
    };

    let sequential = || {
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let label = show_progress.then(|| format!("{label_prefix} {}", idx + 1));
                fetch_one(item, label.as_deref())
            })
            .collect::<Vec<_>>()
    };

    if show_progress {
        return sequential();
    }

    let workers = threads.min(items.len()).max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| {
            items
                .par_iter()
                .filter_map(|item| fetch_one(item, None))
                .collect()
        }),
        Err(e) => {
            warn!("Could not start download pool ({e}); downloading sequentially");
            sequential()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyFetch {
        calls: AtomicUsize,
        fail_every: usize,
    }

    impl Fetch for FlakyFetch {
        fn fetch(&self, url: &str, ext: &str, out_dir: &Path, _: &Deadline, _: Option<&str>) -> Result<PathBuf> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n % self.fail_every == 0 {
                return Err(Error::DownloadFailed(Box::new(Error::HttpStatus(500))));
            }
            let name = url.rsplit('/').next().unwrap_or("x");
            let path = out_dir.join(format!("{name}.{ext}"));
            fs::write(&path, b"img")?;
            Ok(path)
        }
    }

    fn record(i: usize) -> CandidateRecord {
        CandidateRecord {
            width: 100,
            height: 200,
            file_url: format!("https://a/{i}"),
            file_ext: "jpg".into(),
            source_name: "yande.re".into(),
            rating_tag: "rating:q".into(),
        }
    }

    #[test]
    fn failures_are_skipped_in_parallel_mode() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FlakyFetch { calls: AtomicUsize::new(0), fail_every: 3 };
        let items: Vec<_> = (0..9).map(record).collect();
        let deadline = Deadline::after(Duration::from_secs(30));
        let done = download_many(&fetcher, &items, dir.path(), &deadline, 4, false, "image");
        assert_eq!(done.len(), 6);
        assert!(done.iter().all(|p| p.exists()));
    }

    #[test]
    fn sequential_mode_downloads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FlakyFetch { calls: AtomicUsize::new(0), fail_every: usize::MAX };
        let items: Vec<_> = (0..3).map(record).collect();
        let deadline = Deadline::after(Duration::from_secs(30));
        let done = download_many(&fetcher, &items, dir.path(), &deadline, 8, true, "image");
        assert_eq!(done.len(), 3);
    }

    #[test]
    fn expired_deadline_fails_without_leaving_partials() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Client::new(), 3, Duration::from_secs(30));
        let deadline = Deadline::after(Duration::ZERO);
        let err = downloader
            .fetch("https://example.invalid/a.jpg", "jpg", dir.path(), &deadline, None)
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
