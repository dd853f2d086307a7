use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    data_loaders::config::Settings,
    deadline::Deadline,
    downloader::{download_many, Downloader, Fetch},
    error::Result,
    paths::Paths,
    pending::PendingLedger,
    ranker::{pick_images, CandidateRecord, SizeLimits},
    remote::{BooruClient, CandidateSource},
    stock::StockDir,
    utility::Orientation,
};

/// Everything a run needs, built once at start and cloned into workers.
#[derive(Clone)]
pub struct Engine {
    pub settings: Arc<Settings>,
    pub paths: Arc<Paths>,
    pub ledger: Arc<PendingLedger>,
    source: Arc<dyn CandidateSource>,
    fetcher: Arc<dyn Fetch>,
    allow_downloads: bool,
}

impl Engine {
    pub fn new(
        settings: Settings,
        paths: Paths,
        source: Arc<dyn CandidateSource>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            paths: Arc::new(paths),
            ledger: Arc::new(PendingLedger::new()),
            source,
            fetcher,
            allow_downloads: true,
        }
    }

    /// Wires the image-board client and HTTP downloader over one cookie jar.
    pub fn with_network(settings: Settings, paths: Paths) -> Result<Self> {
        let http = BooruClient::http_client()?;
        let source = BooruClient::new(http.clone(), settings.ratings.clone(), settings.max_api_page);
        let fetcher = Downloader::new(http, settings.download_retries, settings.request_timeout_cap);
        Ok(Self::new(settings, paths, Arc::new(source), Arc::new(fetcher)))
    }

    /// Foreground runs only download directly when forced; the helper always may.
    pub fn allow_downloads(mut self, allow: bool) -> Self {
        self.allow_downloads = allow;
        self
    }

    pub fn downloads_allowed(&self) -> bool {
        self.allow_downloads
    }

    pub fn stock(&self, orientation: Orientation) -> StockDir {
        StockDir::new(self.paths.stock_dir_for(orientation))
    }

    pub fn limits(&self) -> SizeLimits {
        SizeLimits {
            min_width: self.settings.min_width,
            min_height: self.settings.min_height,
        }
    }

    pub fn pick(&self, count: usize, orientation: Orientation, deadline: &Deadline) -> Vec<CandidateRecord> {
        pick_images(self.source.as_ref(), count, orientation, self.limits(), deadline)
    }

    /// `None` unless progress rendering is switched on.
    pub fn progress_label<'a>(&self, label: &'a str) -> Option<&'a str> {
        self.settings.show_download_progress.then_some(label)
    }

    pub fn fetch_into(
        &self,
        record: &CandidateRecord,
        out_dir: &Path,
        deadline: &Deadline,
        label: &str,
    ) -> Result<PathBuf> {
        self.fetcher.fetch(
            &record.file_url,
            &record.file_ext,
            out_dir,
            deadline,
            self.progress_label(label),
        )
    }

    /// Downloads a batch into an orientation's stock pool.
    pub fn download_batch(
        &self,
        records: &[CandidateRecord],
        orientation: Orientation,
        deadline: &Deadline,
    ) -> Vec<PathBuf> {
        download_many(
            self.fetcher.as_ref(),
            records,
            self.paths.stock_dir_for(orientation),
            deadline,
            self.settings.download_threads,
            self.settings.show_download_progress,
            orientation.as_str(),
        )
    }
}
