use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("run timeout exceeded")]
    DeadlineExceeded,

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("cloudflare or anti-bot page detected at {0}")]
    AntiBot(String),

    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("no suitable image found")]
    NoCandidates,

    #[error("download failed: {0}")]
    DownloadFailed(Box<Error>),

    #[error("could not acquire lock after multiple attempts")]
    LockUnavailable,

    #[error("collage: {0}")]
    Collage(String),

    #[error("could not set wallpaper: {0}")]
    Apply(String),

    #[error("refusing to delete {0}: not inside the stock directory")]
    PathOutsideStock(PathBuf),
}

impl Error {
    /// Failures worth another attempt inside the same run.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::HttpStatus(_) | Self::AntiBot(_) => true,
            Self::DownloadFailed(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
