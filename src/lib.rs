//! Wallpaper stock cache: fetches image-board posts in the background, keeps
//! per-orientation pools topped up, and serves one image or collage per run.

pub mod bootstrap;
pub mod collage;
pub mod data_loaders;
pub mod deadline;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod helper;
pub mod lock;
pub mod logging;
pub mod paths;
pub mod pending;
pub mod process;
pub mod ranker;
pub mod remote;
pub mod scheduler;
pub mod selection;
pub mod slideshow;
pub mod stock;
pub mod utility;
pub mod wallpaper_engine;

/// Prefix on every user-visible line.
pub const APP_TAG: &str = "yande-walls";
