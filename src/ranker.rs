//! Turns raw post batches into a size-biased random selection of downloads.

use std::collections::HashSet;

use rand::Rng;

use crate::{
    deadline::Deadline,
    remote::{CandidateSource, PostBatch},
    utility::{is_image_extension, Orientation},
};

/// Only the largest posts of a batch are eligible.
pub const TOP_POOL: usize = 30;
/// Batches requested before giving up on filling the count.
pub const MAX_BATCHES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub width: u32,
    pub height: u32,
    pub file_url: String,
    pub file_ext: String,
    pub source_name: String,
    pub rating_tag: String,
}

impl CandidateRecord {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub min_width: u32,
    pub min_height: u32,
}

/// Protocol-relative URLs are promoted to https.
pub fn normalize_url(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Extension from the URL path, else the hint, else `jpg`.
pub fn normalize_ext(file_url: &str, hint: Option<&str>) -> String {
    let fallback = hint
        .map(str::to_ascii_lowercase)
        .filter(|h| is_image_extension(h))
        .unwrap_or_else(|| "jpg".to_string());

    let path = file_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if is_image_extension(ext) => ext.to_ascii_lowercase(),
        _ => fallback,
    }
}

/// Posts that fit the orientation, have a URL and were not seen yet.
pub fn filter_batch(
    batch: &PostBatch,
    orientation: Orientation,
    limits: SizeLimits,
    seen: &HashSet<String>,
) -> Vec<CandidateRecord> {
    batch
        .posts
        .iter()
        .filter(|p| orientation.accepts(p.width, p.height, limits.min_width, limits.min_height))
        .filter_map(|p| {
            let url = normalize_url(p.file_url.as_deref()?);
            if seen.contains(&url) {
                return None;
            }
            Some(CandidateRecord {
                width: p.width,
                height: p.height,
                file_ext: normalize_ext(&url, p.file_ext.as_deref()),
                file_url: url,
                source_name: batch.source_name.clone(),
                rating_tag: batch.rating_tag.clone(),
            })
        })
        .collect()
}

/// Sorts by area, keeps the top slice and draws from it at random until
/// `collected` holds `count` records or the pool runs dry.
pub fn sample_top<R: Rng>(
    mut candidates: Vec<CandidateRecord>,
    count: usize,
    seen: &mut HashSet<String>,
    collected: &mut Vec<CandidateRecord>,
    rng: &mut R,
) {
    candidates.sort_by_key(|c| std::cmp::Reverse(c.area()));
    candidates.truncate(TOP_POOL);
    let mut pool = candidates;

    while !pool.is_empty() && collected.len() < count {
        let idx = rng.gen_range(0..pool.len());
        let chosen = pool.swap_remove(idx);
        pool.retain(|c| c.file_url != chosen.file_url);
        if !seen.insert(chosen.file_url.clone()) {
            continue;
        }
        collected.push(chosen);
    }
}

/// Gathers up to `count` distinct candidates, stopping after `MAX_BATCHES`
/// batches or at the deadline.
pub fn pick_images(
    source: &dyn CandidateSource,
    count: usize,
    orientation: Orientation,
    limits: SizeLimits,
    deadline: &Deadline,
) -> Vec<CandidateRecord> {
    let mut collected = Vec::new();
    if count == 0 {
        return collected;
    }
    let mut seen = HashSet::new();
    let mut rng = rand::thread_rng();

    for _ in 0..MAX_BATCHES {
        if deadline.is_expired() {
            break;
        }
        let Some(batch) = source.fetch_batch(orientation, deadline) else {
            continue;
        };
        let candidates = filter_batch(&batch, orientation, limits, &seen);
        if candidates.is_empty() {
            continue;
        }
        sample_top(candidates, count, &mut seen, &mut collected, &mut rng);
        if collected.len() >= count {
            break;
        }
    }

    collected.truncate(count);
    collected
}
