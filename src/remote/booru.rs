use std::time::Duration;

use rand::{seq::SliceRandom, Rng};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT},
};
use serde_json::Value;

use super::{CandidateSource, PostBatch, RawPost};
use crate::{
    data_loaders::config::Rating,
    deadline::Deadline,
    error::{Error, Result},
    info,
    utility::Orientation,
    warn,
};

const JSON_TIMEOUT_CAP: Duration = Duration::from_secs(20);
const WARM_TIMEOUT_CAP: Duration = Duration::from_secs(6);
const FAILURE_PAUSE: Duration = Duration::from_millis(300);
const SOURCE_ATTEMPTS: usize = 4;
const PAGE_LIMIT: u32 = 100;

/// Backend asked once more when every landscape attempt came back empty.
const LANDSCAPE_FALLBACK: &str = "yande.re";

const ANTI_BOT_MARKERS: [&[u8]; 6] = [
    b"attention required",
    b"just a moment",
    b"cf-challenge",
    b"cf-",
    b"captcha",
    b"checking your browser",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooruKind {
    /// `/post.json`, answers with an array of posts.
    Moebooru,
    /// `/index.php?page=dapi`, answers with an array or `{"post": ...}`.
    Gelbooru,
}

#[derive(Debug, Clone, Copy)]
pub struct Backend {
    pub name: &'static str,
    pub kind: BooruKind,
    pub base: &'static str,
    /// `None` serves both orientations.
    pub serves: Option<Orientation>,
    /// Fetch the site root for cookies and retry with other headers when an
    /// anti-bot page comes back.
    pub warm_on_block: bool,
}

pub const DEFAULT_BACKENDS: [Backend; 2] = [
    Backend {
        name: "yande.re",
        kind: BooruKind::Moebooru,
        base: "https://yande.re",
        serves: Some(Orientation::Portrait),
        warm_on_block: false,
    },
    Backend {
        name: "konachan.com",
        kind: BooruKind::Moebooru,
        base: "https://konachan.com",
        serves: Some(Orientation::Landscape),
        warm_on_block: true,
    },
];

struct HeaderSet {
    user_agent: &'static str,
    accept: &'static str,
    accept_language: &'static str,
}

const HEADER_VARIANTS: [HeaderSet; 2] = [
    HeaderSet {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
    HeaderSet {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "en-US,en;q=0.8",
    },
];

impl HeaderSet {
    fn to_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(self.user_agent));
        headers.insert(ACCEPT, HeaderValue::from_static(self.accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(self.accept_language));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers
    }
}

/// Browser-like defaults shared by metadata queries and file downloads.
pub fn default_headers() -> HeaderMap {
    HEADER_VARIANTS[0].to_map()
}

/// Case-insensitive scan for interstitial marker phrases.
pub fn is_anti_bot_page(body: &[u8]) -> bool {
    let lower = body.to_ascii_lowercase();
    ANTI_BOT_MARKERS
        .iter()
        .any(|marker| lower.windows(marker.len()).any(|w| w == *marker))
}

/// Moebooru answers with an array; the gelbooru family may wrap posts in an
/// object whose `post` field is an array or a single object.
pub fn posts_from_json(data: &Value) -> Vec<RawPost> {
    let items: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("post") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items.into_iter().filter_map(RawPost::from_json).collect()
}

fn rating_tag(kind: BooruKind, rating: Rating) -> &'static str {
    match (kind, rating) {
        (BooruKind::Moebooru, Rating::Safe) => "rating:s",
        (BooruKind::Moebooru, Rating::Questionable) => "rating:q",
        (BooruKind::Moebooru, Rating::Explicit) => "rating:e",
        (BooruKind::Gelbooru, Rating::Safe) => "rating:general",
        (BooruKind::Gelbooru, Rating::Questionable) => "rating:questionable",
        (BooruKind::Gelbooru, Rating::Explicit) => "rating:explicit",
    }
}

/// Queries image-board backends over HTTP, keeping cookies between calls.
pub struct BooruClient {
    http: Client,
    backends: Vec<Backend>,
    ratings: Vec<Rating>,
    max_page: u32,
}

impl BooruClient {
    pub fn new(http: Client, ratings: Vec<Rating>, max_page: u32) -> Self {
        Self {
            http,
            backends: DEFAULT_BACKENDS.to_vec(),
            ratings,
            max_page: max_page.max(1),
        }
    }

    pub fn with_backends(mut self, backends: Vec<Backend>) -> Self {
        self.backends = backends;
        self
    }

    /// Shared blocking client with a cookie jar and browser-like headers.
    pub fn http_client() -> Result<Client> {
        Ok(Client::builder()
            .cookie_store(true)
            .default_headers(default_headers())
            .build()?)
    }

    fn rating_tags(&self, backend: &Backend) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self
            .ratings
            .iter()
            .map(|r| rating_tag(backend.kind, *r))
            .collect();
        if tags.is_empty() {
            tags = [Rating::Questionable, Rating::Explicit]
                .into_iter()
                .map(|r| rating_tag(backend.kind, r))
                .collect();
        }
        tags
    }

    fn candidates_for(&self, orientation: Orientation) -> Vec<&Backend> {
        let restricted: Vec<&Backend> = self
            .backends
            .iter()
            .filter(|b| b.serves.map(|o| o == orientation).unwrap_or(true))
            .collect();
        if restricted.is_empty() {
            self.backends.iter().collect()
        } else {
            restricted
        }
    }

    fn fetch_json(&self, url: &str, headers: &HeaderSet, deadline: &Deadline) -> Result<Value> {
        let timeout = deadline.timeout_for(JSON_TIMEOUT_CAP)?;
        let resp = self
            .http
            .get(url)
            .headers(headers.to_map())
            .timeout(timeout)
            .send()?;
        let status = resp.status();
        let raw = resp.bytes()?;
        if is_anti_bot_page(&raw) {
            warn!("Cloudflare/anti-bot detected when fetching JSON from {url}");
            return Err(Error::AntiBot(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    fn warm_site(&self, base: &str, deadline: &Deadline) -> bool {
        let Ok(timeout) = deadline.timeout_for(WARM_TIMEOUT_CAP) else {
            return false;
        };
        match self.http.get(base).timeout(timeout).send().and_then(|r| r.bytes()) {
            Ok(raw) => !is_anti_bot_page(&raw),
            Err(_) => false,
        }
    }

    fn page_url(backend: &Backend, page: u32, tag: &str) -> String {
        match backend.kind {
            BooruKind::Moebooru => format!(
                "{}/post.json?limit={PAGE_LIMIT}&page={page}&tags={}",
                backend.base,
                encode_tag(tag)
            ),
            BooruKind::Gelbooru => format!(
                "{}/index.php?page=dapi&s=post&q=index&json=1&limit={PAGE_LIMIT}&pid={}&tags={}",
                backend.base,
                page.saturating_sub(1),
                encode_tag(tag)
            ),
        }
    }

    fn fetch_posts(&self, backend: &Backend, page: u32, tag: &str, deadline: &Deadline) -> Result<Vec<RawPost>> {
        let url = Self::page_url(backend, page, tag);
        match self.fetch_json(&url, &HEADER_VARIANTS[0], deadline) {
            Ok(data) => Ok(posts_from_json(&data)),
            Err(Error::AntiBot(blocked)) if backend.warm_on_block => {
                if !self.warm_site(backend.base, deadline) {
                    return Err(Error::AntiBot(blocked));
                }
                info!("Warmed {} session; retrying with alternate headers", backend.name);
                for headers in &HEADER_VARIANTS {
                    if let Ok(data) = self.fetch_json(&url, headers, deadline) {
                        return Ok(posts_from_json(&data));
                    }
                }
                Err(Error::AntiBot(blocked))
            }
            Err(e) => Err(e),
        }
    }

    /// One random page from one backend, merged across the rating tags.
    fn query_backend(&self, backend: &Backend, deadline: &Deadline) -> Option<PostBatch> {
        let mut rng = rand::thread_rng();
        let mut tags = self.rating_tags(backend);
        tags.shuffle(&mut rng);
        let page = rng.gen_range(1..=self.max_page);

        let mut posts = Vec::new();
        let mut used = Vec::new();
        for tag in tags {
            match self.fetch_posts(backend, page, tag, deadline) {
                Ok(batch) if !batch.is_empty() => {
                    posts.extend(batch);
                    used.push(tag);
                }
                Ok(_) => {}
                Err(e) => {
                    info!("{} page {page} ({tag}) failed: {e}", backend.name);
                    deadline.sleep_at_most(FAILURE_PAUSE);
                }
            }
        }

        if posts.is_empty() {
            return None;
        }
        Some(PostBatch {
            source_name: backend.name.to_string(),
            rating_tag: used.join("+"),
            posts,
        })
    }
}

fn encode_tag(tag: &str) -> String {
    tag.replace(':', "%3A").replace(' ', "+")
}

impl CandidateSource for BooruClient {
    fn fetch_batch(&self, orientation: Orientation, deadline: &Deadline) -> Option<PostBatch> {
        let candidates = self.candidates_for(orientation);
        for _ in 0..SOURCE_ATTEMPTS {
            if deadline.is_expired() {
                break;
            }
            let Some(backend) = candidates.choose(&mut rand::thread_rng()) else {
                break;
            };
            if let Some(batch) = self.query_backend(backend, deadline) {
                return Some(batch);
            }
        }

        if orientation == Orientation::Landscape && !deadline.is_expired() {
            if let Some(fallback) = self.backends.iter().find(|b| b.name == LANDSCAPE_FALLBACK) {
                return self.query_backend(fallback, deadline);
            }
        }
        None
    }
}
