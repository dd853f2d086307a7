//! Remote candidate sources: image-board backends that return post metadata.

mod booru;

pub use booru::{
    is_anti_bot_page, posts_from_json, Backend, BooruClient, BooruKind, DEFAULT_BACKENDS,
};

use serde_json::Value;

use crate::{deadline::Deadline, utility::Orientation};

/// One post as returned by a backend, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPost {
    pub width: u32,
    pub height: u32,
    pub file_url: Option<String>,
    pub file_ext: Option<String>,
}

impl RawPost {
    /// Dimensions may arrive as numbers or numeric strings. A missing
    /// dimension reads as 0; an unparseable one drops the post.
    pub fn from_json(value: &Value) -> Option<Self> {
        let dim = |key: &str| -> Option<u32> {
            match value.get(key) {
                None | Some(Value::Null) => Some(0),
                Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
                Some(Value::String(s)) => s.trim().parse().ok(),
                Some(_) => None,
            }
        };
        let text = |key: &str| -> Option<String> {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };

        Some(Self {
            width: dim("width")?,
            height: dim("height")?,
            file_url: text("file_url"),
            file_ext: text("file_ext"),
        })
    }
}

/// A batch of posts from a single backend query.
#[derive(Debug, Clone, Default)]
pub struct PostBatch {
    pub source_name: String,
    pub rating_tag: String,
    pub posts: Vec<RawPost>,
}

/// Anything that can hand the ranker a batch of posts for an orientation.
pub trait CandidateSource: Send + Sync {
    /// `None` when every backend attempt failed or came back empty.
    fn fetch_batch(&self, orientation: Orientation, deadline: &Deadline) -> Option<PostBatch>;
}
