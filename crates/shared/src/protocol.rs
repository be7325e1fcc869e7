use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::domain::{ConsoleId, Post, PostId, VoteDirection};

pub const HEALTHZ_ROUTE: &str = "/healthz";
pub const SAVE_ROUTE: &str = "/save";
pub const VOTE_ROUTE: &str = "/vote";
pub const READ_CONSOLE_ROUTE: &str = "/readConsole";
pub const WRITE_CONSOLE_ROUTE: &str = "/console";
pub const POSTS_ROUTE: &str = "/posts";
pub const BEST_ROUTE: &str = "/best";
pub const HOT_ROUTE: &str = "/hot";
pub const RANDOM_ROUTE: &str = "/random";

pub const DEFAULT_POST_LIMIT: usize = 10;
pub const MAX_POST_LIMIT: usize = 100;

/// Console that `/save` reports its progress to.
pub const SAVE_CONSOLE_ID: &str = "save";

pub fn vote_path(post_id: PostId, direction: VoteDirection) -> String {
    format!("{VOTE_ROUTE}?up={}&id={}", direction.is_up(), post_id)
}

pub fn read_console_path(console_id: &ConsoleId) -> String {
    format!("{READ_CONSOLE_ROUTE}?{}", console_query(console_id))
}

pub fn write_console_path(console_id: &ConsoleId) -> String {
    format!("{WRITE_CONSOLE_ROUTE}?{}", console_query(console_id))
}

fn console_query(console_id: &ConsoleId) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("id", console_id.as_str())
        .finish()
}

pub fn permalink_path(post_id: PostId) -> String {
    format!("/post/{post_id}")
}

pub fn rating_path(post_id: PostId) -> String {
    format!("/post/{post_id}/rating")
}

pub fn post_list_path(route: &str, limit: usize) -> String {
    format!("{route}?limit={limit}")
}

/// Query accepted by `/vote`.
///
/// Older pages sent `direction=` where newer ones send `up=`. Both are
/// accepted; `up` takes precedence when a request carries both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteQuery {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub post_id: PostId,
    pub direction: VoteDirection,
    pub pending_votes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub saved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleQuery {
    pub id: String,
}

/// Body of a console write: lines to append and whether the producer is done.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleWrite {
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleWriteResponse {
    pub total_lines: usize,
}

/// Response of `POST /posts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsStored {
    pub stored: u64,
}

/// `?limit=` of the post listings; absent means [`DEFAULT_POST_LIMIT`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PostListQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_POST_LIMIT)
            .clamp(1, MAX_POST_LIMIT)
    }
}

/// A post with the predicted chance that it gets an upvote. `rating` is
/// `None` while there are no saved votes to learn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedPost {
    pub post: Post,
    pub rating: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ConsoleFrameError {
    #[error("console frame is not a JSON array of strings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("console frame has null at index {index} of {len}, expected only at the end")]
    MisplacedNull { index: usize, len: usize },
}

/// One `/readConsole` response.
///
/// On the wire this is a JSON array of strings; a trailing `null` marks the
/// end of the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleFrame {
    pub lines: Vec<String>,
    pub end_of_stream: bool,
}

impl ConsoleFrame {
    pub fn from_entries(mut entries: Vec<Option<String>>) -> Result<Self, ConsoleFrameError> {
        let len = entries.len();
        let end_of_stream = match entries.iter().position(Option::is_none) {
            None => false,
            Some(index) if index + 1 == len => {
                entries.pop();
                true
            }
            Some(index) => return Err(ConsoleFrameError::MisplacedNull { index, len }),
        };

        Ok(Self {
            lines: entries.into_iter().flatten().collect(),
            end_of_stream,
        })
    }

    pub fn decode(body: &str) -> Result<Self, ConsoleFrameError> {
        let entries: Vec<Option<String>> = serde_json::from_str(body)?;
        Self::from_entries(entries)
    }

    pub fn into_entries(self) -> Vec<Option<String>> {
        let mut entries: Vec<Option<String>> = self.lines.into_iter().map(Some).collect();
        if self.end_of_stream {
            entries.push(None);
        }
        entries
    }
}
