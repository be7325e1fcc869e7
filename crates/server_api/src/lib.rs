use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use shared::{
    domain::{ConsoleId, Post, PostId, Vote, VoteDirection},
    error::{ApiError, ErrorCode},
    protocol::{
        ConsoleFrame, ConsoleWrite, PostsStored, RatedPost, SaveResponse, VoteQuery,
        VoteResponse, SAVE_CONSOLE_ID,
    },
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod rating;

use rating::{interleave_extremes, TagClassifier};

/// Unread lines kept per console; older ones are dropped first.
pub const MAX_CONSOLE_BACKLOG: usize = 1_000;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pending: Arc<Mutex<BTreeMap<PostId, VoteDirection>>>,
    consoles: Arc<Mutex<HashMap<ConsoleId, ConsoleLog>>>,
}

#[derive(Debug, Default)]
struct ConsoleLog {
    unread: VecDeque<String>,
    written: usize,
    finished: bool,
}

impl ConsoleLog {
    fn append(&mut self, console_id: &ConsoleId, lines: Vec<String>) {
        self.written += lines.len();
        self.unread.extend(lines);
        let overflow = self.unread.len().saturating_sub(MAX_CONSOLE_BACKLOG);
        if overflow > 0 {
            self.unread.drain(..overflow);
            debug!(console = %console_id, dropped = overflow, "console backlog trimmed");
        }
    }
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            consoles: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Takes the vote direction from `up`, falling back to the older
/// `direction` parameter.
pub fn resolve_vote(query: &VoteQuery) -> Result<Vote, ApiError> {
    if query.id <= 0 {
        return Err(ApiError::validation(format!(
            "post id must be positive, got {}",
            query.id
        )));
    }
    let up = match (query.up, query.direction) {
        (Some(up), _) => up,
        (None, Some(direction)) => {
            warn!(post_id = query.id, "vote used deprecated `direction` parameter");
            direction
        }
        (None, None) => {
            return Err(ApiError::validation(
                "vote needs an `up` (or legacy `direction`) parameter",
            ))
        }
    };
    Ok(Vote {
        post_id: PostId(query.id),
        direction: VoteDirection::from_up(up),
    })
}

/// Remembers a vote until the next save. A newer vote for the same post
/// replaces the pending one.
pub async fn record_vote(ctx: &ApiContext, query: &VoteQuery) -> Result<VoteResponse, ApiError> {
    let vote = resolve_vote(query)?;
    let mut pending = ctx.pending.lock().await;
    pending.insert(vote.post_id, vote.direction);
    info!(post_id = %vote.post_id, direction = ?vote.direction, "vote recorded");
    Ok(VoteResponse {
        post_id: vote.post_id,
        direction: vote.direction,
        pending_votes: pending.len(),
    })
}

pub async fn pending_votes(ctx: &ApiContext) -> Vec<Vote> {
    ctx.pending
        .lock()
        .await
        .iter()
        .map(|(post_id, direction)| Vote {
            post_id: *post_id,
            direction: *direction,
        })
        .collect()
}

/// Writes all pending votes to storage. On failure the votes go back to the
/// pending set, without clobbering votes cast while the save was running.
pub async fn save_votes(ctx: &ApiContext) -> Result<SaveResponse, ApiError> {
    let votes: Vec<Vote> = {
        let mut pending = ctx.pending.lock().await;
        std::mem::take(&mut *pending)
            .into_iter()
            .map(|(post_id, direction)| Vote { post_id, direction })
            .collect()
    };
    let save_console = ConsoleId::new(SAVE_CONSOLE_ID);
    append_lines(ctx, &save_console, vec![format!("Saving {} votes...", votes.len())]).await;

    match ctx.storage.record_votes(&votes).await {
        Ok(_) => {
            info!(saved = votes.len(), "votes saved");
            append_lines(ctx, &save_console, vec![format!("Saved {} votes.", votes.len())])
                .await;
            Ok(SaveResponse {
                saved: votes.len() as u64,
            })
        }
        Err(err) => {
            warn!(error = %err, unsaved = votes.len(), "vote save failed");
            {
                let mut pending = ctx.pending.lock().await;
                for vote in &votes {
                    pending.entry(vote.post_id).or_insert(vote.direction);
                }
            }
            append_lines(ctx, &save_console, vec![format!("Save failed: {err}")]).await;
            Err(internal(err))
        }
    }
}

/// Appends to a console, creating it on first write. Returns how many lines
/// the console has received in total.
pub async fn write_console(
    ctx: &ApiContext,
    console_id: &ConsoleId,
    write: ConsoleWrite,
) -> Result<usize, ApiError> {
    let mut consoles = ctx.consoles.lock().await;
    let log = consoles.entry(console_id.clone()).or_default();
    if log.finished {
        return Err(ApiError::validation(format!(
            "console {console_id} is already finished"
        )));
    }
    log.append(console_id, write.lines);
    log.finished = write.finished;
    Ok(log.written)
}

/// Hands out the unread lines. Once the console is finished, that frame
/// carries the end-of-stream marker and the console is forgotten.
pub async fn read_console(ctx: &ApiContext, console_id: &ConsoleId) -> Result<ConsoleFrame, ApiError> {
    let mut consoles = ctx.consoles.lock().await;
    let log = consoles
        .get_mut(console_id)
        .ok_or_else(|| ApiError::not_found(format!("no console with id {console_id}")))?;
    let frame = ConsoleFrame {
        lines: log.unread.drain(..).collect(),
        end_of_stream: log.finished,
    };
    if frame.end_of_stream {
        consoles.remove(console_id);
        debug!(console = %console_id, "finished console drained");
    }
    Ok(frame)
}

pub async fn console_count(ctx: &ApiContext) -> usize {
    ctx.consoles.lock().await.len()
}

async fn append_lines(ctx: &ApiContext, console_id: &ConsoleId, lines: Vec<String>) {
    let mut consoles = ctx.consoles.lock().await;
    consoles
        .entry(console_id.clone())
        .or_default()
        .append(console_id, lines);
}

/// Stores or refreshes posts the rater can recommend.
pub async fn add_posts(ctx: &ApiContext, posts: Vec<Post>) -> Result<PostsStored, ApiError> {
    if let Some(bad) = posts.iter().find(|post| post.id.0 <= 0) {
        return Err(ApiError::validation(format!(
            "post id must be positive, got {}",
            bad.id
        )));
    }
    let posts: Vec<Post> = posts.into_iter().map(Post::normalized).collect();
    let stored = ctx.storage.upsert_posts(&posts).await.map_err(internal)?;
    info!(stored, "posts stored");
    Ok(PostsStored { stored })
}

/// Trains a classifier on every saved vote whose post is known.
pub async fn load_classifier(ctx: &ApiContext) -> Result<TagClassifier, ApiError> {
    let voted = ctx.storage.voted_posts().await.map_err(internal)?;
    let classifier = TagClassifier::train(voted.iter().map(|(post, direction)| (post, *direction)));
    let (good, total) = classifier.votes();
    debug!(good, total, "classifier trained");
    Ok(classifier)
}

pub async fn rate_post(ctx: &ApiContext, post_id: PostId) -> Result<RatedPost, ApiError> {
    let post = ctx
        .storage
        .post(post_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("no post with id {post_id}")))?;
    Ok(load_classifier(ctx).await?.rate(post))
}

/// Unvoted posts, best predicted first.
pub async fn best_posts(ctx: &ApiContext, limit: usize) -> Result<Vec<RatedPost>, ApiError> {
    let mut ranked = ranked_unvoted(ctx).await?;
    ranked.truncate(limit);
    Ok(ranked)
}

/// Unvoted posts alternating between the best and the worst predicted, so
/// votes on them teach the rater about both ends.
pub async fn hot_posts(ctx: &ApiContext, limit: usize) -> Result<Vec<RatedPost>, ApiError> {
    let mut mixed = interleave_extremes(ranked_unvoted(ctx).await?);
    mixed.truncate(limit);
    Ok(mixed)
}

pub async fn random_post(ctx: &ApiContext) -> Result<RatedPost, ApiError> {
    let post = ctx
        .storage
        .random_unvoted_post()
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("every known post has a vote"))?;
    Ok(load_classifier(ctx).await?.rate(post))
}

async fn ranked_unvoted(ctx: &ApiContext) -> Result<Vec<RatedPost>, ApiError> {
    let posts = ctx.storage.unvoted_posts().await.map_err(internal)?;
    Ok(load_classifier(ctx).await?.rank(posts))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
