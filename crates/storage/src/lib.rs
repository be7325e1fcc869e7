use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{Post, PostId, Vote, VoteDirection};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVote {
    pub post_id: PostId,
    pub direction: VoteDirection,
    pub recorded_at: DateTime<Utc>,
}

impl StoredVote {
    pub fn vote(&self) -> Vote {
        Vote {
            post_id: self.post_id,
            direction: self.direction,
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run vote migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Upserts `votes` in one transaction; a later vote for the same post
    /// replaces the earlier one. Returns how many rows were written.
    pub async fn record_votes(&self, votes: &[Vote]) -> Result<u64> {
        let recorded_at = Utc::now();
        let mut tx = self.pool.begin().await.context("failed to begin vote save")?;
        let mut written = 0;
        for vote in votes {
            let result = sqlx::query(
                "INSERT INTO votes (post_id, up, recorded_at) VALUES (?, ?, ?)
                 ON CONFLICT(post_id) DO UPDATE SET up=excluded.up, recorded_at=excluded.recorded_at",
            )
            .bind(vote.post_id.0)
            .bind(vote.direction.is_up())
            .bind(recorded_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to record vote for post {}", vote.post_id))?;
            written += result.rows_affected();
        }
        tx.commit().await.context("failed to commit vote save")?;
        Ok(written)
    }

    pub async fn list_votes(&self) -> Result<Vec<StoredVote>> {
        let rows = sqlx::query("SELECT post_id, up, recorded_at FROM votes ORDER BY post_id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list votes")?;
        Ok(rows.iter().map(stored_vote).collect())
    }

    pub async fn vote_for(&self, post_id: PostId) -> Result<Option<StoredVote>> {
        let row = sqlx::query("SELECT post_id, up, recorded_at FROM votes WHERE post_id = ?")
            .bind(post_id.0)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load vote for post {post_id}"))?;
        Ok(row.as_ref().map(stored_vote))
    }

    pub async fn count_votes(&self) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(up), 0), COALESCE(SUM(1 - up), 0) FROM votes",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count votes")?;
        Ok((row.get::<i64, _>(0) as u64, row.get::<i64, _>(1) as u64))
    }
}

impl Storage {
    /// Inserts or refreshes posts in one transaction. Returns how many rows
    /// were written.
    pub async fn upsert_posts(&self, posts: &[Post]) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("failed to begin post import")?;
        let mut written = 0;
        for post in posts {
            let result = sqlx::query(
                "INSERT INTO posts (post_id, tags, score) VALUES (?, ?, ?)
                 ON CONFLICT(post_id) DO UPDATE SET tags=excluded.tags, score=excluded.score",
            )
            .bind(post.id.0)
            .bind(post.tag_string())
            .bind(post.score)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store post {}", post.id))?;
            written += result.rows_affected();
        }
        tx.commit().await.context("failed to commit post import")?;
        Ok(written)
    }

    pub async fn post(&self, post_id: PostId) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT post_id, tags, score FROM posts WHERE post_id = ?")
            .bind(post_id.0)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load post {post_id}"))?;
        Ok(row.as_ref().map(post))
    }

    pub async fn list_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query("SELECT post_id, tags, score FROM posts ORDER BY post_id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list posts")?;
        Ok(rows.iter().map(post).collect())
    }

    /// Posts that have a saved vote, paired with that vote.
    pub async fn voted_posts(&self) -> Result<Vec<(Post, VoteDirection)>> {
        let rows = sqlx::query(
            "SELECT p.post_id, p.tags, p.score, v.up FROM posts p
             JOIN votes v ON v.post_id = p.post_id
             ORDER BY p.post_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load voted posts")?;
        Ok(rows
            .iter()
            .map(|row| (post(row), VoteDirection::from_up(row.get::<bool, _>(3))))
            .collect())
    }

    /// Posts nobody has voted on yet.
    pub async fn unvoted_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT p.post_id, p.tags, p.score FROM posts p
             LEFT JOIN votes v ON v.post_id = p.post_id
             WHERE v.post_id IS NULL
             ORDER BY p.post_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load unvoted posts")?;
        Ok(rows.iter().map(post).collect())
    }

    pub async fn random_unvoted_post(&self) -> Result<Option<Post>> {
        let row = sqlx::query(
            "SELECT p.post_id, p.tags, p.score FROM posts p
             LEFT JOIN votes v ON v.post_id = p.post_id
             WHERE v.post_id IS NULL
             ORDER BY RANDOM() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to pick a random post")?;
        Ok(row.as_ref().map(post))
    }
}

fn post(row: &SqliteRow) -> Post {
    Post::from_tag_string(
        PostId(row.get::<i64, _>(0)),
        &row.get::<String, _>(1),
        row.get::<i64, _>(2),
    )
}

fn stored_vote(row: &SqliteRow) -> StoredVote {
    StoredVote {
        post_id: PostId(row.get::<i64, _>(0)),
        direction: VoteDirection::from_up(row.get::<bool, _>(1)),
        recorded_at: row.get::<DateTime<Utc>, _>(2),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
