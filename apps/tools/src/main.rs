use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server_api::rating::TagClassifier;
use shared::{
    domain::{Post, PostId, Vote, VoteDirection},
    protocol::{RatedPost, DEFAULT_POST_LIMIT},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/votes.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved votes.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the saved vote for one post.
    Show { post_id: i64 },
    /// Print upvote and downvote totals.
    Stats,
    /// Import votes from a JSON array of `{"post_id": .., "direction": "up"|"down"}`.
    Import { path: std::path::PathBuf },
    /// Import posts from a JSON array of `{"id": .., "tags": [..], "score": ..}`.
    ImportPosts { path: std::path::PathBuf },
    /// Show the predicted rating of one post.
    Rate { post_id: i64 },
    /// List unvoted posts, best predicted first.
    Best {
        #[arg(long, default_value_t = DEFAULT_POST_LIMIT)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print per-tag vote counts, most frequent first.
    Tags {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::List { json } => {
            let votes = storage.list_votes().await?;
            if json {
                let votes: Vec<Vote> = votes.iter().map(|v| v.vote()).collect();
                println!("{}", serde_json::to_string_pretty(&votes)?);
            } else {
                for vote in votes {
                    println!(
                        "{}\t{}\t{}",
                        vote.post_id,
                        direction_label(vote.direction),
                        vote.recorded_at.to_rfc3339()
                    );
                }
            }
        }
        Command::Show { post_id } => match storage.vote_for(PostId(post_id)).await? {
            Some(vote) => println!("{}\t{}", vote.post_id, direction_label(vote.direction)),
            None => println!("no saved vote for post {post_id}"),
        },
        Command::Stats => {
            let (up, down) = storage.count_votes().await?;
            println!("upvotes={up} downvotes={down}");
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let votes: Vec<Vote> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON vote list", path.display()))?;
            let written = storage.record_votes(&votes).await?;
            println!("imported {written} votes");
        }
        Command::ImportPosts { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let posts: Vec<Post> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON post list", path.display()))?;
            let posts: Vec<Post> = posts.into_iter().map(Post::normalized).collect();
            let written = storage.upsert_posts(&posts).await?;
            println!("imported {written} posts");
        }
        Command::Rate { post_id } => {
            let post = storage
                .post(PostId(post_id))
                .await?
                .with_context(|| format!("no post with id {post_id}"))?;
            let classifier = classifier(&storage).await?;
            println!("{}", describe(&classifier.rate(post)));
        }
        Command::Best { limit, json } => {
            let classifier = classifier(&storage).await?;
            let mut ranked = classifier.rank(storage.unvoted_posts().await?);
            ranked.truncate(limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else {
                ranked.iter().for_each(|rated| println!("{}", describe(rated)));
            }
        }
        Command::Tags { limit } => {
            let classifier = classifier(&storage).await?;
            let (good, total) = classifier.votes();
            println!("trained on {total} votes ({good} up)");
            for (tag, counts) in classifier.tags_by_frequency().into_iter().take(limit) {
                println!("{tag}\t{}/{}", counts.good, counts.total);
            }
        }
    }

    Ok(())
}

async fn classifier(storage: &Storage) -> Result<TagClassifier> {
    let voted = storage.voted_posts().await?;
    Ok(TagClassifier::train(
        voted.iter().map(|(post, direction)| (post, *direction)),
    ))
}

fn describe(rated: &RatedPost) -> String {
    let rating = rated
        .rating
        .map(|rating| format!("{rating:.3}"))
        .unwrap_or_else(|| "unrated".to_string());
    format!(
        "{}\t{rating}\tscore={}\t{}",
        rated.post.id,
        rated.post.score,
        rated.post.tag_string()
    )
}

fn direction_label(direction: VoteDirection) -> &'static str {
    match direction {
        VoteDirection::Up => "up",
        VoteDirection::Down => "down",
    }
}
