use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    console::CONSOLE_POLL_INTERVAL, permalink_url, ClickResult, ConsoleBuffer, ConsoleEvent,
    ConsolePoller, HttpRequest, HttpTransport, ReqwestTransport, SaveButton, VoteButtons,
};
use shared::{
    domain::{ConsoleId, PostId, VoteDirection},
    protocol::{post_list_path, RatedPost, BEST_ROUTE, DEFAULT_POST_LIMIT, HOT_ROUTE},
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "VOTES_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save pending votes on the server.
    Save,
    /// Vote on a post.
    Vote {
        #[arg(long)]
        post_id: i64,
        #[arg(long, value_enum)]
        direction: DirectionArg,
    },
    /// Vote with the page's key bindings: each `a` upvotes, each `z` downvotes.
    Keys {
        #[arg(long)]
        post_id: i64,
        keys: String,
    },
    /// Follow a console log until it ends.
    Console {
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value_t = CONSOLE_POLL_INTERVAL.as_millis() as u64)]
        interval_ms: u64,
    },
    /// Print the permalink of a post.
    Permalink {
        #[arg(long)]
        post_id: i64,
    },
    /// List recommended posts that have no vote yet.
    Best {
        #[arg(long, default_value_t = DEFAULT_POST_LIMIT)]
        limit: usize,
        /// Mix in posts the rater expects to be disliked.
        #[arg(long)]
        hot: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for VoteDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Up => VoteDirection::Up,
            DirectionArg::Down => VoteDirection::Down,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let transport = ReqwestTransport::new(&args.server_url)
        .with_context(|| format!("invalid server url '{}'", args.server_url))?;

    match args.command {
        Command::Save => save(transport).await,
        Command::Vote { post_id, direction } => {
            let buttons = VoteButtons::new(transport, PostId(post_id));
            vote(&buttons, direction.into()).await
        }
        Command::Keys { post_id, keys } => {
            let buttons = VoteButtons::new(transport, PostId(post_id));
            for key in keys.chars() {
                match buttons.handle_key(key) {
                    Some(result) => {
                        let outcome = result?.finished().await?;
                        println!("{key}: {outcome:?} ({})", describe_votes(&buttons));
                    }
                    None => info!(%key, "key has no binding"),
                }
            }
            Ok(())
        }
        Command::Console { id, interval_ms } => {
            let poller = ConsolePoller::new(transport, id.map(ConsoleId::new))
                .with_interval(Duration::from_millis(interval_ms));
            let mut buffer = ConsoleBuffer::default();
            let summary = poller
                .run(|event| {
                    match &event {
                        ConsoleEvent::Lines(lines) => lines.iter().for_each(|line| println!("{line}")),
                        ConsoleEvent::Notice(message) => eprintln!("{message}"),
                        ConsoleEvent::EndOfStream => {}
                    }
                    buffer.apply(&event);
                })
                .await?;
            info!(
                polls = summary.polls,
                lines = summary.lines,
                finished = summary.finished,
                bytes = buffer.text().len(),
                "console closed"
            );
            Ok(())
        }
        Command::Permalink { post_id } => {
            let base = Url::parse(&args.server_url)?;
            println!("{}", permalink_url(&base, PostId(post_id))?);
            Ok(())
        }
        Command::Best { limit, hot } => {
            let route = if hot { HOT_ROUTE } else { BEST_ROUTE };
            let response = transport
                .execute(HttpRequest::get(post_list_path(route, limit)))
                .await?;
            if !response.is_success() {
                return Err(anyhow!(
                    "{route} failed with status {}: {}",
                    response.status,
                    response.body
                ));
            }
            let posts: Vec<RatedPost> = serde_json::from_str(&response.body)
                .with_context(|| format!("unexpected {route} response"))?;
            let base = Url::parse(&args.server_url)?;
            for rated in posts {
                let rating = rated
                    .rating
                    .map(|rating| format!("{rating:.3}"))
                    .unwrap_or_else(|| "unrated".to_string());
                println!(
                    "{rating}\t{}\t{}",
                    permalink_url(&base, rated.post.id)?,
                    rated.post.tag_string()
                );
            }
            Ok(())
        }
    }
}

async fn save(transport: ReqwestTransport) -> Result<()> {
    let button = SaveButton::new(transport);
    println!("{}", button.view().label());
    let in_flight = match button.click() {
        ClickResult::Dispatched(in_flight) => in_flight,
        ClickResult::Rejected(err) => return Err(err.into()),
        ClickResult::Ignored => return Err(anyhow!("save button is not clickable")),
    };
    println!("{}", button.view().label());
    let outcome = in_flight.finished().await?;
    println!("{}", button.view().label());
    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow!("save failed: {outcome:?}"))
    }
}

async fn vote(buttons: &VoteButtons<ReqwestTransport>, direction: VoteDirection) -> Result<()> {
    let outcome = buttons.vote(direction)?.finished().await?;
    println!(
        "{} post {}: {outcome:?} ({})",
        direction.operation_name(),
        buttons.post_id(),
        describe_votes(buttons)
    );
    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow!("vote failed: {outcome:?}"))
    }
}

fn describe_votes(buttons: &VoteButtons<ReqwestTransport>) -> String {
    let view = buttons.view();
    format!(
        "upvote={} downvote={}",
        view.upvote.css_class(),
        view.downvote.css_class()
    )
}
