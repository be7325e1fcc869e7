use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use server_api::{
    add_posts, best_posts, hot_posts, random_post, rate_post, read_console, record_vote,
    save_votes, write_console, ApiContext,
};
use shared::{
    domain::{ConsoleId, Post, PostId},
    error::{ApiError, ErrorCode},
    protocol::{
        permalink_path, ConsoleQuery, ConsoleWrite, ConsoleWriteResponse, PostListQuery,
        PostsStored, RatedPost, SaveResponse, VoteQuery, VoteResponse, BEST_ROUTE,
        HEALTHZ_ROUTE, HOT_ROUTE, POSTS_ROUTE, RANDOM_ROUTE, READ_CONSOLE_ROUTE, SAVE_ROUTE,
        VOTE_ROUTE, WRITE_CONSOLE_ROUTE,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_filter))
        .init();

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open vote database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let state = AppState {
        api: ApiContext::new(storage),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEALTHZ_ROUTE, get(healthz))
        .route(SAVE_ROUTE, get(http_save).post(http_save))
        .route(VOTE_ROUTE, get(http_vote).post(http_vote))
        .route(READ_CONSOLE_ROUTE, get(http_read_console))
        .route(WRITE_CONSOLE_ROUTE, post(http_write_console))
        .route("/post/:post_id", get(http_post_permalink))
        .route("/post/:post_id/rating", get(http_post_rating))
        .route(POSTS_ROUTE, post(http_add_posts))
        .route(BEST_ROUTE, get(http_best))
        .route(HOT_ROUTE, get(http_hot))
        .route(RANDOM_ROUTE, get(http_random))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

fn api_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_save(State(state): State<Arc<AppState>>) -> ApiResult<SaveResponse> {
    save_votes(&state.api).await.map(Json).map_err(api_error)
}

async fn http_vote(
    State(state): State<Arc<AppState>>,
    Query(q): Query<VoteQuery>,
) -> ApiResult<VoteResponse> {
    record_vote(&state.api, &q).await.map(Json).map_err(api_error)
}

async fn http_read_console(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConsoleQuery>,
) -> ApiResult<Vec<Option<String>>> {
    let frame = read_console(&state.api, &ConsoleId::new(q.id))
        .await
        .map_err(api_error)?;
    Ok(Json(frame.into_entries()))
}

async fn http_write_console(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConsoleQuery>,
    Json(write): Json<ConsoleWrite>,
) -> ApiResult<ConsoleWriteResponse> {
    let total_lines = write_console(&state.api, &ConsoleId::new(q.id), write)
        .await
        .map_err(api_error)?;
    Ok(Json(ConsoleWriteResponse { total_lines }))
}

async fn http_post_permalink(Path(post_id): Path<i64>) -> String {
    let post_id = PostId(post_id);
    format!("Post #{post_id}\nPermalink: {}\n", permalink_path(post_id))
}

async fn http_post_rating(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> ApiResult<RatedPost> {
    rate_post(&state.api, PostId(post_id))
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_add_posts(
    State(state): State<Arc<AppState>>,
    Json(posts): Json<Vec<Post>>,
) -> ApiResult<PostsStored> {
    add_posts(&state.api, posts).await.map(Json).map_err(api_error)
}

async fn http_best(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PostListQuery>,
) -> ApiResult<Vec<RatedPost>> {
    best_posts(&state.api, q.limit())
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_hot(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PostListQuery>,
) -> ApiResult<Vec<RatedPost>> {
    hot_posts(&state.api, q.limit())
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_random(State(state): State<Arc<AppState>>) -> ApiResult<RatedPost> {
    random_post(&state.api).await.map(Json).map_err(api_error)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
