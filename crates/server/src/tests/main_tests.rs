use super::*;
use axum::{
    body::{self, Body},
    http::Request,
    response::Response,
};
use shared::{
    domain::VoteDirection,
    protocol::{post_list_path, rating_path, read_console_path, write_console_path},
};
use tower::ServiceExt;

async fn test_app() -> (Router, ApiContext) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext::new(storage);
    let app = build_router(Arc::new(AppState { api: api.clone() }));
    (app, api)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("response")
}

async fn fetch(app: &Router, uri: &str) -> Response {
    send(app, Request::get(uri).body(Body::empty()).expect("request")).await
}

async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _api) = test_app().await;
    let response = fetch(&app, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn votes_are_persisted_on_save() {
    let (app, api) = test_app().await;

    let response = fetch(&app, "/vote?up=true&id=1337").await;
    assert_eq!(response.status(), StatusCode::OK);
    let vote: VoteResponse = body_json(response).await;
    assert_eq!(vote.post_id, PostId(1337));
    assert_eq!(vote.direction, VoteDirection::Up);
    assert_eq!(vote.pending_votes, 1);
    assert!(api.storage.list_votes().await.expect("list").is_empty());

    let response = fetch(&app, "/save").await;
    assert_eq!(response.status(), StatusCode::OK);
    let saved: SaveResponse = body_json(response).await;
    assert_eq!(saved.saved, 1);

    let stored = api
        .storage
        .vote_for(PostId(1337))
        .await
        .expect("load")
        .expect("stored vote");
    assert_eq!(stored.direction, VoteDirection::Up);
}

#[tokio::test]
async fn legacy_direction_parameter_is_accepted_over_post() {
    let (app, _api) = test_app().await;
    let request = Request::post("/vote?direction=false&id=8")
        .body(Body::empty())
        .expect("request");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let vote: VoteResponse = body_json(response).await;
    assert_eq!(vote.direction, VoteDirection::Down);
}

#[tokio::test]
async fn vote_without_direction_is_a_validation_error() {
    let (app, _api) = test_app().await;
    let response = fetch(&app, "/vote?id=8").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = body_json(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn console_feed_ends_with_null_once_finished() {
    let (app, _api) = test_app().await;
    let write = Request::post("/console?id=job-1")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "lines": ["one", "two"], "finished": true }).to_string(),
        ))
        .expect("request");
    let response = send(&app, write).await;
    assert_eq!(response.status(), StatusCode::OK);
    let written: ConsoleWriteResponse = body_json(response).await;
    assert_eq!(written.total_lines, 2);

    let response = fetch(&app, "/readConsole?id=job-1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let entries: Vec<Option<String>> = body_json(response).await;
    assert_eq!(
        entries,
        vec![Some("one".to_string()), Some("two".to_string()), None]
    );

    let response = fetch(&app, "/readConsole?id=job-1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn console_ids_with_reserved_characters_round_trip() {
    let (app, _api) = test_app().await;
    let id = ConsoleId::new("job&x=1");
    let write = Request::post(write_console_path(&id))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "lines": ["hello"], "finished": true }).to_string(),
        ))
        .expect("request");
    assert_eq!(send(&app, write).await.status(), StatusCode::OK);

    let response = fetch(&app, "/readConsole?id=job").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = fetch(&app, &read_console_path(&id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let entries: Vec<Option<String>> = body_json(response).await;
    assert_eq!(entries, vec![Some("hello".to_string()), None]);
}

#[tokio::test]
async fn unknown_console_is_not_found() {
    let (app, _api) = test_app().await;
    let response = fetch(&app, "/readConsole?id=nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = body_json(response).await;
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn save_progress_is_readable_from_save_console() {
    let (app, _api) = test_app().await;
    fetch(&app, "/vote?up=false&id=3").await;
    fetch(&app, "/save").await;

    let entries: Vec<Option<String>> = body_json(fetch(&app, "/readConsole?id=save").await).await;
    assert_eq!(
        entries,
        vec![
            Some("Saving 1 votes...".to_string()),
            Some("Saved 1 votes.".to_string())
        ]
    );
}

#[tokio::test]
async fn post_page_shows_permalink() {
    let (app, _api) = test_app().await;
    let response = fetch(&app, "/post/42").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(text.contains("/post/42"));
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    send(app, request).await
}

#[tokio::test]
async fn best_posts_follow_saved_votes() {
    let (app, _api) = test_app().await;
    let response = post_json(
        &app,
        POSTS_ROUTE,
        serde_json::json!([
            { "id": 1, "tags": ["spiral"], "score": 3 },
            { "id": 2, "tags": ["pendulum"] },
            { "id": 3, "tags": ["spiral", "trigger"] },
            { "id": 4, "tags": ["pendulum", "trigger"] }
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let stored: PostsStored = body_json(response).await;
    assert_eq!(stored.stored, 4);

    fetch(&app, "/vote?up=true&id=1").await;
    fetch(&app, "/vote?up=false&id=2").await;
    fetch(&app, "/save").await;

    let best: Vec<RatedPost> = body_json(fetch(&app, &post_list_path(BEST_ROUTE, 5)).await).await;
    let ids: Vec<PostId> = best.iter().map(|rated| rated.post.id).collect();
    assert_eq!(ids, vec![PostId(3), PostId(4)]);
    assert!(best[0].rating > best[1].rating);

    let hot: Vec<RatedPost> = body_json(fetch(&app, HOT_ROUTE).await).await;
    assert_eq!(hot.len(), 2);

    let rated: RatedPost = body_json(fetch(&app, &rating_path(PostId(1))).await).await;
    assert_eq!(rated.post.tags, vec!["spiral"]);
    assert!(rated.rating.is_some());

    let random: RatedPost = body_json(fetch(&app, RANDOM_ROUTE).await).await;
    assert!([PostId(3), PostId(4)].contains(&random.post.id));
}

#[tokio::test]
async fn rating_of_unknown_post_is_not_found() {
    let (app, _api) = test_app().await;
    let response = fetch(&app, &rating_path(PostId(77))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = fetch(&app, RANDOM_ROUTE).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let best: Vec<RatedPost> = body_json(fetch(&app, BEST_ROUTE).await).await;
    assert!(best.is_empty());
}
