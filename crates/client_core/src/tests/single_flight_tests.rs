use super::*;
use crate::test_support::{EventLog, GatedTransport};

fn logging_callbacks(log: &EventLog, name: &str) -> Callbacks {
    let start_log = log.clone();
    let success_log = log.clone();
    let failure_log = log.clone();
    let start_name = name.to_string();
    let success_name = name.to_string();
    let failure_name = name.to_string();
    Callbacks::new(
        move || start_log.push(format!("start:{start_name}")),
        move |response| success_log.push(format!("success:{success_name}:{}", response.body)),
        move |failure| {
            let status = failure
                .status()
                .map(|status| status.to_string())
                .unwrap_or_else(|| "transport".to_string());
            failure_log.push(format!("failure:{failure_name}:{status}"))
        },
    )
}

#[tokio::test]
async fn unknown_operation_is_rejected_without_network_call() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("x", "GET", "/x", logging_callbacks(&log, "x"));

    let err = caller.invoke("y").expect_err("unknown name");
    assert_eq!(err, InvokeError::UnknownOperation("y".into()));

    tokio::task::yield_now().await;
    assert!(handle.calls().is_empty());
    assert!(log.events().is_empty());
    assert!(!caller.is_busy());
}

#[tokio::test]
async fn second_invoke_while_in_flight_is_busy() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("save", "GET", "/save", logging_callbacks(&log, "save"));

    let in_flight = caller.invoke("save").expect("first call dispatched");
    assert_eq!(in_flight.operation(), "save");
    let err = caller.invoke("save").expect_err("second call rejected");
    assert_eq!(err, InvokeError::Busy("save".into()));
    assert_eq!(log.events(), vec!["start:save"]);

    handle.wait_for_calls(1).await;
    handle.ok("saved");
    let outcome = in_flight.finished().await.expect("completion");

    assert_eq!(outcome, CallOutcome::Succeeded { status: 200 });
    assert_eq!(log.events(), vec!["start:save", "success:save:saved"]);
    assert_eq!(handle.calls(), vec![HttpRequest::get("/save")]);
    assert!(!caller.is_busy());
}

#[tokio::test]
async fn on_start_runs_before_request_is_issued() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();

    let start_log = log.clone();
    let start_handle = handle.clone();
    caller.register(
        "save",
        "GET",
        "/save",
        Callbacks::new(
            move || start_log.push(format!("calls-at-start:{}", start_handle.calls().len())),
            |_| {},
            |_| {},
        ),
    );

    let in_flight = caller.invoke("save").expect("dispatched");
    assert_eq!(log.events(), vec!["calls-at-start:0"]);

    handle.wait_for_calls(1).await;
    handle.ok("");
    in_flight.finished().await.expect("completion");
}

#[tokio::test]
async fn non_success_status_reports_failure_and_frees_the_caller() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("save", "GET", "/save", logging_callbacks(&log, "save"));

    let in_flight = caller.invoke("save").expect("dispatched");
    handle.wait_for_calls(1).await;
    handle.status(500, "boom");
    let outcome = in_flight.finished().await.expect("completion");

    assert_eq!(outcome, CallOutcome::NonSuccessStatus { status: 500 });
    assert_eq!(log.events(), vec!["start:save", "failure:save:500"]);
    assert!(!caller.is_busy());

    let again = caller.invoke("save").expect("dispatched after failure");
    handle.wait_for_calls(2).await;
    handle.ok("second");
    assert!(again.finished().await.expect("completion").is_success());
    assert_eq!(
        log.events(),
        vec![
            "start:save",
            "failure:save:500",
            "start:save",
            "success:save:second"
        ]
    );
}

#[tokio::test]
async fn other_success_codes_count_as_failure() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("save", "GET", "/save", logging_callbacks(&log, "save"));

    let in_flight = caller.invoke("save").expect("dispatched");
    handle.wait_for_calls(1).await;
    handle.status(204, "");

    assert_eq!(
        in_flight.finished().await.expect("completion"),
        CallOutcome::NonSuccessStatus { status: 204 }
    );
    assert_eq!(log.events(), vec!["start:save", "failure:save:204"]);
}

#[tokio::test]
async fn transport_error_reports_failure() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("save", "GET", "/save", logging_callbacks(&log, "save"));

    let in_flight = caller.invoke("save").expect("dispatched");
    handle.wait_for_calls(1).await;
    handle.connection_refused();

    assert_eq!(
        in_flight.finished().await.expect("completion"),
        CallOutcome::TransportFailure
    );
    assert_eq!(log.events(), vec!["start:save", "failure:save:transport"]);
    assert!(!caller.is_busy());
}

#[tokio::test]
async fn busy_flag_is_shared_across_operation_names() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register("upvote", "GET", "/vote?up=true&id=1", logging_callbacks(&log, "upvote"));
    caller.register(
        "downvote",
        "GET",
        "/vote?up=false&id=1",
        logging_callbacks(&log, "downvote"),
    );

    let in_flight = caller.invoke("upvote").expect("dispatched");
    assert_eq!(
        caller.invoke("downvote").expect_err("shared guard"),
        InvokeError::Busy("downvote".into())
    );

    handle.wait_for_calls(1).await;
    handle.ok("");
    in_flight.finished().await.expect("completion");
    assert_eq!(log.events(), vec!["start:upvote", "success:upvote:"]);
    assert_eq!(handle.calls().len(), 1);
}

#[tokio::test]
async fn independent_instances_do_not_block_each_other() {
    let (vote_transport, vote_handle) = GatedTransport::new();
    let (save_transport, save_handle) = GatedTransport::new();
    let votes = SingleFlightCaller::new(vote_transport);
    let saves = SingleFlightCaller::new(save_transport);
    votes.register("upvote", "GET", "/vote?up=true&id=1", Callbacks::noop());
    saves.register("save", "GET", "/save", Callbacks::noop());

    let vote = votes.invoke("upvote").expect("vote dispatched");
    let save = saves.invoke("save").expect("save dispatched");
    assert!(votes.is_busy());
    assert!(saves.is_busy());

    save_handle.wait_for_calls(1).await;
    save_handle.ok("");
    save.finished().await.expect("save completion");
    assert!(votes.is_busy());
    assert!(!saves.is_busy());

    vote_handle.wait_for_calls(1).await;
    vote_handle.ok("");
    vote.finished().await.expect("vote completion");
    assert!(!votes.is_busy());
}

#[tokio::test]
async fn clones_share_the_same_instance() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let alias = caller.clone();
    caller.register("save", "GET", "/save", Callbacks::noop());

    assert!(alias.is_registered("save"));
    let in_flight = alias.invoke("save").expect("dispatched");
    assert_eq!(
        caller.invoke("save").expect_err("clone shares busy flag"),
        InvokeError::Busy("save".into())
    );

    handle.wait_for_calls(1).await;
    handle.ok("");
    in_flight.finished().await.expect("completion");
}

#[tokio::test]
async fn re_registering_overwrites_the_operation() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    caller.register("save", "GET", "/old-save", Callbacks::noop());
    caller.register("save", "POST", "/save", Callbacks::noop());
    assert_eq!(caller.operation_names(), vec!["save".to_string()]);

    let in_flight = caller.invoke("save").expect("dispatched");
    handle.wait_for_calls(1).await;
    handle.ok("");
    in_flight.finished().await.expect("completion");

    assert_eq!(handle.calls(), vec![HttpRequest::new("POST", "/save")]);
}

#[tokio::test]
async fn busy_is_cleared_before_the_success_callback_runs() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();

    let observer = caller.clone();
    let success_log = log.clone();
    caller.register(
        "save",
        "GET",
        "/save",
        Callbacks::new(
            || {},
            move |_| success_log.push(format!("busy-in-callback:{}", observer.is_busy())),
            |_| {},
        ),
    );

    let in_flight = caller.invoke("save").expect("dispatched");
    handle.wait_for_calls(1).await;
    handle.ok("");
    in_flight.finished().await.expect("completion");

    assert_eq!(log.events(), vec!["busy-in-callback:false"]);
}

#[tokio::test]
async fn dropping_the_handle_does_not_cancel_the_call() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = std::sync::Mutex::new(Some(done_tx));
    caller.register(
        "save",
        "GET",
        "/save",
        Callbacks::new(
            || {},
            move |response| {
                if let Some(tx) = done_tx.lock().expect("sender").take() {
                    let _ = tx.send(response.body);
                }
            },
            |_| {},
        ),
    );

    drop(caller.invoke("save").expect("dispatched"));
    handle.wait_for_calls(1).await;
    handle.ok("still delivered");

    assert_eq!(done_rx.await.expect("success callback"), "still delivered");
    assert!(!caller.is_busy());
}

#[tokio::test]
async fn panicking_on_start_releases_the_busy_flag() {
    let (transport, handle) = GatedTransport::new();
    let caller = SingleFlightCaller::new(transport);
    let log = EventLog::default();
    caller.register(
        "boom",
        "GET",
        "/boom",
        Callbacks::new(|| panic!("start hook failed"), |_| {}, |_| {}),
    );
    caller.register("other", "GET", "/other", logging_callbacks(&log, "other"));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| caller.invoke("boom")));
    assert!(result.is_err());
    assert!(!caller.is_busy());

    let in_flight = caller.invoke("other").expect("caller is usable again");
    handle.wait_for_calls(1).await;
    handle.ok("fine");
    let outcome = in_flight.finished().await.expect("completion");
    assert_eq!(outcome, CallOutcome::Succeeded { status: 200 });
    assert_eq!(handle.calls(), vec![HttpRequest::get("/other")]);
}
