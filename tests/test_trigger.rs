mod common;

use axum::{extract::State, http::StatusCode, routing::post, Router};
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera::config::RedeployPolicy;
use tessera::entitlement::PlanStatus;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral port and return its base URL
async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Answers 404 for the first `not_found` hits, then `then`
async fn route_with(not_found: usize, then: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/webhook/eng-1/in",
            post(move |State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < not_found {
                    StatusCode::NOT_FOUND
                } else {
                    then
                }
            }),
        )
        .with_state(hits.clone());
    let base = spawn(router).await;
    (format!("{}/webhook/eng-1/in", base), hits)
}

#[tokio::test]
async fn test_retries_while_route_is_not_registered() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let (url, hits) = route_with(2, StatusCode::OK).await;

    let started = Instant::now();
    let result = h.orchestrator.test_trigger_url(&url, "wf-1", 3).await;

    assert!(result.success, "trigger failed: {:?}", result.error);
    let receipt = result.data.unwrap();
    assert_eq!(receipt.attempts, 3);
    assert_eq!(receipt.status, 200);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // linear backoff: 10ms then 20ms
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_other_statuses_are_terminal() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let (url, hits) = route_with(0, StatusCode::INTERNAL_SERVER_ERROR).await;

    let result = h.orchestrator.test_trigger_url(&url, "wf-1", 3).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("500"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gives_up_after_attempts() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let (url, hits) = route_with(10, StatusCode::OK).await;

    let result = h.orchestrator.test_trigger_url(&url, "wf-1", 2).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("404"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undeployed_workflow_has_nothing_to_trigger() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let created = h
        .orchestrator
        .create_workflow(&admin(), "Flow", webhook_spec())
        .await
        .data
        .unwrap();

    let result = h.orchestrator.test_trigger(&created.id, &admin()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("trigger URL"));
}
