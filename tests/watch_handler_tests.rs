//! # Watch Handler Tests
//!
//! Feeds watch events to the handler, with finalizer patches served by a
//! fake Kubernetes API on a random local port.
//!
//! These tests verify:
//! - A slow teardown does not hold up events for other resources
//! - A released resource is torn down once
//! - A failed finalizer release is retried on the next event

mod common;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::patch;
use axum::{Json, Router};
use common::*;
use kube::Api;
use kube_runtime::watcher::Event;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use vault_secrets_controller::constants::FINALIZER;
use vault_secrets_controller::prelude::*;
use vault_secrets_controller::runtime::watch_loop::WatchEventHandler;

fn resource_json(name: &str, deleting: bool, finalizers: &[&str]) -> Value {
    let mut metadata = json!({
        "name": name,
        "namespace": "apps",
        "uid": format!("uid-{name}"),
        "generation": 1,
        "finalizers": finalizers,
    });
    if deleting {
        metadata["deletionTimestamp"] = json!("2026-10-18T00:00:00Z");
    }
    json!({
        "apiVersion": "vault-secrets.octopilot.io/v1beta1",
        "kind": "VaultSecret",
        "metadata": metadata,
        "spec": snapshot(name, kv_source(), true).spec,
    })
}

fn resource(name: &str, deleting: bool) -> VaultSecret {
    serde_json::from_value(resource_json(name, deleting, &[FINALIZER])).unwrap()
}

async fn patch_resource(Path((_namespace, name)): Path<(String, String)>) -> Response {
    match name.as_str() {
        "slow" => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        "conflicted" => (
            StatusCode::CONFLICT,
            Json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "the object has been modified",
                "reason": "Conflict",
                "code": 409
            })),
        )
            .into_response(),
        _ => Json(resource_json(&name, true, &[])).into_response(),
    }
}

async fn start_fake_api_server() -> String {
    let app = Router::new().route(
        "/apis/vault-secrets.octopilot.io/v1beta1/namespaces/{namespace}/vaultsecrets/{name}",
        patch(patch_resource),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn handler_for(h: &Harness) -> (WatchEventHandler, Arc<SyncScheduler>) {
    init_rustls();
    let base = start_fake_api_server().await;
    let client = kube::Client::try_from(kube::Config::new(base.parse().unwrap())).unwrap();
    let scheduler = Arc::new(SyncScheduler::new(Arc::clone(&h.engine), 4));
    let handler = WatchEventHandler::new(Api::all(client), Arc::clone(&scheduler));
    (handler, scheduler)
}

#[tokio::test]
async fn test_slow_teardown_does_not_block_other_resources() {
    let h = Harness::new();
    h.backend.push_fetch(Ok(static_record(t0(), "k1")));
    let (mut handler, scheduler) = handler_for(&h).await;

    tokio::time::timeout(
        Duration::from_secs(5),
        handler.handle(Event::Apply(resource("slow", true))),
    )
    .await
    .expect("teardown must run outside the event handler");
    assert_eq!(handler.teardowns_in_flight(), 1);

    tokio::time::timeout(
        Duration::from_secs(5),
        handler.handle(Event::Apply(resource("web", false))),
    )
    .await
    .expect("live resource must be applied while a teardown is running");
    assert!(wait_until(|| h.store.secret("apps", "web-secret").is_some()).await);
    assert_eq!(scheduler.keys().await, vec![SpecKey::new("apps", "web")]);

    // Further updates for the resource being torn down start nothing new
    handler.handle(Event::Apply(resource("slow", true))).await;
    assert_eq!(handler.teardowns_in_flight(), 1);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_released_resource_is_torn_down_once() {
    let h = Harness::new();
    let (mut handler, _scheduler) = handler_for(&h).await;
    let deleting = resource("gone", true);

    handler.handle(Event::Apply(deleting.clone())).await;
    assert!(handler.join_teardown().await);
    assert_eq!(handler.teardowns_in_flight(), 0);
    assert_eq!(
        h.reporter.last_status().unwrap().phase,
        SyncPhase::Terminated
    );

    h.reporter.clear();
    handler.handle(Event::Apply(deleting.clone())).await;
    assert_eq!(handler.teardowns_in_flight(), 0);
    assert!(h.reporter.last_status().is_none());

    handler.handle(Event::Delete(deleting)).await;
    assert!(!handler.join_teardown().await);
}

#[tokio::test]
async fn test_failed_finalizer_release_is_retried() {
    let h = Harness::new();
    let (mut handler, _scheduler) = handler_for(&h).await;
    let deleting = resource("conflicted", true);

    handler.handle(Event::Apply(deleting.clone())).await;
    assert!(handler.join_teardown().await);

    handler.handle(Event::Apply(deleting)).await;
    assert_eq!(handler.teardowns_in_flight(), 1);
    assert!(handler.join_teardown().await);
}
