mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{Recorder, ALICE};
use ledger_gateway::backend::{BackendResolver, HandlePool, Scope};
use ledger_gateway::config::PoolConfig;

fn recording_pool(recorder: &Arc<Recorder>) -> Arc<HandlePool> {
    let resolver = BackendResolver::load(
        &common::recording_loader(recorder),
        &common::ledger("recorder", json!({}), json!({})),
    )
    .expect("recorder plugin must load");
    HandlePool::new(Arc::new(resolver), &PoolConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_handle_is_checked_out_twice() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    let pool = recording_pool(&recorder);
    let active: Arc<Mutex<HashSet<u64>>> = Arc::default();

    let tasks = (0..64).map(|i| {
        let pool = pool.clone();
        let active = active.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                let repo = pool.borrow(format!("user{}@example.com", i), "coa1").await.unwrap();
                assert!(
                    active.lock().unwrap().insert(repo.serial()),
                    "handle #{} issued to two requests",
                    repo.serial()
                );
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(repo.scope().user, format!("user{}@example.com", i));
                active.lock().unwrap().remove(&repo.serial());
            }
        })
    });

    for result in join_all(tasks).await {
        result?;
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.borrowed, 640);
    assert!(stats.constructed >= 1 && stats.constructed <= 64, "constructed {}", stats.constructed);
    assert_eq!(stats.constructed as usize, recorder.constructions.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_reuse_handles() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    recorder.op_delay_ms.store(20, Ordering::SeqCst);
    let app = common::spawn_recording_app(&recorder).await?;
    let n = 16;

    let requests = (0..n).map(|i| {
        app.client
            .get(app.url(&format!("/coa{}/transactions/t{}", i, i)))
            .bearer_auth(common::token(ALICE))
            .send()
    });
    for res in join_all(requests).await {
        assert_eq!(res?.status(), StatusCode::OK);
    }

    let constructed = app.pool.stats().constructed;
    assert!(constructed >= 1 && constructed <= n, "constructed {}", constructed);

    // every call saw the chart from its own path
    let mut charts: Vec<String> = recorder.calls().into_iter().map(|c| c.scope.coa).collect();
    charts.sort();
    let mut expected: Vec<String> = (0..n).map(|i| format!("coa{}", i)).collect();
    expected.sort();
    assert_eq!(charts, expected);

    // sequential follow-ups are served from the free list
    for _ in 0..4 {
        app.client
            .get(app.url("/coa1/transactions/t1"))
            .bearer_auth(common::token(ALICE))
            .send()
            .await?;
    }
    assert_eq!(app.pool.stats().constructed, constructed);
    Ok(())
}

#[tokio::test]
async fn rebind_replaces_previous_scope() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    let app = common::spawn_recording_app(&recorder).await?;

    for (user, coa) in [(ALICE, "coa1"), ("bob@example.com", "coa2")] {
        let res = app
            .client
            .delete(app.url(&format!("/{}/transactions/t1", coa)))
            .bearer_auth(common::token(user))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
    }

    assert_eq!(app.pool.stats().constructed, 1);
    let scopes: Vec<Scope> = recorder.calls().into_iter().map(|c| c.scope).collect();
    assert_eq!(scopes, vec![Scope::new(ALICE, "coa1"), Scope::new("bob@example.com", "coa2")]);
    Ok(())
}

#[tokio::test]
async fn failed_operation_still_returns_handle() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    recorder.fail_ops.store(true, Ordering::SeqCst);
    let app = common::spawn_recording_app(&recorder).await?;

    let res = app
        .client
        .post(app.url("/coa1/transactions"))
        .bearer_auth(common::token(ALICE))
        .json(&json!([{"id": "t1", "amount": 100}]))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = res.json::<Value>().await?;
    assert_eq!(body["code"], "OPERATION_FAILED");
    assert!(body.get("id").is_none());

    let stats = app.pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 1);

    recorder.fail_ops.store(false, Ordering::SeqCst);
    let res = app
        .client
        .get(app.url("/coa1/transactions/t1"))
        .bearer_auth(common::token(ALICE))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.pool.stats().constructed, 1);
    Ok(())
}

#[tokio::test]
async fn construction_failure_fails_only_that_request() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    recorder.fail_construction.store(true, Ordering::SeqCst);
    let app = common::spawn_recording_app(&recorder).await?;

    let res = app
        .client
        .get(app.url("/coa1/transactions/t1"))
        .bearer_auth(common::token(ALICE))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.json::<Value>().await?["code"], "BACKEND_UNAVAILABLE");
    assert_eq!(app.pool.stats().borrowed, 0);

    recorder.fail_construction.store(false, Ordering::SeqCst);
    let res = app
        .client
        .get(app.url("/coa1/transactions/t1"))
        .bearer_auth(common::token(ALICE))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn abandoned_request_releases_handle() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    recorder.op_delay_ms.store(500, Ordering::SeqCst);
    let app = common::spawn_recording_app(&recorder).await?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()?;
    let res = client
        .get(app.url("/coa1/transactions/t1"))
        .bearer_auth(common::token(ALICE))
        .send()
        .await;
    assert!(res.is_err(), "client should give up before the backend answers");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app.pool.stats().in_use > 0 {
        assert!(tokio::time::Instant::now() < deadline, "handle leaked after disconnect");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(app.pool.stats().idle, 1);
    Ok(())
}
