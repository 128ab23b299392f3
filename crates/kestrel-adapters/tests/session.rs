//! Integration tests for the stateful session adapter.
//!
//! Each test spawns a small `sh` script as the session server and speaks
//! real line-delimited JSON-RPC to it over pipes.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        clippy::too_many_lines,
        reason = "Test allows"
    )
)]

use std::time::Duration;

use kestrel_adapters::SessionPool;
use kestrel_core::{CallTemplate, Error, ToolDescriptor};
use serde_json::Map;
use tokio::time::sleep;

fn session_descriptor(name: &str, script: &str) -> (ToolDescriptor, String, Vec<String>) {
    let descriptor = ToolDescriptor::new(
        name.to_owned(),
        CallTemplate::Session {
            program: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
        },
    );
    (
        descriptor,
        "sh".to_owned(),
        vec!["-c".to_owned(), script.to_owned()],
    )
}

#[tokio::test]
async fn test_session_keeps_state_between_calls() {
    let script = r#"read line
printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'
read line
count=0
while read line; do
  count=$((count+1))
  printf '{"jsonrpc":"2.0","id":%d,"result":{"count":%d}}\n' "$count" "$count"
done
"#;
    let (descriptor, program, args) = session_descriptor("counter", script);
    let pool = SessionPool::new();

    let first = pool
        .call(&descriptor, &program, &args, &Map::new())
        .await
        .unwrap();
    let second = pool
        .call(&descriptor, &program, &args, &Map::new())
        .await
        .unwrap();

    assert_eq!(first["count"], 1);
    assert_eq!(second["count"], 2, "one process must serve both calls");
}

#[tokio::test]
async fn test_concurrent_responses_route_by_request_id() {
    let script = r#"read line
printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'
read line
read line
read line
printf '{"jsonrpc":"2.0","id":2,"result":{"for_id":2}}\n'
printf '{"jsonrpc":"2.0","id":1,"result":{"for_id":1}}\n'
"#;
    let (descriptor, program, args) = session_descriptor("out_of_order", script);
    let pool = SessionPool::new();

    let arguments = Map::new();
    let (first, second) = tokio::join!(
        pool.call(&descriptor, &program, &args, &arguments),
        pool.call(&descriptor, &program, &args, &arguments),
    );

    let mut for_ids = vec![
        first.unwrap()["for_id"].as_u64().unwrap(),
        second.unwrap()["for_id"].as_u64().unwrap(),
    ];
    for_ids.sort_unstable();
    assert_eq!(for_ids, vec![1, 2], "each caller must get its own response");
}

#[tokio::test]
async fn test_dead_session_is_respawned_on_next_call() {
    let script = r#"read line
printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'
read line
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"pid":%d}}\n' "$$"
"#;
    let (descriptor, program, args) = session_descriptor("one_shot", script);
    let pool = SessionPool::new();

    let first = pool
        .call(&descriptor, &program, &args, &Map::new())
        .await
        .unwrap();
    // The script exits after one call; give its EOF time to reach the
    // reader task before calling again.
    sleep(Duration::from_millis(200)).await;
    let second = pool
        .call(&descriptor, &program, &args, &Map::new())
        .await
        .unwrap();

    let first_pid = first["pid"].as_u64().unwrap();
    let second_pid = second["pid"].as_u64().unwrap();
    assert_ne!(first_pid, second_pid, "second call must hit a new process");
}

#[tokio::test]
async fn test_rpc_error_surfaces_as_session_error() {
    let script = r#"read line
printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'
read line
read line
printf '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}\n'
"#;
    let (descriptor, program, args) = session_descriptor("erroring", script);
    let pool = SessionPool::new();

    let result = pool.call(&descriptor, &program, &args, &Map::new()).await;
    let error = result.unwrap_err();
    assert!(matches!(error, Error::Session(_)));
    assert!(
        error.to_string().contains("method not found"),
        "got: {error}"
    );
}
