//! Worker method table, NDJSON loop and the real worker binary.

use std::io::Cursor;
use std::sync::Arc;

use fsbridge::adapter::FsAdapter;
use fsbridge::pool::{PoolConfig, WorkerPool};
use fsbridge::provider::ProviderHandle;
use fsbridge::worker::protocol::{
    codes, encode_contents, methods, ReadResponse, ResponseEnvelope, StatResponse,
};
use fsbridge::worker::{Connection, ProcessSpawner, Worker, WorkerClient, WorkerError};
use serde_json::{json, Value};

const WORKER_EXE: &str = env!("CARGO_BIN_EXE_fsbridge-worker");

fn worker_on(handle: ProviderHandle) -> Worker {
    let mut worker = Worker::new();
    worker
        .handle(methods::SET_PROVIDER, json!({ "provider": handle }))
        .unwrap();
    worker
}

fn serve_lines(worker: &mut Worker, lines: &[Value]) -> Vec<ResponseEnvelope> {
    let input: String = lines.iter().map(|l| format!("{l}\n")).collect();
    let mut output = Vec::new();
    worker.serve(Cursor::new(input), &mut output).unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ============================================================================
// Method table
// ============================================================================

#[test]
fn test_calls_before_handshake_are_rejected() {
    let mut worker = Worker::new();
    for method in [
        methods::UNLINK,
        methods::STAT,
        methods::READDIR,
        methods::READ,
        methods::RENAME,
    ] {
        let err = worker
            .handle(method, json!({ "path": "a", "from": "a", "to": "b" }))
            .unwrap_err();
        assert_eq!(err.code, codes::PROVIDER_NOT_SET, "method {method}");
    }
    assert!(!worker.has_provider());
}

#[test]
fn test_full_method_table_on_local_provider() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = worker_on(ProviderHandle::local(dir.path()));

    let written = worker
        .handle(
            methods::WRITE,
            json!({ "path": "docs/a.txt", "contents": encode_contents(b"alpha") }),
        )
        .unwrap();
    assert_eq!(written, json!({ "written": true }));
    assert_eq!(
        std::fs::read(dir.path().join("docs/a.txt")).unwrap(),
        b"alpha"
    );

    let stat: StatResponse = serde_json::from_value(
        worker
            .handle(methods::STAT, json!({ "path": "docs/a.txt" }))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.atime, stat.mtime);
    assert_eq!(stat.mtime, stat.ctime);

    let read: ReadResponse = serde_json::from_value(
        worker
            .handle(methods::READ, json!({ "path": "docs/a.txt" }))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(read.contents, encode_contents(b"alpha"));

    let renamed = worker
        .handle(
            methods::RENAME,
            json!({ "from": "docs/a.txt", "to": "docs/b.txt" }),
        )
        .unwrap();
    assert_eq!(renamed["renamed"], true);

    let listing = worker
        .handle(methods::READDIR, json!({ "path": "docs" }))
        .unwrap();
    assert_eq!(listing[0]["path"], "docs/b.txt");
    assert_eq!(listing[0]["type"], "file");

    let deleted = worker
        .handle(methods::UNLINK, json!({ "path": "docs/b.txt" }))
        .unwrap();
    assert_eq!(deleted["deleted"], true);
    assert!(!dir.path().join("docs/b.txt").exists());
}

#[test]
fn test_readdir_honours_order_flags() {
    let mut worker = worker_on(ProviderHandle::memory("worker-test-order"));
    for name in ["m", "z", "a"] {
        worker
            .handle(
                methods::WRITE,
                json!({ "path": name, "contents": encode_contents(b"") }),
            )
            .unwrap();
    }

    let paths = |listing: Value| -> Vec<String> {
        listing
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap().to_string())
            .collect()
    };

    let asc = worker
        .handle(methods::READDIR, json!({ "path": "", "flags": "ascending" }))
        .unwrap();
    assert_eq!(paths(asc), vec!["a", "m", "z"]);

    let desc = worker
        .handle(methods::READDIR, json!({ "path": "", "flags": "descending" }))
        .unwrap();
    assert_eq!(paths(desc), vec!["z", "m", "a"]);
}

#[test]
fn test_error_codes() {
    let mut worker = worker_on(ProviderHandle::memory("worker-test-codes"));

    let unknown = worker.handle("chmod", json!({})).unwrap_err();
    assert_eq!(unknown.code, codes::METHOD_NOT_FOUND);

    let malformed = worker.handle(methods::STAT, json!({ "nope": 1 })).unwrap_err();
    assert_eq!(malformed.code, codes::INVALID_REQUEST);

    let bad_base64 = worker
        .handle(methods::WRITE, json!({ "path": "x", "contents": "%%%" }))
        .unwrap_err();
    assert_eq!(bad_base64.code, codes::INVALID_REQUEST);

    let missing = worker
        .handle(methods::READ, json!({ "path": "absent" }))
        .unwrap_err();
    assert_eq!(missing.code, codes::PROVIDER_ERROR);
}

// ============================================================================
// NDJSON loop
// ============================================================================

#[test]
fn test_serve_answers_each_line_in_order() {
    let mut worker = Worker::new();
    let responses = serve_lines(
        &mut worker,
        &[
            json!({ "id": "1", "method": "stat", "params": { "path": "a" } }),
            json!({
                "id": "2",
                "method": "setFlysystem",
                "params": { "provider": ProviderHandle::memory("worker-test-serve") }
            }),
            json!({ "id": "3", "method": "readdir", "params": { "path": "" } }),
            json!({ "id": "4", "params": {} }),
        ],
    );

    let ids: Vec<_> = responses.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);

    assert!(!responses[0].success);
    assert_eq!(
        responses[0].error.as_ref().unwrap().code,
        codes::PROVIDER_NOT_SET
    );
    assert!(responses[1].success);
    assert_eq!(responses[2].result, Some(json!([])));
    assert_eq!(
        responses[3].error.as_ref().unwrap().code,
        codes::INVALID_REQUEST
    );
}

#[test]
fn test_serve_skips_garbage_without_id() {
    let input = "not json\n\n{\"id\":\"ok\",\"method\":\"stat\",\"params\":{\"path\":\"a\"}}\n";
    let mut output = Vec::new();
    Worker::new()
        .serve(Cursor::new(input), &mut output)
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("\"id\":\"ok\""));
}

// ============================================================================
// Worker process
// ============================================================================

#[tokio::test]
async fn test_process_worker_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let client = WorkerClient::spawn(WORKER_EXE).await.unwrap();

    let before = client
        .call(methods::STAT, json!({ "path": "a.txt" }))
        .await
        .unwrap_err();
    assert!(matches!(before, WorkerError::ProviderNotSet(_)));

    client
        .call(
            methods::SET_PROVIDER,
            json!({ "provider": ProviderHandle::local(dir.path()) }),
        )
        .await
        .unwrap();

    let written: Value = client
        .request(
            methods::WRITE,
            json!({ "path": "a.txt", "contents": encode_contents(b"from a process") }),
        )
        .await
        .unwrap();
    assert_eq!(written["written"], true);
    assert_eq!(
        std::fs::read(dir.path().join("a.txt")).unwrap(),
        b"from a process"
    );
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_adapter_over_process_workers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

    let pool = WorkerPool::start(
        PoolConfig {
            min_size: 1,
            max_size: 2,
            ..PoolConfig::default()
        },
        Arc::new(ProcessSpawner::new(WORKER_EXE)),
        ProviderHandle::local(dir.path()),
    )
    .await
    .unwrap();
    let fs = FsAdapter::new(pool);

    let contents = fs
        .open("hello.txt", "r")
        .await
        .unwrap()
        .into_read()
        .unwrap()
        .contents()
        .await
        .unwrap();
    assert_eq!(&contents[..], b"hi");

    assert!(fs.rename("hello.txt", "bye.txt").await.unwrap());
    assert!(dir.path().join("bye.txt").exists());
    fs.shutdown();
}
