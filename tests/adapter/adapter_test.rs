//! End-to-end tests for the filesystem facade, using in-process workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fsbridge::adapter::{FileDescriptor, FsAdapter, FsError, OpenedFile};
use fsbridge::classify::{ClassifierChain, ClassifyError, MappedTypes, NodeKind};
use fsbridge::config::Settings;
use fsbridge::pool::{PoolConfig, WorkerPool};
use fsbridge::provider::ProviderHandle;
use fsbridge::worker::protocol::{methods, ListOrder, Payload};
use fsbridge::worker::{Connection, Spawner, ThreadConnection, WorkerError, WorkerResult};
use futures::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;

// ============================================================================
// Helpers
// ============================================================================

async fn memory_adapter(store: &str) -> FsAdapter {
    let toml = format!(
        r#"
[provider]
adapter = "memory"
name = "{store}"

[pool]
min_size = 1
max_size = 4

[worker]
mode = "thread"
"#
    );
    let settings = Settings::parse(&toml).unwrap();
    FsAdapter::connect(&settings).await.unwrap()
}

async fn put(fs: &FsAdapter, path: &str, contents: &[u8]) -> bool {
    let mut file = fs.open(path, "w").await.unwrap().into_write().unwrap();
    file.write_all(contents).await.unwrap();
    file.finish().await.unwrap()
}

async fn get(fs: &FsAdapter, path: &str) -> Result<Vec<u8>, FsError> {
    let file = fs.open(path, "r").await?.into_read().unwrap();
    Ok(file.contents().await?.to_vec())
}

/// Counts every call other than the provider handshake.
#[derive(Clone, Default)]
struct CountingSpawner {
    calls: Arc<AtomicUsize>,
}

struct CountingConnection {
    inner: ThreadConnection,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for CountingConnection {
    async fn call(&self, method: &str, params: Payload) -> WorkerResult<Payload> {
        if method != methods::SET_PROVIDER {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.call(method, params).await
    }
}

#[async_trait]
impl Spawner for CountingSpawner {
    async fn spawn(&self) -> WorkerResult<Box<dyn Connection>> {
        Ok(Box::new(CountingConnection {
            inner: ThreadConnection::new(),
            calls: self.calls.clone(),
        }))
    }
}

async fn counting_adapter(store: &str) -> (FsAdapter, Arc<AtomicUsize>) {
    let spawner = CountingSpawner::default();
    let calls = spawner.calls.clone();
    let pool = WorkerPool::start(
        PoolConfig {
            min_size: 1,
            max_size: 2,
            ..PoolConfig::default()
        },
        Arc::new(spawner),
        ProviderHandle::memory(store),
    )
    .await
    .unwrap();
    (FsAdapter::new(pool), calls)
}

// ============================================================================
// Read / write
// ============================================================================

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let fs = memory_adapter("adapter-round-trip").await;
    let contents: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    assert!(put(&fs, "bin/data.bin", &contents).await);
    assert_eq!(get(&fs, "bin/data.bin").await.unwrap(), contents);
}

#[tokio::test]
async fn test_write_in_several_chunks() {
    let fs = memory_adapter("adapter-chunks").await;

    let mut file = fs.open("log.txt", "w").await.unwrap().into_write().unwrap();
    file.write_all(b"one ").await.unwrap();
    file.write_all(b"two ").await.unwrap();
    file.write_all(b"three").await.unwrap();
    assert_eq!(file.buffered(), Some(13));
    file.shutdown().await.unwrap();
    assert_eq!(file.written(), Some(true));

    assert_eq!(get(&fs, "log.txt").await.unwrap(), b"one two three");
}

#[tokio::test]
async fn test_write_after_shutdown_fails() {
    let fs = memory_adapter("adapter-late-write").await;

    let mut file = fs.open("x", "w").await.unwrap().into_write().unwrap();
    file.shutdown().await.unwrap();
    assert!(file.write_all(b"late").await.is_err());
}

#[tokio::test]
async fn test_read_missing_file_is_provider_error() {
    let fs = memory_adapter("adapter-missing").await;

    let err = get(&fs, "nope.txt").await.unwrap_err();
    assert!(matches!(err, FsError::Worker(_)), "got {err:?}");
}

#[tokio::test]
async fn test_open_returns_distinct_descriptors() {
    let fs = memory_adapter("adapter-fds").await;
    put(&fs, "a", b"1").await;

    let first = fs.open("a", "r").await.unwrap();
    let second = fs.open("a", "w").await.unwrap();
    assert!(matches!(first, OpenedFile::Read(_)));
    assert!(matches!(second, OpenedFile::Write(_)));
    assert_ne!(first.fd(), second.fd());
}

#[tokio::test]
async fn test_open_with_invalid_flags_makes_no_call() {
    let (fs, calls) = counting_adapter("adapter-bad-flags").await;

    let err = fs.open("a.txt", "x").await.unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_ls_yields_file_and_directory() {
    let fs = memory_adapter("adapter-ls").await;
    put(&fs, "a.txt", b"hello").await;
    put(&fs, "b/inner.txt", b"nested").await;

    let mut nodes = fs.ls("").collect_nodes().await.unwrap();
    nodes.sort_by(|a, b| a.path.cmp(&b.path));

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].path, "a.txt");
    assert_eq!(nodes[0].kind, NodeKind::File);
    assert_eq!(nodes[0].metadata.as_ref().unwrap()["size"], 5);
    assert_eq!(nodes[1].path, "b");
    assert_eq!(nodes[1].kind, NodeKind::Directory);
}

#[tokio::test]
async fn test_ls_stream_ends_after_last_node() {
    let fs = memory_adapter("adapter-ls-end").await;
    for name in ["x1", "x2", "x3"] {
        put(&fs, name, b"-").await;
    }

    let mut stream = fs.ls("");
    let mut seen = 0;
    while let Some(node) = stream.next().await {
        assert!(node.unwrap().is_file());
        seen += 1;
    }
    assert_eq!(seen, 3);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_ls_empty_directory() {
    let fs = memory_adapter("adapter-ls-empty").await;
    assert!(fs.ls("").collect_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ls_classification_failure_ends_stream() {
    let fs = memory_adapter("adapter-ls-fail")
        .await
        .with_classifier(ClassifierChain::empty().with_rule(MappedTypes::new()));
    put(&fs, "a.txt", b"1").await;
    put(&fs, "b.txt", b"2").await;

    let mut stream = fs.ls("");
    let first = stream.next().await.unwrap();
    assert!(matches!(
        first,
        Err(FsError::Classify(ClassifyError::NoMatch { .. }))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_ls_on_local_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();

    let pool = WorkerPool::start(
        PoolConfig::default(),
        Arc::new(fsbridge::worker::ThreadSpawner),
        ProviderHandle::local(dir.path()),
    )
    .await
    .unwrap();
    let fs = FsAdapter::new(pool).with_list_order(ListOrder::Descending);

    let nodes = fs.ls("").collect_nodes().await.unwrap();
    let mut kinds: Vec<_> = nodes.iter().map(|n| (n.path.as_str(), n.kind)).collect();
    kinds.sort();
    assert_eq!(
        kinds,
        vec![("a.txt", NodeKind::File), ("b", NodeKind::Directory)]
    );
}

#[tokio::test]
async fn test_ls_missing_directory_ends_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::start(
        PoolConfig::default(),
        Arc::new(fsbridge::worker::ThreadSpawner),
        ProviderHandle::local(dir.path()),
    )
    .await
    .unwrap();
    let fs = FsAdapter::new(pool);

    let mut stream = fs.ls("missing");
    let first = stream.next().await.unwrap();
    assert!(matches!(
        first,
        Err(FsError::Worker(WorkerError::Provider(_)))
    ));
    assert!(stream.next().await.is_none());
}

#[test]
fn test_ls_and_read_run_inside_a_plain_runtime() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let fs = memory_adapter("adapter-plain-runtime").await;
        put(&fs, "r.txt", b"ok").await;
        assert_eq!(fs.ls("").collect_nodes().await.unwrap().len(), 1);
        assert_eq!(get(&fs, "r.txt").await.unwrap(), b"ok");
    });
}

// ============================================================================
// Stat / rename
// ============================================================================

#[tokio::test]
async fn test_stat_times_are_equal() {
    let fs = memory_adapter("adapter-stat").await;
    put(&fs, "s.txt", b"12345").await;

    let stat = fs.stat("s.txt").await.unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.atime, stat.mtime);
    assert_eq!(stat.mtime, stat.ctime);
}

#[tokio::test]
async fn test_rename_reports_provider_boolean() {
    let fs = memory_adapter("adapter-rename").await;
    put(&fs, "from.txt", b"move me").await;

    assert!(fs.rename("from.txt", "to.txt").await.unwrap());
    assert_eq!(get(&fs, "to.txt").await.unwrap(), b"move me");

    // Source is gone now; the provider declines without an error.
    assert!(!fs.rename("from.txt", "again.txt").await.unwrap());
}

// ============================================================================
// Local-only operations
// ============================================================================

#[tokio::test]
async fn test_unsupported_operations_make_no_calls() {
    let (fs, calls) = counting_adapter("adapter-unsupported").await;
    let fd = FileDescriptor::from(1);

    let results = vec![
        fs.mkdir("d", 0o755).await.map(|_| ()),
        fs.rmdir("d").await.map(|_| ()),
        fs.unlink("f").await.map(|_| ()),
        fs.chmod("f", 0o644).await.map(|_| ()),
        fs.chown("f", 0, 0).await.map(|_| ()),
        fs.touch("f", 0o644).await.map(|_| ()),
        fs.readlink("l").await.map(|_| ()),
        fs.symlink("a", "b").await.map(|_| ()),
        fs.read(fd, 10, 0).await.map(|_| ()),
        fs.write(fd, b"data", 4, 0).await.map(|_| ()),
    ];

    let names: Vec<_> = results
        .into_iter()
        .map(|r| match r {
            Err(FsError::NotSupported { operation }) => operation,
            other => panic!("expected NotSupported, got {other:?}"),
        })
        .collect();
    assert_eq!(
        names,
        vec![
            "mkdir", "rmdir", "unlink", "chmod", "chown", "touch", "readlink", "symlink", "read",
            "write"
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detect_type_and_close_are_local() {
    let (fs, calls) = counting_adapter("adapter-local-ops").await;

    let dir = fs.detect_type("photos/").await.unwrap();
    assert_eq!(dir.kind, NodeKind::Directory);

    let err = fs.detect_type("plain").await.unwrap_err();
    assert!(matches!(err, FsError::Classify(ClassifyError::NoMatch { .. })));

    fs.close(FileDescriptor::from(42)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_rejects_memory_store_across_processes() {
    let settings = Settings::parse(
        r#"
[provider]
adapter = "memory"
name = "adapter-per-process"

[pool]
max_size = 2
"#,
    )
    .unwrap();
    let err = FsAdapter::connect(&settings).await.unwrap_err();
    assert!(matches!(err, FsError::Config(_)));
}

#[tokio::test]
async fn test_raw_call_reaches_worker() {
    let (fs, calls) = counting_adapter("adapter-raw").await;
    put(&fs, "gone.txt", b"bye").await;

    let resp = fs
        .call(methods::UNLINK, json!({ "path": "gone.txt" }))
        .await
        .unwrap();
    assert_eq!(resp["deleted"], true);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
