//! End-to-end tests of the worker protocol over in-memory streams.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use nix_daemon_relay::config::{
    DAEMON_VERSION, PROTOCOL_VERSION, STDERR_LAST, WORKER_MAGIC_1, WORKER_MAGIC_2,
};
use nix_daemon_relay::core::narinfo::PathMetadataRecord;
use nix_daemon_relay::core::wire;
use nix_daemon_relay::error::{RelayError, Result};
use nix_daemon_relay::protocol::{run_worker, WorkerOp};
use nix_daemon_relay::store::{MemoryPathInfoStore, PathInfoStore};

/// Builds the client side of a conversation.
struct Client {
    buf: BytesMut,
}

impl Client {
    fn new() -> Self {
        let mut buf = BytesMut::new();
        wire::put_u64(&mut buf, WORKER_MAGIC_1);
        wire::put_u64(&mut buf, PROTOCOL_VERSION);
        wire::put_u64(&mut buf, 0);
        wire::put_u64(&mut buf, 0);
        Self { buf }
    }

    fn op(mut self, op: WorkerOp) -> Self {
        wire::put_u64(&mut self.buf, op.code());
        self
    }

    fn raw(mut self, value: u64) -> Self {
        wire::put_u64(&mut self.buf, value);
        self
    }

    fn string(mut self, value: &str) -> Self {
        wire::put_bytes(&mut self.buf, value.as_bytes());
        self
    }

    fn strings(mut self, values: &[&str]) -> Self {
        wire::put_strings(&mut self.buf, values);
        self
    }

    fn boolean(mut self, value: bool) -> Self {
        wire::put_bool(&mut self.buf, value);
        self
    }

    fn chunk(mut self, payload: &[u8]) -> Self {
        self.buf.put_u64_le(payload.len() as u64);
        self.buf.put_slice(payload);
        self
    }
}

/// Reads the worker's replies.
struct Replies<'a> {
    rest: &'a [u8],
}

impl<'a> Replies<'a> {
    fn after_handshake(out: &'a [u8]) -> Self {
        let mut replies = Replies { rest: out };
        assert_eq!(replies.u64(), WORKER_MAGIC_2);
        assert_eq!(replies.u64(), PROTOCOL_VERSION);
        assert_eq!(replies.string(), DAEMON_VERSION);
        assert_eq!(replies.u64(), STDERR_LAST);
        replies
    }

    fn u64(&mut self) -> u64 {
        let (head, tail) = self.rest.split_at(8);
        self.rest = tail;
        u64::from_le_bytes(head.try_into().unwrap())
    }

    fn string(&mut self) -> String {
        let len = self.u64();
        let padded = len as usize + wire::padding_len(len);
        let (head, tail) = self.rest.split_at(padded);
        self.rest = tail;
        String::from_utf8(head[..len as usize].to_vec()).unwrap()
    }

    fn strings(&mut self) -> Vec<String> {
        let count = self.u64();
        (0..count).map(|_| self.string()).collect()
    }

    fn stderr_last(&mut self) {
        assert_eq!(self.u64(), STDERR_LAST);
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }
}

fn empty_store() -> Arc<dyn PathInfoStore> {
    Arc::new(MemoryPathInfoStore::new())
}

async fn run(client: Client, store: Arc<dyn PathInfoStore>) -> (Result<()>, Vec<u8>) {
    let mut out = Vec::new();
    let result = run_worker(&client.buf[..], &mut out, store).await;
    (result, out)
}

#[tokio::test]
async fn handshake_then_clean_end() {
    let (result, out) = run(Client::new(), empty_store()).await;
    result.unwrap();
    assert!(Replies::after_handshake(&out).is_empty());
}

#[tokio::test]
async fn wrong_magic_gets_no_reply() {
    let mut input = BytesMut::new();
    wire::put_u64(&mut input, WORKER_MAGIC_2);
    let mut out = Vec::new();

    let err = run_worker(&input[..], &mut out, empty_store())
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::MagicMismatch { .. }));
    assert!(out.is_empty());
}

#[tokio::test]
async fn stubbed_operations_answer_fixed_values() {
    let client = Client::new()
        .op(WorkerOp::IsValidPath)
        .string("/nix/store/abc")
        .op(WorkerOp::QueryValidPaths)
        .strings(&["/nix/store/a", "/nix/store/b"])
        .boolean(true)
        .op(WorkerOp::AddTempRoot)
        .string("/nix/store/abc")
        .op(WorkerOp::RegisterDrvOutput)
        .string(r#"{"id":"sha256:00!out"}"#);

    let (result, out) = run(client, empty_store()).await;
    result.unwrap();

    let mut replies = Replies::after_handshake(&out);
    replies.stderr_last();
    assert_eq!(replies.u64(), 1, "IsValidPath");
    replies.stderr_last();
    assert!(replies.strings().is_empty(), "QueryValidPaths");
    replies.stderr_last();
    assert_eq!(replies.u64(), 1, "AddTempRoot");
    replies.stderr_last();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn query_missing_reports_targets_unknown() {
    let client = Client::new().op(WorkerOp::QueryMissing).strings(&["/a", "/b"]);

    let (result, out) = run(client, empty_store()).await;
    result.unwrap();

    let mut replies = Replies::after_handshake(&out);
    replies.stderr_last();
    assert!(replies.strings().is_empty(), "willBuild");
    assert!(replies.strings().is_empty(), "willSubstitute");
    assert_eq!(replies.strings(), vec!["/a", "/b"], "unknown");
    assert_eq!(replies.u64(), 100, "downloadSize");
    assert_eq!(replies.u64(), 100, "narSize");
    replies.stderr_last();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn query_path_info_answers_true_either_way() {
    let mut store = MemoryPathInfoStore::new();
    store.insert(PathMetadataRecord {
        out_path: "/nix/store/known".into(),
        nar_hash: "sha256:00".into(),
        nar_size: 8,
        ..Default::default()
    });
    let client = Client::new()
        .op(WorkerOp::QueryPathInfo)
        .string("/nix/store/known")
        .op(WorkerOp::QueryPathInfo)
        .string("/nix/store/unknown");

    let (result, out) = run(client, Arc::new(store)).await;
    result.unwrap();

    let mut replies = Replies::after_handshake(&out);
    for _ in 0..2 {
        replies.stderr_last();
        assert_eq!(replies.u64(), 1);
    }
    assert!(replies.is_empty());
}

struct FailingStore;

#[async_trait]
impl PathInfoStore for FailingStore {
    async fn query_path_info(&self, _path: &str) -> Result<Option<PathMetadataRecord>> {
        Err(RelayError::Lookup("connection refused".into()))
    }
}

#[tokio::test]
async fn lookup_failure_ends_the_session() {
    let client = Client::new()
        .op(WorkerOp::QueryPathInfo)
        .string("/nix/store/x")
        .op(WorkerOp::IsValidPath)
        .string("/nix/store/x");

    let (result, out) = run(client, Arc::new(FailingStore)).await;

    assert!(matches!(result, Err(RelayError::Lookup(_))));
    // Nothing after the handshake: the failed operation wrote nothing and the
    // following one never ran.
    assert!(Replies::after_handshake(&out).is_empty());
}

#[tokio::test]
async fn add_multiple_to_store_with_no_records() {
    let mut count = BytesMut::new();
    wire::put_u64(&mut count, 0);
    let client = Client::new()
        .op(WorkerOp::AddMultipleToStore)
        .boolean(false)
        .boolean(true)
        .chunk(&count)
        .raw(0);

    let (result, out) = run(client, empty_store()).await;
    result.unwrap();

    let mut replies = Replies::after_handshake(&out);
    replies.stderr_last();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn add_multiple_to_store_consumes_records() {
    let mut payload = BytesMut::new();
    wire::put_u64(&mut payload, 2);
    for (path, nar) in [("/nix/store/a-one", &b"nar-one"[..]), ("/nix/store/b-two", &b""[..])] {
        PathMetadataRecord {
            out_path: path.into(),
            nar_hash: "sha256:00".into(),
            nar_size: nar.len() as u64,
            ..Default::default()
        }
        .encode(&mut payload);
        payload.put_slice(nar);
    }
    let (first, second) = payload.split_at(payload.len() / 2);

    let client = Client::new()
        .op(WorkerOp::AddMultipleToStore)
        .boolean(false)
        .boolean(false)
        .chunk(first)
        .chunk(second)
        .raw(0)
        .op(WorkerOp::IsValidPath)
        .string("/nix/store/a-one");

    let (result, out) = run(client, empty_store()).await;
    result.unwrap();

    let mut replies = Replies::after_handshake(&out);
    replies.stderr_last();
    replies.stderr_last();
    assert_eq!(replies.u64(), 1);
    assert!(replies.is_empty());
}

#[tokio::test]
async fn add_multiple_to_store_rejects_nonzero_status() {
    let mut count = BytesMut::new();
    wire::put_u64(&mut count, 0);
    let client = Client::new()
        .op(WorkerOp::AddMultipleToStore)
        .boolean(false)
        .boolean(false)
        .chunk(&count)
        .raw(5)
        .op(WorkerOp::IsValidPath)
        .string("/nix/store/never");

    let (result, out) = run(client, empty_store()).await;

    assert!(matches!(result, Err(RelayError::InvalidStatus(5))));
    let mut replies = Replies::after_handshake(&out);
    replies.stderr_last();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn unimplemented_operation_is_named() {
    let client = Client::new().op(WorkerOp::AddToStore);
    let (result, out) = run(client, empty_store()).await;

    match result {
        Err(RelayError::UnknownOperation(name)) => assert_eq!(name, "AddToStore"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(Replies::after_handshake(&out).is_empty());
}

#[tokio::test]
async fn out_of_table_opcode_is_unknown() {
    let client = Client::new().raw(99);
    let (result, _) = run(client, empty_store()).await;

    match result {
        Err(RelayError::UnknownOperation(name)) => {
            assert_eq!(name, "Unknown WorkerOperation(99)")
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn truncated_operation_input_fails() {
    let mut client = Client::new().op(WorkerOp::IsValidPath);
    wire::put_u64(&mut client.buf, 40);
    client.buf.put_slice(b"/nix/store");

    let (result, out) = run(client, empty_store()).await;

    assert!(result.unwrap_err().is_eof());
    assert!(Replies::after_handshake(&out).is_empty());
}

#[tokio::test]
async fn partial_opcode_is_an_error() {
    let mut client = Client::new();
    client.buf.put_slice(&[44, 0, 0]);

    let (result, out) = run(client, empty_store()).await;

    assert!(result.unwrap_err().is_eof());
    assert!(Replies::after_handshake(&out).is_empty());
}

#[tokio::test]
async fn duplex_client_turns() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (client_io, worker_io) = tokio::io::duplex(4096);
    let (worker_read, worker_write) = tokio::io::split(worker_io);
    let worker = tokio::spawn(run_worker(worker_read, worker_write, empty_store()));

    let (mut rx, mut tx) = tokio::io::split(client_io);
    let mut hello = BytesMut::new();
    wire::put_u64(&mut hello, WORKER_MAGIC_1);
    tx.write_all(&hello).await.unwrap();
    assert_eq!(rx.read_u64_le().await.unwrap(), WORKER_MAGIC_2);
    assert_eq!(rx.read_u64_le().await.unwrap(), PROTOCOL_VERSION);

    let mut rest = BytesMut::new();
    wire::put_u64(&mut rest, PROTOCOL_VERSION);
    wire::put_u64(&mut rest, 0);
    wire::put_u64(&mut rest, 0);
    wire::put_u64(&mut rest, WorkerOp::AddTempRoot.code());
    wire::put_bytes(&mut rest, b"/nix/store/abc");
    tx.write_all(&rest).await.unwrap();

    assert_eq!(wire::read_string(&mut rx, 64).await.unwrap(), DAEMON_VERSION);
    assert_eq!(rx.read_u64_le().await.unwrap(), STDERR_LAST);
    assert_eq!(rx.read_u64_le().await.unwrap(), STDERR_LAST);
    assert_eq!(rx.read_u64_le().await.unwrap(), 1);

    tx.shutdown().await.unwrap();
    drop(tx);
    worker.await.unwrap().unwrap();
}
