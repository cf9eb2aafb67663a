//! End-to-end request handling over a real socket, with the pool doubled.

mod common;

use std::fs;
use std::os::fd::OwnedFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use helperd::secret::{SharedSecret, SECRET_SIZE};
use helperd::server::Server;
use helperd_core::pool::ApplicationPool;

use common::{document_root, envelope, exchange, ScriptedPool};

const PASSWORD: [u8; SECRET_SIZE] = [b'p'; SECRET_SIZE];

struct RunningServer {
    socket_path: std::path::PathBuf,
    _admin_writer: OwnedFd,
    _task: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl RunningServer {
    async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).await.unwrap()
    }
}

/// Starts a server over the pool double; dropping the admin writer at the
/// end of the test shuts it down.
fn start_server(pool: Arc<dyn ApplicationPool>) -> RunningServer {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::bind(dir.path(), SharedSecret::new(PASSWORD), pool, 1).unwrap();
    let socket_path = server.socket_path().to_path_buf();

    let (admin_reader, admin_writer) = nix::unistd::pipe().unwrap();
    let admin_channel = pipe::Receiver::from_owned_fd(admin_reader).unwrap();

    let task = tokio::spawn(async move {
        server.run(admin_channel).await.unwrap();
    });

    RunningServer {
        socket_path,
        _admin_writer: admin_writer,
        _task: task,
        _dir: dir,
    }
}

#[tokio::test]
async fn happy_path_rewrites_the_response_line() {
    let pool = Arc::new(ScriptedPool::replying(
        b"Status: 200 OK\r\nContent-Type: text/plain\r\n\r\nok",
    ));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("CONTENT_LENGTH", "5"),
        ("REQUEST_METHOD", "POST"),
    ]);

    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, &headers, b"hello").await;

    assert_eq!(
        response,
        b"HTTP/1.1 200 OK\r\nStatus: 200 OK\r\nContent-Type: text/plain\r\n\r\nok"
    );
    assert_eq!(pool.leases.load(Ordering::SeqCst), 1);
    assert_eq!(pool.request.body.lock().unwrap().as_slice(), b"hello");
    assert!(pool.request.writer_down.load(Ordering::SeqCst));

    // The raw header block reached the backend byte-for-byte.
    let forwarded = pool.request.headers.lock().unwrap().clone();
    let block_start = headers.iter().position(|b| *b == b':').unwrap() + 1;
    assert_eq!(forwarded.as_slice(), &headers[block_start..headers.len() - 1]);
}

#[tokio::test]
async fn pool_options_come_from_the_recognised_headers() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("PASSENGER_USE_GLOBAL_QUEUE", "true"),
        ("PASSENGER_ENVIRONMENT", "production"),
        ("PASSENGER_SPAWN_METHOD", "smart"),
    ]);

    let mut client = server.connect().await;
    exchange(&mut client, &PASSWORD, &headers, b"").await;

    let options = pool.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.app_root, fs::canonicalize(dir.path().join("app")).unwrap());
    assert!(options.use_global_queue);
    assert_eq!(options.environment, "production");
    assert_eq!(options.spawn_method, "smart");
}

#[tokio::test]
async fn bad_password_is_rejected_before_the_pool() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\nnever"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let mut client = server.connect().await;
    let response = exchange(&mut client, &[0u8; SECRET_SIZE], b"", b"").await;
    assert!(response.is_empty());
    assert_eq!(pool.leases.load(Ordering::SeqCst), 0);

    // The worker went back to accepting: a correct request still works.
    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]);
    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, &headers, b"").await;
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert_eq!(pool.leases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn short_password_is_rejected() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let mut client = server.connect().await;
    client.write_all(&PASSWORD[..10]).await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response)
        .await
        .unwrap();
    assert!(response.is_empty());
    assert_eq!(pool.leases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_document_root_drops_the_connection() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let headers = envelope(&[("REQUEST_METHOD", "GET")]);
    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, &headers, b"").await;

    assert!(response.is_empty());
    assert_eq!(pool.leases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_header_block_drops_the_connection() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, b"not-a-length:", b"").await;

    assert!(response.is_empty());
    assert_eq!(pool.leases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn spawn_failure_becomes_a_500_response() {
    let pool = Arc::new(ScriptedPool::failing("bundler not found", None));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]);

    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, &headers, b"").await;

    let expected = b"HTTP/1.1 500 Internal Server Error\r\n\
          Status: 500 Internal Server Error\r\n\
          Connection: close\r\n\
          Content-Type: text/html; charset=utf-8\r\n\
          Content-Length: 17\r\n\
          \r\n\
          bundler not found";
    assert_eq!(response, expected);
}

#[tokio::test]
async fn spawn_failure_uses_the_error_page_when_present() {
    let pool = Arc::new(ScriptedPool::failing("boom", Some("<h1>broken</h1>")));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]);

    let mut client = server.connect().await;
    let response = exchange(&mut client, &PASSWORD, &headers, b"").await;
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(response.contains("Content-Length: 15\r\n"));
    assert!(response.ends_with("<h1>broken</h1>"));
}

#[tokio::test]
async fn large_body_arrives_in_order() {
    let pool = Arc::new(ScriptedPool::replying(b"Status: 200 OK\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let body: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 251) as u8).collect();
    let headers = envelope(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("CONTENT_LENGTH", &body.len().to_string()),
    ]);

    let mut client = server.connect().await;
    client.write_all(&PASSWORD).await.unwrap();
    client.write_all(&headers).await.unwrap();
    for chunk in body.chunks(4096) {
        client.write_all(chunk).await.unwrap();
    }
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response)
        .await
        .unwrap();

    assert_eq!(pool.request.body.lock().unwrap().len(), body.len());
    assert_eq!(pool.request.body.lock().unwrap().as_slice(), body.as_slice());
}

#[tokio::test]
async fn body_forwarding_stops_at_the_client_half_close() {
    let pool = Arc::new(ScriptedPool::replying(b"\r\n\r\n"));
    let server = start_server(Arc::clone(&pool) as Arc<dyn ApplicationPool>);

    let dir = tempfile::tempdir().unwrap();
    let doc_root = document_root(&dir);
    let headers = envelope(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("CONTENT_LENGTH", "1000000"),
    ]);

    let mut client = server.connect().await;
    let _response = exchange(&mut client, &PASSWORD, &headers, b"only this much").await;

    assert_eq!(
        pool.request.body.lock().unwrap().as_slice(),
        b"only this much"
    );
    assert!(pool.request.writer_down.load(Ordering::SeqCst));
}
