use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ember::config::ServerConfig;
use ember::http::{self, request::RequestStatus, writer};
use ember::server::conn::{Connection, EventMask, HookStatus};
use ember::server::Server;

fn hello(event: EventMask, conn: &mut Connection) -> HookStatus {
    if event.contains(EventMask::READ) && http::request_status(conn) == RequestStatus::Done {
        let _ = writer::respond(conn, 200, "text/plain", b"hello");
        return if http::is_keepalive_request(conn) {
            HookStatus::Done
        } else {
            HookStatus::Close
        };
    }
    HookStatus::Ok
}

fn test_server() -> Arc<Server> {
    let cfg = ServerConfig {
        addr: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    };
    let server = Arc::new(Server::new(cfg));
    server.register_hook(http::http_handler);
    server.register_hook(hello);
    server
}

async fn wait_for_bind(server: &Server) -> SocketAddr {
    for _ in 0..200 {
        if let Some(addr) = server.local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not bind in time");
}

#[test]
fn test_start_thread_and_stop() {
    let server = test_server();
    let handle = server.start_thread();

    for _ in 0..200 {
        if server.local_addr().is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(server.local_addr().is_some());

    server.stop();
    handle.join().unwrap().unwrap();
}

#[tokio::test]
async fn test_request_round_trip() {
    let server = test_server();
    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };
    let addr = wait_for_bind(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 5\r\n"));
    assert!(response.ends_with("\r\n\r\nhello"));
    assert_eq!(server.stat("connections"), 1);
    assert_eq!(server.stat("requests"), 1);

    server.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keepalive_serves_sequential_requests() {
    let server = test_server();
    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };
    let addr = wait_for_bind(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = vec![0u8; 1024];

    for _ in 0..2 {
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: t\r\n\r\n")
            .await
            .unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        let response = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nhello"));
    }
    assert_eq!(server.stat("requests"), 2);

    server.stop();
    runner.await.unwrap().unwrap();
}
