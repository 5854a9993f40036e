use std::sync::Arc;

use ember::config::ServerConfig;
use ember::http::{self, request::RequestStatus, writer};
use ember::server::conn::{Connection, EventMask, HookStatus};
use ember::server::Server;

fn hello_handler(event: EventMask, conn: &mut Connection) -> HookStatus {
    if event.contains(EventMask::READ) && http::request_status(conn) == RequestStatus::Done {
        let _ = writer::respond(conn, 200, "text/html", b"Hello World");
        return if http::is_keepalive_request(conn) {
            HookStatus::Done
        } else {
            HookStatus::Close
        };
    }
    HookStatus::Ok
}

fn default_handler(event: EventMask, conn: &mut Connection) -> HookStatus {
    if event.contains(EventMask::READ) && http::request_status(conn) == RequestStatus::Done {
        let _ = writer::respond(conn, 501, "text/html", b"Not implemented");
        return HookStatus::Close;
    }
    HookStatus::Ok
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = ServerConfig::from_env();
    let server = Arc::new(Server::new(cfg));

    // The HTTP parser is also a hook; it goes first.
    server.register_hook(http::http_handler);
    server.register_hook_on_method("GET", hello_handler);
    server.register_hook(default_handler);

    tokio::select! {
        res = server.start() => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            server.stop();
        }
    }

    Ok(())
}
