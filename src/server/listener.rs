//! Accept loop and the per-connection byte driver.
//!
//! This is the only place that touches sockets. The driver shovels bytes
//! between the transport and the connection's buffers and turns socket
//! readiness into dispatch events; everything protocol-shaped happens in
//! hooks.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpSocket;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::server::conn::{Connection, EventMask};
use crate::server::Server;

pub(crate) async fn run(server: Arc<Server>) -> anyhow::Result<()> {
    let cfg = server.config().clone();
    let addr: SocketAddr = cfg.listen_addr().parse()?;
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()?
    } else {
        TcpSocket::new_v4()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(cfg.backlog)?;
    server.set_bound_addr(listener.local_addr()?);

    let acceptor = server.tls_acceptor()?;
    info!(
        "Listening on {}{}",
        addr,
        if acceptor.is_some() { " (TLS)" } else { "" }
    );

    let timeout = (cfg.timeout_secs > 0).then(|| Duration::from_secs(cfg.timeout_secs));
    let mut shutdown = server.subscribe_shutdown();

    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => res?,
            _ = shutdown.changed() => break,
        };
        debug!("accepted connection from {peer}");
        server.incr_stat("connections");

        let hooks = server.hook_snapshot();
        let pipelining = cfg.request_pipelining;
        let acceptor = acceptor.clone();
        let conn_shutdown = server.subscribe_shutdown();
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        let conn = Connection::new(hooks, pipelining);
                        drive(tls_stream, conn, &server, timeout, conn_shutdown).await
                    }
                    Err(e) => Err(e.into()),
                },
                None => {
                    let conn = Connection::new(hooks, pipelining);
                    drive(stream, conn, &server, timeout, conn_shutdown).await
                }
            };
            if let Err(e) = result {
                error!("connection error from {peer}: {e}");
            }
        });
    }

    info!("server closed");
    Ok(())
}

/// Builds a TLS acceptor from PEM-encoded certificate and key files.
pub fn acceptor_from_pem(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Drives one connection until teardown.
///
/// Reads append to the inbound buffer and dispatch `READ` repeatedly while
/// the engine keeps consuming, so pipelined requests already in the buffer
/// are served without waiting for more socket activity. A flush that empties
/// pending output dispatches `WRITE`, which is what lets a deferred Close
/// observe the drained buffer.
async fn drive<S>(
    mut stream: S,
    mut conn: Connection,
    server: &Server,
    timeout: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 4096];
    let mut counted = 0u64;

    // INIT hooks may already have queued output (greeting-style protocols).
    if flush(&mut stream, &mut conn).await? {
        conn.dispatch(EventMask::WRITE);
    }

    while !conn.is_finished() {
        let n = tokio::select! {
            res = read_some(&mut stream, &mut buf, timeout) => match res {
                Ok(Some(0)) => {
                    conn.close(EventMask::NONE);
                    break;
                }
                Ok(Some(n)) => n,
                Ok(None) => {
                    debug!("read timeout");
                    conn.close(EventMask::TIMEOUT);
                    break;
                }
                Err(e) => {
                    conn.close(EventMask::NONE);
                    return Err(e.into());
                }
            },
            _ = shutdown.changed() => {
                conn.close(EventMask::SHUTDOWN);
                break;
            }
        };

        conn.inbuf().write(&buf[..n]);
        loop {
            let before = conn.in_len();
            conn.dispatch(EventMask::READ);
            if conn.is_finished() || conn.in_len() == before {
                break;
            }
        }
        if conn.requests_served() > counted {
            server.add_stat("requests", conn.requests_served() - counted);
            counted = conn.requests_served();
        }

        if flush(&mut stream, &mut conn).await? {
            conn.dispatch(EventMask::WRITE);
        }
    }

    // Best effort: drain whatever teardown left in the outbound buffer.
    let _ = flush(&mut stream, &mut conn).await;
    let _ = stream.shutdown().await;
    Ok(())
}

async fn read_some<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> std::io::Result<Option<usize>> {
    match timeout {
        Some(dur) => match tokio::time::timeout(dur, stream.read(buf)).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read(buf).await.map(Some),
    }
}

async fn flush<S: AsyncWrite + Unpin>(
    stream: &mut S,
    conn: &mut Connection,
) -> std::io::Result<bool> {
    if conn.out_len() == 0 {
        return Ok(false);
    }
    let data = conn.outbuf().drain_all();
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(true)
}
