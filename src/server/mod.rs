//! Server instance: hook registration, lifecycle and shared tables.

pub mod conn;
pub mod listener;

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::table::{ListTable, TableOptions};

use self::conn::{Connection, EventMask, Hook, HookStatus};

/// An embeddable asynchronous server.
///
/// Hooks are registered in order and shared read-only across every
/// connection; each accepted socket gets its own [`Connection`] driven by a
/// dedicated task. Registration is normally done before [`start`](Server::start),
/// but is safe from other threads at any time - connections accepted
/// afterwards see the updated chain.
pub struct Server {
    config: ServerConfig,
    hooks: RwLock<Vec<Hook>>,
    stats: Mutex<ListTable>,
    tls: Mutex<Option<tokio_rustls::TlsAcceptor>>,
    shutdown_tx: watch::Sender<bool>,
    bound: Mutex<Option<std::net::SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        debug!("created a server instance");
        Self {
            config,
            hooks: RwLock::new(Vec::new()),
            stats: Mutex::new(ListTable::new(TableOptions {
                unique: true,
                case_insensitive: false,
            })),
            tls: Mutex::new(None),
            shutdown_tx,
            bound: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a hook called for every connection event.
    pub fn register_hook(
        &self,
        cb: impl Fn(EventMask, &mut Connection) -> HookStatus + Send + Sync + 'static,
    ) {
        self.hooks.write().unwrap().push(Hook::new(None, cb));
    }

    /// Registers a hook that only runs once the connection's bound method
    /// matches `method`.
    pub fn register_hook_on_method(
        &self,
        method: &str,
        cb: impl Fn(EventMask, &mut Connection) -> HookStatus + Send + Sync + 'static,
    ) {
        self.hooks
            .write()
            .unwrap()
            .push(Hook::new(Some(method.to_string()), cb));
    }

    /// Attaches a prebuilt TLS configuration, overriding any certificate
    /// paths in the config. Must be set before the server starts accepting.
    pub fn set_tls_config(&self, config: Arc<rustls::ServerConfig>) {
        *self.tls.lock().unwrap() = Some(tokio_rustls::TlsAcceptor::from(config));
    }

    pub(crate) fn tls_acceptor(&self) -> anyhow::Result<Option<tokio_rustls::TlsAcceptor>> {
        if let Some(acceptor) = self.tls.lock().unwrap().clone() {
            return Ok(Some(acceptor));
        }
        match &self.config.tls {
            Some(tls) => Ok(Some(listener::acceptor_from_pem(
                &tls.cert_path,
                &tls.key_path,
            )?)),
            None => Ok(None),
        }
    }

    /// Runs the accept loop on the caller's runtime until [`stop`](Server::stop).
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        listener::run(Arc::clone(self)).await
    }

    /// Hosts the server on a dedicated thread with its own single-threaded
    /// runtime, leaving the caller free to continue elsewhere.
    pub fn start_thread(self: &Arc<Self>) -> std::thread::JoinHandle<anyhow::Result<()>> {
        let server = Arc::clone(self);
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(server.start())
        })
    }

    /// Notifies the event loop to begin an orderly stop. Safe to call from
    /// any thread.
    pub fn stop(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// The actually bound address, available once the listener is up. Useful
    /// when binding to port 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.bound.lock().unwrap()
    }

    pub(crate) fn set_bound_addr(&self, addr: std::net::SocketAddr) {
        *self.bound.lock().unwrap() = Some(addr);
    }

    /// Snapshot of the hook chain for a newly accepted connection.
    pub(crate) fn hook_snapshot(&self) -> Arc<Vec<Hook>> {
        Arc::new(self.hooks.read().unwrap().clone())
    }

    /// Reads one statistics counter.
    pub fn stat(&self, name: &str) -> u64 {
        self.stats
            .lock()
            .unwrap()
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub(crate) fn incr_stat(&self, name: &str) {
        self.add_stat(name, 1);
    }

    pub(crate) fn add_stat(&self, name: &str, n: u64) {
        let mut stats = self.stats.lock().unwrap();
        let next = stats.get(name).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + n;
        stats.put(name, &next.to_string());
    }
}
