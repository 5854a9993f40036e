use serde::Deserialize;

/// Server configuration.
///
/// Every field has a default so a config file only needs to state what it
/// changes. The dispatch core consults only `request_pipelining`; the
/// transport driver consults `timeout_secs`; everything else is wiring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, IPv4 or IPv6.
    pub addr: String,
    pub port: u16,
    pub backlog: u32,
    /// Read timeout in seconds. 0 means no timeout.
    pub timeout_secs: u64,
    /// TLS termination. `None` serves plain TCP.
    pub tls: Option<TlsConfig>,
    /// Whether to serve further requests on the same connection after a hook
    /// reports a request as done.
    pub request_pipelining: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 8888,
            backlog: 128,
            timeout_secs: 0,
            tls: None,
            request_pipelining: true,
        }
    }
}

impl ServerConfig {
    pub fn load_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Defaults with `EMBER_ADDR` / `EMBER_PORT` environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(addr) = std::env::var("EMBER_ADDR") {
            cfg.addr = addr;
        }
        if let Ok(port) = std::env::var("EMBER_PORT") {
            if let Ok(port) = port.parse() {
                cfg.port = port;
            }
        }
        cfg
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}
