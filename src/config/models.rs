//! Configuration data structures for gantry.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every
//! field has a default so that an empty file, or no file at all, yields a usable
//! server. The configuration is loaded once at startup and treated as read-only
//! afterwards; it is shared between the reactor and worker threads behind an `Arc`.
use serde::{Deserialize, Serialize};

/// Default identity reported in the `Server` header and startup logs.
pub const DEFAULT_IDENT: &str = "gantry.http";

/// A socket option applied to every accepted connection.
///
/// Serialized as `{ option = "tcp_nodelay", value = true }`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum SocketOption {
    /// `TCP_NODELAY`
    TcpNodelay(bool),
    /// `SO_KEEPALIVE`
    Keepalive(bool),
    /// `SO_RCVBUF` in bytes
    RecvBufferSize(usize),
    /// `SO_SNDBUF` in bytes
    SendBufferSize(usize),
    /// `SO_LINGER` in seconds
    LingerSecs(u64),
}

/// Markers copied into every request context.
///
/// `multithread` and `multiprocess` are independent switches; a single-process
/// thread-pool deployment would normally set `multiprocess = false`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironMarkers {
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
}

impl Default for EnvironMarkers {
    fn default() -> Self {
        Self {
            multithread: true,
            multiprocess: true,
            run_once: false,
        }
    }
}

/// Log output configuration used by the binary.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"gantry=debug"`
    pub level: String,
    /// JSON lines instead of pretty console output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind. An empty string binds every interface and makes the
    /// server identity fall back to the machine hostname.
    pub host: String,
    pub port: u16,
    /// Accept backlog passed to `listen(2)`
    pub backlog: i32,
    /// Maximum number of concurrently open connections
    pub connection_limit: usize,
    /// Worker threads; `0` services every request inline on the reactor thread
    pub threads: usize,
    pub socket_options: Vec<SocketOption>,
    /// Log transient `accept()` failures as warnings
    pub log_socket_errors: bool,
    pub verbose: bool,
    pub ident: String,
    /// Optional label appended to the identity, e.g. `gantry.http (wsgi)`
    pub sub_protocol: Option<String>,
    pub environ: EnvironMarkers,
    /// Bytes read from a socket per read call
    pub recv_bytes: usize,
    pub max_request_header_size: usize,
    pub max_request_body_size: usize,
    /// Upper bound on a single reactor wait, in milliseconds
    pub poll_interval_ms: u64,
    /// How long shutdown waits for busy workers
    pub shutdown_timeout_secs: u64,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// The identity string including the optional sub-protocol label.
    pub fn full_ident(&self) -> String {
        match self.sub_protocol.as_deref() {
            Some(label) if !label.is_empty() => format!("{} ({label})", self.ident),
            _ => self.ident.clone(),
        }
    }

    /// `host:port` as given, with an empty host rendered as `0.0.0.0`.
    pub fn bind_address(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            backlog: 1024,
            connection_limit: 100,
            threads: 4,
            socket_options: vec![SocketOption::TcpNodelay(true)],
            log_socket_errors: true,
            verbose: false,
            ident: DEFAULT_IDENT.to_string(),
            sub_protocol: None,
            environ: EnvironMarkers::default(),
            recv_bytes: 8192,
            max_request_header_size: 262_144,
            max_request_body_size: 16 * 1024 * 1024,
            poll_interval_ms: 1000,
            shutdown_timeout_secs: 5,
            logging: LoggingConfig::default(),
        }
    }
}
