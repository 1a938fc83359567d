//! Per-request context handed to the application.
use std::{fmt, io};

use crate::{
    config::EnvironMarkers,
    ports::task::{BodyStream, ProxyInfo, RequestMetadata, Task},
};

/// Log target used for lines written to [`ErrorSink`].
pub const APP_LOG_TARGET: &str = "gantry::app";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    Http,
    Https,
}

impl UrlScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlScheme::Http => "http",
            UrlScheme::Https => "https",
        }
    }

    /// `https` when the request metadata marks the transport as secure.
    pub fn from_metadata(metadata: &RequestMetadata) -> Self {
        let https = metadata
            .get("HTTPS")
            .map(|value| {
                ["on", "true", "1", "yes"]
                    .iter()
                    .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
            })
            .unwrap_or(false);
        let secure_port = metadata
            .get("SERVER_PORT_SECURE")
            .is_some_and(|value| value == "1");

        if https || secure_port {
            UrlScheme::Https
        } else {
            UrlScheme::Http
        }
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error stream for applications. Complete lines are logged at error level;
/// a trailing partial line is logged on flush or drop.
#[derive(Debug, Default)]
pub struct ErrorSink {
    pending: Vec<u8>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            tracing::error!(target: APP_LOG_TARGET, "{}", line);
        }
    }
}

impl io::Write for ErrorSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            Self::emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            Self::emit(&line);
        }
        Ok(())
    }
}

impl Drop for ErrorSink {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

/// Request variables plus the protocol markers every application sees.
pub struct Environ {
    /// CGI-style variables copied from the task
    pub metadata: RequestMetadata,
    /// Interface version, always `(1, 0)`
    pub version: (u8, u8),
    pub url_scheme: UrlScheme,
    pub errors: ErrorSink,
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    /// Request body, read lazily from the task
    pub input: BodyStream,
    /// Present only when the channel recovered a proxy scheme and host
    pub proxy: Option<ProxyInfo>,
}

impl Environ {
    pub fn from_task(task: &dyn Task, markers: &EnvironMarkers) -> Self {
        let metadata = task.request_metadata();
        let url_scheme = UrlScheme::from_metadata(&metadata);

        Self {
            metadata,
            version: (1, 0),
            url_scheme,
            errors: ErrorSink::new(),
            multithread: markers.multithread,
            multiprocess: markers.multiprocess,
            run_once: markers.run_once,
            input: task.body_stream(),
            proxy: task.proxy_info(),
        }
    }

    /// Look up a request variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn method(&self) -> &str {
        self.get("REQUEST_METHOD").unwrap_or("GET")
    }

    pub fn path_info(&self) -> &str {
        self.get("PATH_INFO").unwrap_or("")
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("metadata", &self.metadata)
            .field("version", &self.version)
            .field("url_scheme", &self.url_scheme)
            .field("multithread", &self.multithread)
            .field("multiprocess", &self.multiprocess)
            .field("run_once", &self.run_once)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}
