//! Minimal HTTP/1.x channel: parses request heads with `httparse`, turns each
//! request into an [`HttpTask`] and flushes whatever the task produces.
//!
//! Only `Content-Length` request bodies are understood. One request is in
//! flight per connection; pipelined bytes wait in the read buffer until the
//! current response has been flushed.
use std::{
    io::{self, Read, Write},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use mio::{event::Source, net::TcpStream};
use thiserror::Error;
use url::Url;

use crate::{
    adapters::http_task::{ChannelOutput, HttpServiceTask, HttpTask, RequestInfo, error_response},
    config::ServerConfig,
    core::server::Server,
    ports::{
        channel::ChannelFactory,
        task::{ProxyInfo, RequestMetadata},
    },
    reactor::{EventHandler, Flow, ReactorContext},
};

const MAX_HEADERS: usize = 100;

/// Reasons a request is refused before it reaches the application.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request header exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("chunked request bodies are not supported")]
    ChunkedUnsupported,
}

impl RequestError {
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            RequestError::Malformed(_) => (400, "Bad Request"),
            RequestError::HeaderTooLarge(_) => (431, "Request Header Fields Too Large"),
            RequestError::BodyTooLarge(_) => (413, "Payload Too Large"),
            RequestError::ChunkedUnsupported => (501, "Not Implemented"),
        }
    }
}

/// An owned, fully received request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub minor_version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// HTTP/1.1 keeps the connection unless told otherwise; HTTP/1.0 only
    /// when asked to.
    pub fn close_requested(&self) -> bool {
        let connection = self.header("Connection").map(str::to_ascii_lowercase);
        match (self.minor_version, connection.as_deref()) {
            (_, Some("close")) => true,
            (0, Some("keep-alive")) => false,
            (0, _) => true,
            _ => false,
        }
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_header: usize,
    pub max_body: usize,
}

impl RequestLimits {
    /// Largest number of bytes a single request may occupy.
    pub fn max_request_len(&self) -> usize {
        self.max_header.saturating_add(self.max_body)
    }
}

/// Try to take one request off the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed, otherwise the request and
/// the number of bytes it occupied.
pub fn parse_request(
    buf: &[u8],
    limits: RequestLimits,
) -> Result<Option<(ParsedRequest, usize)>, RequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() > limits.max_header {
                return Err(RequestError::HeaderTooLarge(limits.max_header));
            }
            return Ok(None);
        }
        Err(httparse::Error::TooManyHeaders) => {
            return Err(RequestError::HeaderTooLarge(limits.max_header));
        }
        Err(e) => return Err(RequestError::Malformed(e.to_string())),
    };
    if head_len > limits.max_header {
        return Err(RequestError::HeaderTooLarge(limits.max_header));
    }

    let headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();

    let chunked = headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("Transfer-Encoding") && !value.eq_ignore_ascii_case("identity")
    });
    if chunked {
        return Err(RequestError::ChunkedUnsupported);
    }

    let content_length = match headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
    {
        Some((_, value)) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("invalid Content-Length {value:?}")))?,
        None => 0,
    };
    if content_length > limits.max_body {
        return Err(RequestError::BodyTooLarge(limits.max_body));
    }

    let total = head_len.saturating_add(content_length);
    if buf.len() < total {
        return Ok(None);
    }

    let request = ParsedRequest {
        method: req.method.unwrap_or("GET").to_string(),
        target: req.path.unwrap_or("/").to_string(),
        minor_version: req.version.unwrap_or(1),
        headers,
        body: Bytes::copy_from_slice(&buf[head_len..total]),
    };
    Ok(Some((request, total)))
}

/// Where a request was received, for the CGI variables.
#[derive(Debug, Clone, Copy)]
pub struct LocalEndpoint<'a> {
    pub server_name: &'a str,
    pub port: u16,
    pub software: &'a str,
}

/// Request variables for the application, plus the path used for logging and
/// the proxy target when the request line carried an absolute URL.
pub fn build_metadata(
    request: &ParsedRequest,
    local: LocalEndpoint<'_>,
    peer: SocketAddr,
) -> (RequestMetadata, String, Option<ProxyInfo>) {
    let (raw_path, query, proxy) = split_target(&request.target);
    let path = urlencoding::decode(&raw_path)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw_path.clone());

    let mut metadata = RequestMetadata::new();
    metadata.insert("REQUEST_METHOD".into(), request.method.clone());
    metadata.insert("SCRIPT_NAME".into(), String::new());
    metadata.insert("PATH_INFO".into(), path.clone());
    metadata.insert("QUERY_STRING".into(), query);
    metadata.insert(
        "SERVER_PROTOCOL".into(),
        format!("HTTP/1.{}", request.minor_version),
    );
    metadata.insert("SERVER_NAME".into(), local.server_name.to_string());
    metadata.insert("SERVER_PORT".into(), local.port.to_string());
    metadata.insert("SERVER_SOFTWARE".into(), local.software.to_string());
    metadata.insert("REMOTE_ADDR".into(), peer.ip().to_string());
    metadata.insert("REMOTE_PORT".into(), peer.port().to_string());

    for (name, value) in &request.headers {
        let key = name.to_ascii_uppercase().replace('-', "_");
        let key = if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" {
            key
        } else {
            format!("HTTP_{key}")
        };
        metadata
            .entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }

    (metadata, path, proxy)
}

fn split_target(target: &str) -> (String, String, Option<ProxyInfo>) {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        if let Ok(url) = Url::parse(target) {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            };
            let proxy = ProxyInfo {
                scheme: url.scheme().to_string(),
                host,
            };
            return (
                url.path().to_string(),
                url.query().unwrap_or_default().to_string(),
                Some(proxy),
            );
        }
    }

    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string(), None),
        None => (target.to_string(), String::new(), None),
    }
}

/// Creates an [`HttpChannel`] per accepted connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpChannelFactory;

impl ChannelFactory for HttpChannelFactory {
    fn create(
        &self,
        server: Arc<Server>,
        connection: TcpStream,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Box<dyn EventHandler> {
        Box::new(HttpChannel::new(server, connection, peer, config))
    }
}

pub struct HttpChannel {
    stream: TcpStream,
    peer: SocketAddr,
    server: Arc<Server>,
    config: Arc<ServerConfig>,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    in_flight: Option<Arc<ChannelOutput>>,
    /// Close once `outbuf` is flushed and nothing is in flight
    close_when_flushed: bool,
}

impl HttpChannel {
    pub fn new(
        server: Arc<Server>,
        stream: TcpStream,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            stream,
            peer,
            server,
            config,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            in_flight: None,
            close_when_flushed: false,
        }
    }

    fn limits(&self) -> RequestLimits {
        RequestLimits {
            max_header: self.config.max_request_header_size,
            max_body: self.config.max_request_body_size,
        }
    }

    /// Start the next buffered request, if one is complete.
    fn dispatch_next(&mut self) {
        if self.in_flight.is_some() || self.close_when_flushed || self.inbuf.is_empty() {
            return;
        }

        let (request, consumed) = match parse_request(&self.inbuf, self.limits()) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(peer = %self.peer, "Rejecting request: {}", e);
                let (code, reason) = e.status();
                self.outbuf
                    .extend_from_slice(&error_response(self.server.ident(), code, reason));
                self.inbuf.clear();
                self.close_when_flushed = true;
                return;
            }
        };
        self.inbuf.drain(..consumed);

        let local = LocalEndpoint {
            server_name: self.server.server_name(),
            port: self.server.port(),
            software: self.server.ident(),
        };
        let (metadata, path, proxy) = build_metadata(&request, local, self.peer);
        let info = RequestInfo {
            method: request.method.clone(),
            path,
            minor_version: request.minor_version,
            close_requested: request.close_requested(),
            peer: self.peer,
        };

        let output = Arc::new(ChannelOutput::new(self.server.reactor().clone()));
        let task = Arc::new(HttpTask::new(
            metadata,
            request.body,
            proxy,
            info,
            self.server.ident().to_string(),
            output.clone(),
        ));
        self.in_flight = Some(output);
        self.server
            .submit(Box::new(HttpServiceTask::new(task, self.server.clone())));
    }

    /// Move queued response bytes into `outbuf` and retire a finished response.
    fn collect_output(&mut self) {
        let Some(output) = &self.in_flight else {
            return;
        };
        let drained = output.drain();
        self.outbuf.extend_from_slice(&drained.bytes);
        if drained.done {
            self.in_flight = None;
            if drained.close {
                self.close_when_flushed = true;
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        while !self.outbuf.is_empty() {
            match self.stream.write(&self.outbuf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbuf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_limit(&self) -> usize {
        self.limits().max_request_len()
    }
}

impl EventHandler for HttpChannel {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.stream
    }

    fn is_readable(&self, _ctx: &ReactorContext<'_>) -> bool {
        self.in_flight.is_none() && !self.close_when_flushed
    }

    fn is_writable(&self, _ctx: &ReactorContext<'_>) -> bool {
        match &self.in_flight {
            Some(output) => !self.outbuf.is_empty() || output.has_pending(),
            None => !self.outbuf.is_empty() || self.close_when_flushed,
        }
    }

    fn on_read(&mut self, _ctx: &mut ReactorContext<'_>) -> Flow {
        let mut chunk = vec![0u8; self.config.recv_bytes.max(1)];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if self.inbuf.is_empty() && self.outbuf.is_empty() {
                        return Flow::Close;
                    }
                    self.close_when_flushed = true;
                    break;
                }
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    if self.inbuf.len() > self.read_limit() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(peer = %self.peer, "Read failed: {}", e);
                    return Flow::Close;
                }
            }
        }

        // A peer that half-closed after a full request still gets its answer.
        let closing = std::mem::take(&mut self.close_when_flushed);
        self.dispatch_next();
        self.close_when_flushed |= closing;
        Flow::Continue
    }

    fn on_write(&mut self, _ctx: &mut ReactorContext<'_>) -> Flow {
        self.collect_output();

        if let Err(e) = self.flush() {
            tracing::debug!(peer = %self.peer, "Write failed: {}", e);
            return Flow::Close;
        }
        if !self.outbuf.is_empty() || self.in_flight.is_some() {
            return Flow::Continue;
        }
        if self.close_when_flushed {
            return Flow::Close;
        }

        self.dispatch_next();
        Flow::Continue
    }

    fn on_close(&mut self) {
        if let Some(output) = self.in_flight.take() {
            output.abandon();
        }
        tracing::trace!(peer = %self.peer, "Connection closed");
    }
}
