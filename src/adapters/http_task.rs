//! One parsed HTTP request and the response being produced for it.
//!
//! The task is built on the reactor thread and serviced on a worker. Response
//! bytes never touch the socket from here: they are appended to a
//! [`ChannelOutput`] shared with the owning channel, and the reactor is woken
//! to flush them.
use std::{
    io::{self, Cursor},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    core::{bridge::ExecuteError, server::Server},
    ports::task::{BodyStream, ProxyInfo, RequestMetadata, ServiceTask, Task},
    reactor::ReactorHandle,
    tracing_setup::create_request_span,
};

#[derive(Debug, Default)]
struct OutputState {
    buf: Vec<u8>,
    done: bool,
    close: bool,
    abandoned: bool,
}

/// Response bytes travelling from a worker to the reactor.
#[derive(Debug)]
pub struct ChannelOutput {
    state: Mutex<OutputState>,
    reactor: ReactorHandle,
}

/// What the channel should do next with an in-flight response.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub bytes: Vec<u8>,
    pub done: bool,
    pub close: bool,
}

impl ChannelOutput {
    pub fn new(reactor: ReactorHandle) -> Self {
        Self {
            state: Mutex::new(OutputState::default()),
            reactor,
        }
    }

    fn push(&self, bytes: &[u8]) -> io::Result<()> {
        {
            let mut state = self.state.lock();
            if state.abandoned {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "connection closed by peer",
                ));
            }
            state.buf.extend_from_slice(bytes);
        }
        self.reactor.wake();
        Ok(())
    }

    fn finish(&self, close: bool) {
        {
            let mut state = self.state.lock();
            state.done = true;
            state.close |= close;
        }
        self.reactor.wake();
    }

    /// Whether the channel has something to flush or finish.
    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.buf.is_empty() || state.done
    }

    /// Take every queued byte along with the completion flags.
    pub fn drain(&self) -> Drained {
        let mut state = self.state.lock();
        Drained {
            bytes: std::mem::take(&mut state.buf),
            done: state.done,
            close: state.close,
        }
    }

    /// The connection is gone; later writes fail.
    pub fn abandon(&self) {
        self.state.lock().abandoned = true;
    }
}

/// Request line facts the response head depends on.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    /// `0` for HTTP/1.0, `1` for HTTP/1.1
    pub minor_version: u8,
    /// The client asked for the connection to end after this response
    pub close_requested: bool,
    pub peer: SocketAddr,
}

#[derive(Debug, Default)]
struct PendingResponse {
    status: Option<(u16, String)>,
    headers: Vec<String>,
    committed: bool,
    close: bool,
    content_length: Option<u64>,
    written: u64,
}

fn find_header<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// A complete plain-text response used when no application output exists.
pub fn error_response(ident: &str, code: u16, reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {code} {reason}\r\nServer: {ident}\r\nContent-Type: text/plain\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{reason}",
        reason.len()
    )
    .into_bytes()
}

pub struct HttpTask {
    metadata: RequestMetadata,
    body: Mutex<Option<Bytes>>,
    proxy: Option<ProxyInfo>,
    request: RequestInfo,
    ident: String,
    response: Mutex<PendingResponse>,
    output: Arc<ChannelOutput>,
}

impl HttpTask {
    pub fn new(
        metadata: RequestMetadata,
        body: Bytes,
        proxy: Option<ProxyInfo>,
        request: RequestInfo,
        ident: String,
        output: Arc<ChannelOutput>,
    ) -> Self {
        Self {
            metadata,
            body: Mutex::new(Some(body)),
            proxy,
            request,
            ident,
            response: Mutex::new(PendingResponse::default()),
            output,
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Render the status line and headers, deciding whether the connection
    /// survives this response.
    fn commit_head(&self, response: &mut PendingResponse) -> Vec<u8> {
        let (code, reason) = response
            .status
            .clone()
            .unwrap_or_else(|| (200, "OK".to_string()));

        response.content_length = find_header(&response.headers, "Content-Length")
            .and_then(|value| value.parse::<u64>().ok());
        let connection = find_header(&response.headers, "Connection").map(str::to_ascii_lowercase);

        response.close = self.request.close_requested
            || response.content_length.is_none()
            || connection.as_deref() == Some("close");

        let mut head = format!(
            "HTTP/1.{} {code} {reason}\r\n",
            self.request.minor_version
        );
        for line in &response.headers {
            head.push_str(line);
            head.push_str("\r\n");
        }
        if find_header(&response.headers, "Server").is_none() {
            head.push_str(&format!("Server: {}\r\n", self.ident));
        }
        if connection.is_none() {
            if response.close {
                head.push_str("Connection: close\r\n");
            } else if self.request.minor_version == 0 {
                head.push_str("Connection: Keep-Alive\r\n");
            }
        }
        head.push_str("\r\n");

        response.committed = true;
        head.into_bytes()
    }

    /// The application returned normally.
    pub fn finish(&self) -> Result<(), ExecuteError> {
        let mut response = self.response.lock();
        if !response.committed {
            if response.status.is_none() {
                return Err(ExecuteError::NotStarted);
            }
            if find_header(&response.headers, "Content-Length").is_none() {
                response.headers.push("Content-Length: 0".to_string());
            }
            let head = self.commit_head(&mut response);
            self.output.push(&head)?;
        }

        // A body shorter than announced leaves the client waiting; end it.
        let truncated = response
            .content_length
            .is_some_and(|declared| response.written < declared);
        self.output.finish(response.close || truncated);
        Ok(())
    }

    /// The application or the transport failed.
    pub fn fail(&self, server: &Server, error: &ExecuteError) {
        let committed = self.response.lock().committed;
        if committed {
            server.logger().error(&format!(
                "Response to {} {} aborted after the header was sent: {error}",
                self.request.method, self.request.path
            ));
            self.output.finish(true);
            return;
        }

        server.logger().error(&format!(
            "Request {} {} failed: {error}",
            self.request.method, self.request.path
        ));
        let _ = self
            .output
            .push(&error_response(&self.ident, 500, "Internal Server Error"));
        self.output.finish(true);
    }

    /// The task is dropped unserviced.
    pub fn cancel(&self) {
        let _ = self
            .output
            .push(&error_response(&self.ident, 503, "Service Unavailable"));
        self.output.finish(true);
    }

    /// Status recorded so far, for logging.
    pub fn status_code(&self) -> Option<u16> {
        self.response.lock().status.as_ref().map(|(code, _)| *code)
    }
}

impl Task for HttpTask {
    fn request_metadata(&self) -> RequestMetadata {
        self.metadata.clone()
    }

    fn body_stream(&self) -> BodyStream {
        let body = self.body.lock().take().unwrap_or_default();
        Box::new(Cursor::new(body))
    }

    fn proxy_info(&self) -> Option<ProxyInfo> {
        self.proxy.clone()
    }

    fn set_response_status(&self, code: u16, reason: &str) {
        self.response.lock().status = Some((code, reason.to_string()));
    }

    fn append_response_headers(&self, headers: Vec<String>) {
        self.response.lock().headers.extend(headers);
    }

    fn reset_response_headers(&self) {
        self.response.lock().headers.clear();
    }

    fn header_committed(&self) -> bool {
        self.response.lock().committed
    }

    fn write(&self, chunk: &[u8]) -> io::Result<()> {
        let mut response = self.response.lock();
        if !response.committed {
            let mut head = self.commit_head(&mut response);
            head.extend_from_slice(chunk);
            response.written += chunk.len() as u64;
            return self.output.push(&head);
        }
        response.written += chunk.len() as u64;
        self.output.push(chunk)
    }
}

/// The unit of work submitted to the dispatch gateway for one request.
pub struct HttpServiceTask {
    task: Arc<HttpTask>,
    server: Arc<Server>,
}

impl HttpServiceTask {
    pub fn new(task: Arc<HttpTask>, server: Arc<Server>) -> Self {
        Self { task, server }
    }
}

impl ServiceTask for HttpServiceTask {
    fn service(self: Box<Self>) {
        let request = self.task.request();
        let span = create_request_span(&request.method, &request.path, &request.peer.to_string());
        let _enter = span.enter();

        let result = self
            .server
            .execute_request(self.task.clone())
            .and_then(|()| self.task.finish());

        if let Some(code) = self.task.status_code() {
            span.record("http.status_code", code);
        }
        match result {
            Ok(()) => tracing::debug!("Request completed"),
            Err(error) => self.task.fail(&self.server, &error),
        }
    }

    fn cancel(self: Box<Self>) {
        self.task.cancel();
    }
}
