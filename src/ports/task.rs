use std::{collections::BTreeMap, io};

/// CGI-style request variables produced by a channel.
pub type RequestMetadata = BTreeMap<String, String>;

/// Lazily readable request body.
pub type BodyStream = Box<dyn io::Read + Send>;

/// Scheme and host recovered from an absolute-form request target, as sent to
/// a forward proxy (`GET http://example.com/path HTTP/1.1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInfo {
    pub scheme: String,
    pub host: String,
}

/// One accepted and parsed request, as seen by the application bridge.
///
/// A task is created by a channel on the reactor thread and then shared with
/// whichever thread services it, so every method takes `&self` and
/// implementations use interior mutability. Pending response fields only
/// change through [`crate::core::response::StartResponse`]; `write` may be
/// called any number of times after the status has been declared.
pub trait Task: Send + Sync {
    /// Request variables (method, path, headers as `HTTP_*`, ...).
    fn request_metadata(&self) -> RequestMetadata;

    /// The request body. A second call returns an empty stream.
    fn body_stream(&self) -> BodyStream;

    /// Proxy scheme/host, for channels that can provide them.
    fn proxy_info(&self) -> Option<ProxyInfo> {
        None
    }

    fn set_response_status(&self, code: u16, reason: &str);

    fn append_response_headers(&self, headers: Vec<String>);

    /// Drop every accumulated response header.
    fn reset_response_headers(&self);

    /// Whether the response head has been sent (or queued) to the client.
    fn header_committed(&self) -> bool;

    /// Emit one body chunk, committing the head first if needed.
    fn write(&self, chunk: &[u8]) -> io::Result<()>;
}

/// The unit of work handed to a dispatcher: run once, by exactly one thread.
pub trait ServiceTask: Send + 'static {
    fn service(self: Box<Self>);

    /// Called instead of `service` when the task is dropped unserviced, for
    /// example by a dispatcher shutting down with pending work.
    fn cancel(self: Box<Self>) {}
}
