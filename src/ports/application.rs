use bytes::Bytes;
use thiserror::Error;

use crate::core::{environ::Environ, response::ResponseError, response::StartResponse};

/// An arbitrary error carried through the response protocol.
pub type ErrorInfo = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by application code, either while producing the body
/// iterator or while yielding chunks from it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// A response-protocol violation, including a re-raised mid-stream error
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Any other application failure
    #[error("application failed: {0}")]
    Failed(#[source] ErrorInfo),
}

impl AppError {
    pub fn failed(error: impl Into<ErrorInfo>) -> Self {
        Self::Failed(error.into())
    }
}

/// One body chunk as yielded by an application.
pub type BodyChunk = Result<Bytes, AppError>;

/// A lazily produced, finite sequence of body chunks.
pub type Body = Box<dyn Iterator<Item = BodyChunk> + Send>;

/// Turn any iterator of byte-like items into a [`Body`].
pub fn body_from_iter<I, B>(chunks: I) -> Body
where
    I: IntoIterator<Item = B>,
    I::IntoIter: Send + 'static,
    B: Into<Bytes>,
{
    Box::new(chunks.into_iter().map(|chunk| Ok(chunk.into())))
}

/// The hosted request handler.
///
/// Called once per request on whichever thread services the task. The
/// application declares status and headers through `start_response` and
/// returns its body as an iterator; the server writes each chunk as soon as
/// it is yielded. `start_response` may be moved into the returned iterator to
/// restart the response after an error.
pub trait Application: Send + Sync + 'static {
    fn call(&self, environ: Environ, start_response: StartResponse) -> Result<Body, AppError>;
}

impl<F> Application for F
where
    F: Fn(Environ, StartResponse) -> Result<Body, AppError> + Send + Sync + 'static,
{
    fn call(&self, environ: Environ, start_response: StartResponse) -> Result<Body, AppError> {
        self(environ, start_response)
    }
}
