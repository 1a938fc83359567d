//! The response-initiation handshake between the server and an application.
//!
//! Every task gets one [`StartResponse`]. The application calls it to declare
//! a status line and headers before any body chunk is written; the server
//! enforces the calling rules through an explicit [`ResponsePhase`] machine:
//!
//! * a second start without error information is a protocol violation;
//! * a start carrying error information before the head is on the wire
//!   discards the pending headers so the response can be rebuilt;
//! * a start carrying error information after the head is on the wire
//!   cannot be recovered and comes back as [`ResponseError::Reraised`].
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use thiserror::Error;

use crate::ports::{application::ErrorInfo, task::Task};

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+) ([^\r\n]*)$").expect("valid regex"));

/// Errors surfaced to the application by [`StartResponse`] and [`WriteFn`].
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("start_response called a second time without providing error info")]
    ProtocolViolation,

    #[error("malformed status line: {0:?}")]
    MalformedStatus(String),

    /// Header name or value would break the response framing
    #[error("invalid response header: {0:?}")]
    InvalidHeader(String),

    #[error("direct writes are not supported; return the body as an iterator")]
    NotSupported,

    /// The error passed to a start after the head was committed. The
    /// response is abandoned and the connection must be closed.
    #[error("response aborted after the header was sent: {0}")]
    Reraised(#[source] ErrorInfo),
}

/// Lifecycle of one response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    /// No successful start yet
    NotStarted,
    /// Status and headers are stored on the task but not yet sent
    HeaderPending,
    /// The head is on the wire (or queued for it)
    HeaderCommitted,
    /// Error information arrived after commit; nothing more may be sent
    Aborted,
}

/// Split `"200 OK"` into its code and reason.
pub fn parse_status_line(status: &str) -> Result<(u16, String), ResponseError> {
    let malformed = || ResponseError::MalformedStatus(status.to_string());
    let captures = STATUS_LINE.captures(status).ok_or_else(malformed)?;
    let code = captures[1].parse::<u16>().map_err(|_| malformed())?;
    Ok((code, captures[2].to_string()))
}

fn render_header(name: &str, value: &str) -> Result<String, ResponseError> {
    let line = format!("{name}: {value}");
    if line.contains(['\r', '\n']) {
        return Err(ResponseError::InvalidHeader(line));
    }
    Ok(line)
}

/// The `start_response` callable handed to an application.
///
/// Clones share the same task and phase, so the handle can be moved into a
/// body iterator and used from there to restart a failed response.
#[derive(Clone)]
pub struct StartResponse {
    task: Arc<dyn Task>,
    phase: Arc<Mutex<ResponsePhase>>,
}

impl StartResponse {
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            phase: Arc::new(Mutex::new(ResponsePhase::NotStarted)),
        }
    }

    /// Current phase, refreshed from the task's commit flag.
    pub fn phase(&self) -> ResponsePhase {
        let mut phase = self.phase.lock();
        self.sync(&mut phase);
        *phase
    }

    /// Declare status and headers.
    pub fn start<I, N, V>(&self, status: &str, headers: I) -> Result<WriteFn, ResponseError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        self.initiate(status, headers, None)
    }

    /// Declare status and headers after a failure, replacing whatever was
    /// declared before if the head has not been sent yet.
    pub fn start_with_error<I, N, V>(
        &self,
        status: &str,
        headers: I,
        error: impl Into<ErrorInfo>,
    ) -> Result<WriteFn, ResponseError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        self.initiate(status, headers, Some(error.into()))
    }

    pub fn initiate<I, N, V>(
        &self,
        status: &str,
        headers: I,
        error: Option<ErrorInfo>,
    ) -> Result<WriteFn, ResponseError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut phase = self.phase.lock();
        self.sync(&mut phase);

        match (error, *phase) {
            (None, ResponsePhase::NotStarted) => {}
            (None, _) => return Err(ResponseError::ProtocolViolation),
            (Some(error), ResponsePhase::HeaderCommitted | ResponsePhase::Aborted) => {
                *phase = ResponsePhase::Aborted;
                return Err(ResponseError::Reraised(error));
            }
            (Some(_), ResponsePhase::NotStarted | ResponsePhase::HeaderPending) => {
                self.task.reset_response_headers();
            }
        }

        let (code, reason) = parse_status_line(status)?;
        let rendered = headers
            .into_iter()
            .map(|(name, value)| render_header(name.as_ref(), value.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        self.task.set_response_status(code, &reason);
        self.task.append_response_headers(rendered);
        *phase = ResponsePhase::HeaderPending;

        Ok(WriteFn { _private: () })
    }

    fn sync(&self, phase: &mut ResponsePhase) {
        if matches!(
            *phase,
            ResponsePhase::NotStarted | ResponsePhase::HeaderPending
        ) && self.task.header_committed()
        {
            *phase = ResponsePhase::HeaderCommitted;
        }
    }
}

/// The write callable returned by a successful start.
///
/// Bodies are streamed by returning an iterator from the application, so
/// this callable never accepts data.
#[derive(Debug, Clone)]
pub struct WriteFn {
    _private: (),
}

impl WriteFn {
    pub fn write(&self, _data: &[u8]) -> Result<(), ResponseError> {
        Err(ResponseError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::core::testing::RecordingTask;

    const NO_HEADERS: [(&str, &str); 0] = [];

    fn start_response() -> (Arc<RecordingTask>, StartResponse) {
        let task = Arc::new(RecordingTask::default());
        let start = StartResponse::new(task.clone());
        (task, start)
    }

    fn boom() -> ErrorInfo {
        Box::new(io::Error::other("boom"))
    }

    #[test]
    fn test_first_start_stores_status_and_headers() {
        let (task, start) = start_response();

        start
            .start("200 OK", [("Content-Type", "text/plain")])
            .unwrap();

        assert_eq!(task.status(), Some((200, "OK".to_string())));
        assert_eq!(task.headers(), vec!["Content-Type: text/plain"]);
        assert_eq!(start.phase(), ResponsePhase::HeaderPending);
    }

    #[test]
    fn test_second_start_without_error_is_violation() {
        let (_task, start) = start_response();
        start.start("200 OK", NO_HEADERS).unwrap();

        let err = start.start("200 OK", NO_HEADERS).unwrap_err();
        assert!(matches!(err, ResponseError::ProtocolViolation));
    }

    #[test]
    fn test_start_after_commit_without_error_is_violation() {
        let (task, start) = start_response();
        start.start("200 OK", NO_HEADERS).unwrap();
        task.write_chunk(b"x");

        let err = start.start("500 Oops", NO_HEADERS).unwrap_err();
        assert!(matches!(err, ResponseError::ProtocolViolation));
        assert_eq!(start.phase(), ResponsePhase::HeaderCommitted);
    }

    #[test]
    fn test_error_before_commit_resets_headers() {
        let (task, start) = start_response();
        start
            .start("200 OK", [("Content-Type", "text/plain"), ("X-A", "1")])
            .unwrap();

        start
            .start_with_error("500 Internal Server Error", [("X-Error", "yes")], boom())
            .unwrap();

        assert_eq!(
            task.status(),
            Some((500, "Internal Server Error".to_string()))
        );
        assert_eq!(task.headers(), vec!["X-Error: yes"]);
        assert_eq!(task.resets(), 1);
    }

    #[test]
    fn test_error_on_fresh_response_is_accepted() {
        let (task, start) = start_response();

        start
            .start_with_error("503 Unavailable", NO_HEADERS, boom())
            .unwrap();

        assert_eq!(task.status(), Some((503, "Unavailable".to_string())));
        assert!(task.headers().is_empty());
    }

    #[test]
    fn test_error_after_commit_is_reraised() {
        let (task, start) = start_response();
        start.start("200 OK", NO_HEADERS).unwrap();
        task.write_chunk(b"partial");

        let err = start
            .start_with_error("500 Oops", NO_HEADERS, boom())
            .unwrap_err();

        match err {
            ResponseError::Reraised(inner) => assert_eq!(inner.to_string(), "boom"),
            other => panic!("expected Reraised, got {other:?}"),
        }
        assert_eq!(start.phase(), ResponsePhase::Aborted);
        assert_eq!(task.status(), Some((200, "OK".to_string())));
    }

    #[test]
    fn test_malformed_status_lines() {
        for status in [
            "OK",
            "200",
            "200OK",
            " 200 OK",
            "abc OK",
            "99999999 Big",
            "200 OK\rX: y",
            "200 OK\nX: y",
            "200 OK\r\nSet-Cookie: x=1",
        ] {
            let (task, start) = start_response();
            let err = start.start(status, NO_HEADERS).unwrap_err();
            assert!(
                matches!(err, ResponseError::MalformedStatus(ref s) if s == status),
                "{status:?} gave {err:?}"
            );
            assert_eq!(task.status(), None);
            assert_eq!(start.phase(), ResponsePhase::NotStarted);
        }
    }

    #[test]
    fn test_status_with_empty_reason() {
        assert_eq!(parse_status_line("204 ").unwrap(), (204, String::new()));
        assert_eq!(
            parse_status_line("404 Not Found").unwrap(),
            (404, "Not Found".to_string())
        );
    }

    #[test]
    fn test_header_with_newline_is_rejected() {
        let (task, start) = start_response();

        let err = start
            .start("200 OK", [("X-Bad", "a\r\nSet-Cookie: x=1")])
            .unwrap_err();

        assert!(matches!(err, ResponseError::InvalidHeader(_)));
        assert!(task.headers().is_empty());
        assert_eq!(start.phase(), ResponsePhase::NotStarted);
    }

    #[test]
    fn test_write_fn_is_not_supported() {
        let (_task, start) = start_response();
        let write = start.start("200 OK", NO_HEADERS).unwrap();

        assert!(matches!(write.write(b""), Err(ResponseError::NotSupported)));
        assert!(matches!(
            write.write(b"hello"),
            Err(ResponseError::NotSupported)
        ));
    }

    #[test]
    fn test_clones_share_phase() {
        let (_task, start) = start_response();
        let other = start.clone();

        start.start("200 OK", NO_HEADERS).unwrap();

        assert!(matches!(
            other.start("200 OK", NO_HEADERS),
            Err(ResponseError::ProtocolViolation)
        ));
    }
}
