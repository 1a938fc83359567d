//! Runs the hosted application against one task.
use std::{io, sync::Arc};

use thiserror::Error;

use crate::{
    config::EnvironMarkers,
    core::{
        environ::Environ,
        response::{ResponseError, StartResponse},
    },
    ports::{
        application::{AppError, Application},
        task::Task,
    },
};

/// Why a request could not be completed. Returned to the task's error
/// boundary, which decides what the client sees.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Application(AppError),

    #[error("failed to write response body: {0}")]
    Write(#[from] io::Error),

    /// The application returned a body without ever calling start.
    #[error("application returned without starting a response")]
    NotStarted,
}

impl From<AppError> for ExecuteError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Response(inner) => ExecuteError::Response(inner),
            other => ExecuteError::Application(other),
        }
    }
}

impl ExecuteError {
    /// The application gave up after the head was sent.
    pub fn is_reraised(&self) -> bool {
        matches!(self, ExecuteError::Response(ResponseError::Reraised(_)))
    }
}

#[derive(Clone)]
pub struct ApplicationBridge {
    application: Arc<dyn Application>,
    markers: EnvironMarkers,
}

impl ApplicationBridge {
    pub fn new(application: Arc<dyn Application>, markers: EnvironMarkers) -> Self {
        Self {
            application,
            markers,
        }
    }

    /// Build the request context, call the application and write every body
    /// chunk to the task as soon as it is produced.
    pub fn execute_request(&self, task: Arc<dyn Task>) -> Result<(), ExecuteError> {
        let environ = Environ::from_task(task.as_ref(), &self.markers);
        let start_response = StartResponse::new(task.clone());

        let body = self.application.call(environ, start_response)?;

        for chunk in body {
            task.write(&chunk?)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Bytes;

    use super::*;
    use crate::{
        core::testing::RecordingTask,
        ports::application::{Body, body_from_iter},
    };

    fn bridge(app: impl Application) -> ApplicationBridge {
        ApplicationBridge::new(Arc::new(app), EnvironMarkers::default())
    }

    #[test]
    fn test_chunks_are_written_in_order_without_buffering() {
        let app = |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("Content-Type", "text/plain")])?;
            Ok(body_from_iter(["a", "b", "c"]))
        };
        let task = Arc::new(RecordingTask::default());

        bridge(app).execute_request(task.clone()).unwrap();

        assert_eq!(task.writes(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(task.status(), Some((200, "OK".to_string())));
    }

    #[test]
    fn test_body_is_consumed_lazily() {
        let task = Arc::new(RecordingTask::default());
        let observer = task.clone();
        let app = move |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("X", "1")])?;
            let observer = observer.clone();
            let body = (0..3).map(move |i| {
                // Every earlier chunk has already reached the task.
                assert_eq!(observer.writes().len(), i);
                Ok::<_, AppError>(Bytes::from(format!("{i}")))
            });
            Ok(Box::new(body))
        };

        bridge(app).execute_request(task.clone()).unwrap();
        assert_eq!(task.writes().len(), 3);
    }

    #[test]
    fn test_empty_chunks_are_still_written() {
        let app = |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("A", "b")])?;
            Ok(body_from_iter(["", "x"]))
        };
        let task = Arc::new(RecordingTask::default());

        bridge(app).execute_request(task.clone()).unwrap();
        assert_eq!(task.writes(), vec![Vec::new(), b"x".to_vec()]);
    }

    #[test]
    fn test_app_reads_request_body() {
        let app = |mut environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            let mut body = Vec::new();
            environ.input.read_to_end(&mut body).map_err(AppError::failed)?;
            start.start("200 OK", [("Content-Length", body.len().to_string())])?;
            Ok(body_from_iter([body]))
        };
        let task = Arc::new(RecordingTask::default().body(b"echo me"));

        bridge(app).execute_request(task.clone()).unwrap();
        assert_eq!(task.writes(), vec![b"echo me".to_vec()]);
        assert_eq!(task.headers(), vec!["Content-Length: 7"]);
    }

    #[test]
    fn test_restart_from_inside_body_after_commit_is_reraised() {
        let app = |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("A", "b")])?;
            let mut step = 0;
            let body = std::iter::from_fn(move || {
                step += 1;
                match step {
                    1 => Some(Ok(Bytes::from_static(b"first"))),
                    2 => {
                        let error = io::Error::other("database went away");
                        Some(
                            start
                                .start_with_error("500 Oops", [("A", "b")], error)
                                .map(|_| Bytes::new())
                                .map_err(AppError::from),
                        )
                    }
                    _ => None,
                }
            });
            Ok(Box::new(body))
        };
        let task = Arc::new(RecordingTask::default());

        let err = bridge(app).execute_request(task.clone()).unwrap_err();

        assert!(err.is_reraised());
        assert_eq!(task.writes(), vec![b"first".to_vec()]);
    }

    #[test]
    fn test_protocol_violation_propagates() {
        let app = |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("A", "b")])?;
            start.start("200 OK", [("A", "b")])?;
            Ok(body_from_iter(["unreachable"]))
        };
        let task = Arc::new(RecordingTask::default());

        let err = bridge(app).execute_request(task.clone()).unwrap_err();

        assert!(matches!(
            err,
            ExecuteError::Response(ResponseError::ProtocolViolation)
        ));
        assert!(task.writes().is_empty());
    }

    #[test]
    fn test_application_failure_propagates() {
        let app = |_environ: Environ, _start: StartResponse| -> Result<Body, AppError> {
            Err(AppError::failed("no handler"))
        };

        let err = bridge(app)
            .execute_request(Arc::new(RecordingTask::default()))
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Application(_)));
        assert!(!err.is_reraised());
    }

    #[test]
    fn test_write_failure_stops_iteration() {
        let app = |_environ: Environ, start: StartResponse| -> Result<Body, AppError> {
            start.start("200 OK", [("A", "b")])?;
            Ok(body_from_iter(["a", "b"]))
        };
        let task = Arc::new(RecordingTask::default());
        task.fail_writes();

        let err = bridge(app).execute_request(task.clone()).unwrap_err();
        assert!(matches!(err, ExecuteError::Write(_)));
    }
}
