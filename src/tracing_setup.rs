use eyre::{Result, WrapErr};
use tracing::{Dispatch, Level};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with JSON output for gantry
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON subscriber")?;

    tracing::info!("gantry structured logging initialized successfully");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install console subscriber")?;

    tracing::info!("gantry console logging initialized successfully");
    Ok(())
}

/// Initialize tracing with custom configuration.
///
/// `RUST_LOG` still wins over `level` when set.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
            .wrap_err("Failed to install JSON subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install console subscriber")?;
    }

    tracing::info!(
        "gantry logging initialized with level: {}, json: {}, spans: {}",
        level,
        json_format,
        include_spans
    );
    Ok(())
}

/// Configure tracing for specific service components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, peer: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        client.address = peer,
        http.status_code = tracing::field::Empty,
    )
}

/// Severity of a server log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Map a server severity onto a `tracing` level.
pub fn severity_level(severity: Severity) -> Level {
    match severity {
        Severity::Info => Level::INFO,
        Severity::Warning => Level::WARN,
        Severity::Error => Level::ERROR,
    }
}

/// Logger handed to the server at startup.
///
/// Without a dispatch, events go to whatever subscriber is current on the
/// calling thread (none by default, so nothing is printed). With one, every
/// event is routed to that dispatch only.
#[derive(Debug, Clone, Default)]
pub struct ServerLogger {
    dispatch: Option<Dispatch>,
    verbose: bool,
}

impl ServerLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route all server events to `dispatch`.
    pub fn with_dispatch(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn log(&self, severity: Severity, message: &str) {
        let emit = || match severity {
            Severity::Info => tracing::info!(target: "gantry::server", "{message}"),
            Severity::Warning => tracing::warn!(target: "gantry::server", "{message}"),
            Severity::Error => tracing::error!(target: "gantry::server", "{message}"),
        };

        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, emit),
            None => emit(),
        }
    }

    pub fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }

    /// Info-level message emitted only in verbose mode.
    pub fn verbose_info(&self, message: &str) {
        if self.verbose {
            self.log(Severity::Info, message);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{capture::CapturedLogs, *};

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity_level(Severity::Info), Level::INFO);
        assert_eq!(severity_level(Severity::Warning), Level::WARN);
        assert_eq!(severity_level(Severity::Error), Level::ERROR);
    }

    #[test]
    fn test_injected_logger_receives_events() {
        let logs = CapturedLogs::default();
        let logger = ServerLogger::with_dispatch(logs.dispatch());

        logger.warning("accept() threw an exception");
        logger.error("boom");

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("accept() threw an exception"));
        assert!(output.contains("ERROR"));
        assert!(output.contains("boom"));
    }

    #[test]
    fn test_each_severity_logs_at_its_level() {
        let logs = CapturedLogs::default();
        let logger = ServerLogger::with_dispatch(logs.dispatch());

        logger.info("note-info");
        logger.warning("note-warning");
        logger.error("note-error");

        let output = logs.contents();
        let line_for = |needle: &str| {
            output
                .lines()
                .find(|line| line.contains(needle))
                .unwrap_or_default()
                .to_string()
        };
        assert!(line_for("note-info").contains("INFO"));
        assert!(line_for("note-warning").contains("WARN"));
        assert!(line_for("note-error").contains("ERROR"));
        assert!(!line_for("note-info").contains("WARN"));
    }

    #[test]
    fn test_verbose_info_is_gated() {
        let logs = CapturedLogs::default();
        let quiet = ServerLogger::with_dispatch(logs.dispatch());
        quiet.verbose_info("hidden");
        assert!(!logs.contents().contains("hidden"));

        let loud = quiet.verbose(true);
        loud.verbose_info("shown");
        assert!(logs.contents().contains("shown"));
    }

    #[test]
    fn test_create_request_span() {
        let span = create_request_span("GET", "/api/test", "127.0.0.1:5000");
        // No subscriber is installed, so the span may be disabled; metadata is
        // only available when it is enabled.
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "request");
        }
    }

    #[test]
    fn test_configure_component_tracing() {
        let span = configure_component_tracing("reactor");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "component");
        }
    }
}
