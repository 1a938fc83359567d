//! Small applications served by the `gantry` binary.
use std::{io::Read, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    core::{environ::Environ, response::StartResponse},
    ports::application::{AppError, Application, Body, body_from_iter},
};

/// Built-in applications selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinApp {
    /// Plain-text greeting
    Hello,
    /// JSON dump of the request context and body
    Echo,
}

impl BuiltinApp {
    pub fn application(self) -> Arc<dyn Application> {
        match self {
            BuiltinApp::Hello => Arc::new(hello),
            BuiltinApp::Echo => Arc::new(echo),
        }
    }
}

pub fn hello(environ: Environ, start_response: StartResponse) -> Result<Body, AppError> {
    let body = format!("Hello from {}\n", environ.get("SERVER_SOFTWARE").unwrap_or("gantry"));
    start_response.start(
        "200 OK",
        [
            ("Content-Type", "text/plain; charset=utf-8".to_string()),
            ("Content-Length", body.len().to_string()),
        ],
    )?;
    Ok(body_from_iter([body]))
}

#[derive(Debug, Serialize)]
struct EchoReply<'a> {
    method: &'a str,
    path: &'a str,
    url_scheme: &'a str,
    multithread: bool,
    multiprocess: bool,
    run_once: bool,
    proxy_scheme: Option<&'a str>,
    proxy_host: Option<&'a str>,
    metadata: &'a std::collections::BTreeMap<String, String>,
    body: String,
}

pub fn echo(mut environ: Environ, start_response: StartResponse) -> Result<Body, AppError> {
    let mut body = Vec::new();
    environ
        .input
        .read_to_end(&mut body)
        .map_err(AppError::failed)?;

    let reply = EchoReply {
        method: environ.method(),
        path: environ.path_info(),
        url_scheme: environ.url_scheme.as_str(),
        multithread: environ.multithread,
        multiprocess: environ.multiprocess,
        run_once: environ.run_once,
        proxy_scheme: environ.proxy.as_ref().map(|p| p.scheme.as_str()),
        proxy_host: environ.proxy.as_ref().map(|p| p.host.as_str()),
        metadata: &environ.metadata,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let json = serde_json::to_vec_pretty(&reply).map_err(AppError::failed)?;

    start_response.start(
        "200 OK",
        [
            ("Content-Type", "application/json".to_string()),
            ("Content-Length", json.len().to_string()),
        ],
    )?;
    Ok(body_from_iter([json]))
}
