//! Gantry - a reactor-driven HTTP application server.
//!
//! Gantry hosts a request-handling application behind a single non-blocking
//! event loop and a pool of worker threads, so application code never deals
//! with sockets, readiness or thread coordination.
//!
//! # Request flow
//! 1. The reactor reports the listening socket readable and the
//!    [`core::acceptor::ConnectionAcceptor`] accepts one connection, unless the
//!    connection ceiling has been reached.
//! 2. A channel built by a [`ports::ChannelFactory`] parses bytes into a task.
//! 3. The task goes through the [`core::gateway::TaskGateway`] to a worker
//!    (or runs inline when no dispatcher is configured).
//! 4. The [`core::bridge::ApplicationBridge`] builds the request context,
//!    calls the [`ports::Application`] and writes each body chunk as soon as
//!    it is produced.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gantry::{
//!     core::{Environ, StartResponse},
//!     ports::{AppError, Body, body_from_iter},
//!     server::ServerBuilder,
//! };
//!
//! fn app(_environ: Environ, start_response: StartResponse) -> Result<Body, AppError> {
//!     start_response.start("200 OK", [("Content-Type", "text/plain")])?;
//!     Ok(body_from_iter(["hello ", "world"]))
//! }
//!
//! # fn main() -> Result<(), gantry::server::ServerError> {
//! let mut server = ServerBuilder::new(Arc::new(app)).build()?;
//! server.run()?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Traits at the seams live in `ports`, implementations in `adapters`, and
//! the protocol rules in `core`. The event loop is in `reactor`.
//!
//! # Error Handling
//! Library APIs return domain error types built with `thiserror`; the binary
//! and configuration loader use `eyre::Result` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod reactor;
pub mod server;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpChannelFactory, SystemResolver, ThreadedTaskDispatcher},
    core::{Environ, ResponseError, StartResponse},
    server::{HttpServer, ServerBuilder, ServerError},
    utils::GracefulShutdown,
};
