pub mod acceptor;
pub mod bridge;
pub mod environ;
pub mod gateway;
pub mod identity;
pub mod response;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use acceptor::{ConnectionAcceptor, accepts_more};
pub use bridge::{ApplicationBridge, ExecuteError};
pub use environ::{Environ, ErrorSink, UrlScheme};
pub use gateway::TaskGateway;
pub use identity::compute_server_name;
pub use response::{ResponseError, ResponsePhase, StartResponse, WriteFn};
pub use server::Server;
