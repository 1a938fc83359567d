use std::{net::SocketAddr, sync::Arc};

use mio::net::TcpStream;

use crate::{config::ServerConfig, core::server::Server, reactor::EventHandler};

/// ChannelFactory defines the port for turning an accepted socket into a
/// per-connection channel.
///
/// The channel owns the connection from then on: it parses requests into
/// tasks, submits them through [`Server::submit`] and flushes responses. It is
/// registered with the reactor by the acceptor.
pub trait ChannelFactory: Send + Sync + 'static {
    fn create(
        &self,
        server: Arc<Server>,
        connection: TcpStream,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
    ) -> Box<dyn EventHandler>;
}
