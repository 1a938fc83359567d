//! Server startup: binding, identity, wiring the acceptor into the reactor.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gantry::{
//!     adapters::{BuiltinApp, ThreadedTaskDispatcher},
//!     config::ServerConfig,
//!     server::ServerBuilder,
//! };
//!
//! # fn main() -> Result<(), gantry::server::ServerError> {
//! let mut server = ServerBuilder::new(BuiltinApp::Hello.application())
//!     .config(ServerConfig::default())
//!     .dispatcher(Arc::new(ThreadedTaskDispatcher::with_threads(4)))
//!     .build()?;
//! server.run()?;
//! # Ok(()) }
//! ```
use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::{
    adapters::{dns_resolver::SystemResolver, http_channel::HttpChannelFactory},
    config::ServerConfig,
    core::{acceptor::ConnectionAcceptor, gateway::TaskGateway, identity, server::Server},
    ports::{
        application::Application, channel::ChannelFactory, dispatcher::TaskDispatcher,
        resolver::NameResolver,
    },
    reactor::{Reactor, ReactorHandle},
    tracing_setup::ServerLogger,
};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("cannot resolve bind address {0}")]
    UnresolvedAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Startup parameters for an [`HttpServer`].
pub struct ServerBuilder {
    application: Arc<dyn Application>,
    config: ServerConfig,
    dispatcher: Option<Arc<dyn TaskDispatcher>>,
    socket: Option<Socket>,
    start: bool,
    logger: Option<ServerLogger>,
    sub_protocol: Option<String>,
    resolver: Arc<dyn NameResolver>,
    channel_factory: Arc<dyn ChannelFactory>,
}

impl ServerBuilder {
    pub fn new(application: Arc<dyn Application>) -> Self {
        Self {
            application,
            config: ServerConfig::default(),
            dispatcher: None,
            socket: None,
            start: true,
            logger: None,
            sub_protocol: None,
            resolver: Arc::new(SystemResolver),
            channel_factory: Arc::new(HttpChannelFactory),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run tasks on this pool. Without one every request is serviced inline.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Serve on an already bound socket instead of binding `host:port`.
    pub fn socket(mut self, socket: Socket) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Whether to start listening right away (the default).
    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn logger(mut self, logger: ServerLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Label appended to the server identity.
    pub fn sub_protocol(mut self, label: impl Into<String>) -> Self {
        self.sub_protocol = Some(label.into());
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn channel_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.channel_factory = factory;
        self
    }

    pub fn build(self) -> Result<HttpServer, ServerError> {
        let mut config = self.config;
        if self.sub_protocol.is_some() {
            config.sub_protocol = self.sub_protocol;
        }
        let config = Arc::new(config);

        let logger = self.logger.unwrap_or_default();
        let logger = {
            let verbose = logger.is_verbose() || config.verbose;
            logger.verbose(verbose)
        };

        let socket = match self.socket {
            Some(socket) => socket,
            None => bind_socket(&config)?,
        };
        socket.set_nonblocking(true)?;
        let local_addr = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an IP socket"))?;

        let server_name = identity::compute_server_name(&config.host, self.resolver.as_ref(), &logger);
        let reactor = Reactor::new()?;

        let server = Arc::new(Server::new(
            config.clone(),
            self.application,
            TaskGateway::new(self.dispatcher),
            server_name,
            local_addr.port(),
            logger,
            reactor.handle(),
        ));

        let listener = mio::net::TcpListener::from_std(StdTcpListener::from(socket.try_clone()?));
        let mut http_server = HttpServer {
            reactor,
            server: server.clone(),
            socket,
            local_addr,
        };
        http_server.reactor.register(Box::new(ConnectionAcceptor::new(
            listener,
            server,
            self.channel_factory,
        )));

        if self.start {
            http_server.accept_connections()?;
        }
        Ok(http_server)
    }
}

fn bind_socket(config: &ServerConfig) -> Result<Socket, ServerError> {
    let address = config.bind_address();
    let addr = address
        .to_socket_addrs()
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::UnresolvedAddress(address.clone()))?;

    let bind = || -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        Ok(socket)
    };
    bind().map_err(|source| ServerError::Bind { address, source })
}

/// A bound server with its reactor. Drive it with [`HttpServer::run`].
pub struct HttpServer {
    reactor: Reactor,
    server: Arc<Server>,
    socket: Socket,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Start listening and let the acceptor take connections.
    pub fn accept_connections(&mut self) -> Result<(), ServerError> {
        self.socket.listen(self.server.config().backlog)?;
        self.server.set_accepting(true);
        self.server.reactor().wake();

        self.server.logger().verbose_info(&format!(
            "{} started. Hostname: {} Port: {}",
            self.server.ident(),
            self.server.server_name(),
            self.server.port()
        ));
        Ok(())
    }

    /// Run the reactor until [`ReactorHandle::stop`] is called.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let tick = Duration::from_millis(self.server.config().poll_interval_ms.max(1));
        self.reactor.run(tick)?;
        self.server.set_accepting(false);
        Ok(())
    }

    /// A single reactor tick.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        self.reactor.poll_once(timeout)?;
        Ok(())
    }

    pub fn handle(&self) -> ReactorHandle {
        self.reactor.handle()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn active_connections(&self) -> usize {
        self.reactor.active_connections()
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("local_addr", &self.local_addr)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
