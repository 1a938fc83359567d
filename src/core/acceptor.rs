//! The listening socket's participant in the reactor.
use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use mio::{
    event::Source,
    net::{TcpListener, TcpStream},
};
use socket2::SockRef;

use crate::{
    config::SocketOption,
    core::server::Server,
    ports::channel::ChannelFactory,
    reactor::{EventHandler, ReactorContext},
};

/// Backpressure rule: accept only while accepting and under the ceiling.
pub fn accepts_more(accepting: bool, active_connections: usize, connection_limit: usize) -> bool {
    accepting && active_connections < connection_limit
}

/// Apply configured options to a freshly accepted connection.
pub fn apply_socket_options(stream: &TcpStream, options: &[SocketOption]) -> io::Result<()> {
    let socket = SockRef::from(stream);
    for option in options {
        match *option {
            SocketOption::TcpNodelay(enabled) => socket.set_nodelay(enabled)?,
            SocketOption::Keepalive(enabled) => socket.set_keepalive(enabled)?,
            SocketOption::RecvBufferSize(size) => socket.set_recv_buffer_size(size)?,
            SocketOption::SendBufferSize(size) => socket.set_send_buffer_size(size)?,
            SocketOption::LingerSecs(secs) => socket.set_linger(Some(Duration::from_secs(secs)))?,
        }
    }
    Ok(())
}

/// Accepts connections and turns each into a channel registered with the
/// reactor. Never reads or writes application data.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    server: Arc<Server>,
    factory: Arc<dyn ChannelFactory>,
}

impl ConnectionAcceptor {
    pub fn new(listener: TcpListener, server: Arc<Server>, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            listener,
            server,
            factory,
        }
    }

    pub fn is_acceptable(&self, active_connections: usize) -> bool {
        accepts_more(
            self.server.is_accepting(),
            active_connections,
            self.server.config().connection_limit,
        )
    }
}

impl EventHandler for ConnectionAcceptor {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.listener
    }

    fn is_readable(&self, ctx: &ReactorContext<'_>) -> bool {
        self.is_acceptable(ctx.active_connections())
    }

    fn is_writable(&self, _ctx: &ReactorContext<'_>) -> bool {
        false
    }

    fn is_acceptor(&self) -> bool {
        true
    }

    fn on_accept(&mut self, ctx: &mut ReactorContext<'_>) {
        let accepted = self.listener.accept();
        self.handle_accepted(accepted, ctx);
    }
}

impl ConnectionAcceptor {
    /// Turn one `accept()` outcome into a registered channel. Failures are
    /// never fatal: the listener stays armed for the next connection.
    pub(crate) fn handle_accepted(
        &self,
        accepted: io::Result<(TcpStream, SocketAddr)>,
        ctx: &mut ReactorContext<'_>,
    ) {
        let config = self.server.config();

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                if config.log_socket_errors {
                    self.server
                        .logger()
                        .warning(&format!("server accept() threw an exception: {e}"));
                }
                return;
            }
        };

        if let Err(e) = apply_socket_options(&stream, &config.socket_options) {
            self.server.logger().warning(&format!(
                "Failed to apply socket options for {peer}, dropping connection: {e}"
            ));
            return;
        }

        tracing::debug!(%peer, "Accepted connection");
        let channel = self
            .factory
            .create(self.server.clone(), stream, peer, config.clone());
        ctx.register_connection(channel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        config::ServerConfig,
        core::{environ::Environ, gateway::TaskGateway, response::StartResponse},
        ports::application::{AppError, Body, body_from_iter},
        reactor::Reactor,
        tracing_setup::{ServerLogger, capture::CapturedLogs},
    };

    struct Idle(TcpStream);

    impl EventHandler for Idle {
        fn source(&mut self) -> &mut dyn Source {
            &mut self.0
        }

        fn is_readable(&self, _ctx: &ReactorContext<'_>) -> bool {
            false
        }

        fn is_writable(&self, _ctx: &ReactorContext<'_>) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        peers: Mutex<Vec<SocketAddr>>,
    }

    impl ChannelFactory for RecordingFactory {
        fn create(
            &self,
            _server: Arc<Server>,
            connection: TcpStream,
            peer: SocketAddr,
            _config: Arc<ServerConfig>,
        ) -> Box<dyn EventHandler> {
            self.peers.lock().push(peer);
            Box::new(Idle(connection))
        }
    }

    fn server(reactor: &Reactor, config: ServerConfig) -> Arc<Server> {
        server_with_logger(reactor, config, ServerLogger::new())
    }

    fn server_with_logger(
        reactor: &Reactor,
        config: ServerConfig,
        logger: ServerLogger,
    ) -> Arc<Server> {
        let app = |_environ: Environ, _start: StartResponse| -> Result<Body, AppError> {
            Ok(body_from_iter(Vec::<Vec<u8>>::new()))
        };
        Arc::new(Server::new(
            Arc::new(config),
            Arc::new(app),
            TaskGateway::inline(),
            "localhost".to_string(),
            0,
            logger,
            reactor.handle(),
        ))
    }

    #[test]
    fn test_accepts_more_iff_below_ceiling() {
        for limit in 0..6 {
            for active in 0..8 {
                assert_eq!(accepts_more(true, active, limit), active < limit);
                assert!(!accepts_more(false, active, limit));
            }
        }
    }

    #[test]
    fn test_not_acceptable_until_accepting() {
        let reactor = Reactor::new().unwrap();
        let server = server(&reactor, ServerConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let acceptor = ConnectionAcceptor::new(
            listener,
            server.clone(),
            Arc::new(RecordingFactory::default()),
        );

        assert!(!acceptor.is_acceptable(0));
        server.set_accepting(true);
        assert!(acceptor.is_acceptable(0));
        assert!(!acceptor.is_acceptable(server.config().connection_limit));
    }

    #[test]
    fn test_accept_creates_channel_and_counts_connection() {
        let mut reactor = Reactor::new().unwrap();
        let server = server(
            &reactor,
            ServerConfig {
                connection_limit: 1,
                ..ServerConfig::default()
            },
        );
        server.set_accepting(true);

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let factory = Arc::new(RecordingFactory::default());
        reactor.register(Box::new(ConnectionAcceptor::new(
            listener,
            server,
            factory.clone(),
        )));

        let first = std::net::TcpStream::connect(addr).unwrap();
        let second = std::net::TcpStream::connect(addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reactor.active_connections() < 1 {
            assert!(Instant::now() < deadline, "connection was never accepted");
            reactor.poll_once(Some(Duration::from_millis(20))).unwrap();
        }

        // At the ceiling the listener is not armed, so the second stays queued.
        for _ in 0..5 {
            reactor.poll_once(Some(Duration::from_millis(20))).unwrap();
        }
        assert_eq!(reactor.active_connections(), 1);
        assert_eq!(factory.peers.lock().len(), 1);
        assert_eq!(factory.peers.lock()[0], first.local_addr().unwrap());
        drop(second);
    }

    #[test]
    fn test_socket_options_are_applied() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let stream = TcpStream::from_std(accepted);

        apply_socket_options(
            &stream,
            &[SocketOption::TcpNodelay(true), SocketOption::Keepalive(true)],
        )
        .unwrap();

        let socket = SockRef::from(&stream);
        assert!(socket.nodelay().unwrap());
        assert!(socket.keepalive().unwrap());
        drop(client);
    }

    fn connected_stream() -> (std::net::TcpStream, TcpStream, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        (client, TcpStream::from_std(accepted), peer)
    }

    fn acceptor_with_logs(
        reactor: &Reactor,
        config: ServerConfig,
    ) -> (ConnectionAcceptor, Arc<RecordingFactory>, CapturedLogs) {
        let logs = CapturedLogs::default();
        let server = server_with_logger(
            reactor,
            config,
            ServerLogger::with_dispatch(logs.dispatch()),
        );
        server.set_accepting(true);
        let factory = Arc::new(RecordingFactory::default());
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let acceptor = ConnectionAcceptor::new(listener, server, factory.clone());
        (acceptor, factory, logs)
    }

    #[test]
    fn test_accept_failure_is_logged_then_acceptor_keeps_working() {
        let reactor = Reactor::new().unwrap();
        let (acceptor, factory, logs) = acceptor_with_logs(&reactor, ServerConfig::default());
        let handle = reactor.handle();
        let mut spawned = Vec::new();

        let mut ctx = ReactorContext::new(0, &mut spawned, &handle);
        acceptor.handle_accepted(
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            &mut ctx,
        );
        assert_eq!(ctx.active_connections(), 0);
        assert!(logs.contents().contains("server accept() threw an exception"));

        let (_client, stream, peer) = connected_stream();
        acceptor.handle_accepted(Ok((stream, peer)), &mut ctx);
        assert_eq!(ctx.active_connections(), 1);
        drop(ctx);

        assert_eq!(spawned.len(), 1);
        assert_eq!(*factory.peers.lock(), vec![peer]);
    }

    #[test]
    fn test_accept_failure_is_silent_without_log_socket_errors() {
        let reactor = Reactor::new().unwrap();
        let (acceptor, _factory, logs) = acceptor_with_logs(
            &reactor,
            ServerConfig {
                log_socket_errors: false,
                ..ServerConfig::default()
            },
        );
        let handle = reactor.handle();
        let mut spawned = Vec::new();
        let mut ctx = ReactorContext::new(0, &mut spawned, &handle);

        acceptor.handle_accepted(
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            &mut ctx,
        );
        acceptor.handle_accepted(Err(io::Error::from(io::ErrorKind::WouldBlock)), &mut ctx);

        assert_eq!(ctx.active_connections(), 0);
        assert!(!logs.contents().contains("accept()"));
    }

    #[test]
    fn test_would_block_is_not_an_error() {
        let reactor = Reactor::new().unwrap();
        let (acceptor, _factory, logs) = acceptor_with_logs(&reactor, ServerConfig::default());
        let handle = reactor.handle();
        let mut spawned = Vec::new();
        let mut ctx = ReactorContext::new(0, &mut spawned, &handle);

        acceptor.handle_accepted(Err(io::Error::from(io::ErrorKind::WouldBlock)), &mut ctx);

        assert_eq!(ctx.active_connections(), 0);
        assert!(logs.contents().is_empty());
    }

    // TCP options on a datagram socket fail with ENOPROTOOPT.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_socket_option_failure_drops_only_that_connection() {
        use socket2::{Domain, Socket, Type};

        let reactor = Reactor::new().unwrap();
        let (acceptor, factory, logs) = acceptor_with_logs(
            &reactor,
            ServerConfig {
                socket_options: vec![SocketOption::TcpNodelay(true)],
                ..ServerConfig::default()
            },
        );
        let handle = reactor.handle();
        let mut spawned = Vec::new();
        let mut ctx = ReactorContext::new(0, &mut spawned, &handle);

        let datagram = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
        let broken = TcpStream::from_std(std::net::TcpStream::from(datagram));
        let bogus_peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        acceptor.handle_accepted(Ok((broken, bogus_peer)), &mut ctx);

        assert_eq!(ctx.active_connections(), 0);
        assert!(logs.contents().contains("dropping connection"));

        let (_client, stream, peer) = connected_stream();
        acceptor.handle_accepted(Ok((stream, peer)), &mut ctx);
        assert_eq!(ctx.active_connections(), 1);
        drop(ctx);

        assert_eq!(*factory.peers.lock(), vec![peer]);
    }
}
