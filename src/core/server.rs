//! State shared by the acceptor, every channel and every worker.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    config::ServerConfig,
    core::{
        bridge::{ApplicationBridge, ExecuteError},
        gateway::TaskGateway,
    },
    ports::{
        application::Application,
        task::{ServiceTask, Task},
    },
    reactor::ReactorHandle,
    tracing_setup::ServerLogger,
};

/// One running server instance. Created once at startup and shared behind an
/// `Arc`; everything here is read-only apart from the accepting flag.
pub struct Server {
    config: Arc<ServerConfig>,
    gateway: TaskGateway,
    bridge: ApplicationBridge,
    ident: String,
    server_name: String,
    port: u16,
    logger: ServerLogger,
    reactor: ReactorHandle,
    accepting: AtomicBool,
}

impl Server {
    pub fn new(
        config: Arc<ServerConfig>,
        application: Arc<dyn Application>,
        gateway: TaskGateway,
        server_name: String,
        port: u16,
        logger: ServerLogger,
        reactor: ReactorHandle,
    ) -> Self {
        Self {
            ident: config.full_ident(),
            bridge: ApplicationBridge::new(application, config.environ),
            config,
            gateway,
            server_name,
            port,
            logger,
            reactor,
            accepting: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// `gantry.http`, or `gantry.http (<sub protocol>)`.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Port actually bound, which differs from the configured one for port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn logger(&self) -> &ServerLogger {
        &self.logger
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    pub fn gateway(&self) -> &TaskGateway {
        &self.gateway
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Hand a parsed request to the dispatch gateway.
    pub fn submit(&self, task: Box<dyn ServiceTask>) {
        self.gateway.submit(task);
    }

    /// Run the application for `task`. Called from whichever thread services
    /// the task.
    pub fn execute_request(&self, task: Arc<dyn Task>) -> Result<(), ExecuteError> {
        self.bridge.execute_request(task)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("ident", &self.ident)
            .field("server_name", &self.server_name)
            .field("port", &self.port)
            .field("accepting", &self.is_accepting())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}
