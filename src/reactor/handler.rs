use mio::event::Source;

use crate::reactor::event_loop::ReactorHandle;

/// Outcome of a read or write callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// View of the reactor handed to handlers while they are polled or notified.
pub struct ReactorContext<'a> {
    active_connections: usize,
    spawned: &'a mut Vec<Box<dyn EventHandler>>,
    handle: &'a ReactorHandle,
}

impl<'a> ReactorContext<'a> {
    pub(crate) fn new(
        active_connections: usize,
        spawned: &'a mut Vec<Box<dyn EventHandler>>,
        handle: &'a ReactorHandle,
    ) -> Self {
        Self {
            active_connections,
            spawned,
            handle,
        }
    }

    /// Connections currently open, including ones registered during this tick.
    pub fn active_connections(&self) -> usize {
        self.active_connections
    }

    /// Add a connection handler; it is armed on the next tick.
    pub fn register_connection(&mut self, handler: Box<dyn EventHandler>) {
        self.spawned.push(handler);
        self.active_connections += 1;
    }

    pub fn handle(&self) -> &ReactorHandle {
        self.handle
    }
}

/// A socket-owning participant in the reactor.
///
/// Before every wait the reactor asks each handler whether it wants read or
/// write readiness and arms the socket accordingly; a handler that wants
/// neither is left out of the wait entirely. Callbacks must never block.
pub trait EventHandler: Send {
    fn source(&mut self) -> &mut dyn Source;

    fn is_readable(&self, ctx: &ReactorContext<'_>) -> bool;

    fn is_writable(&self, ctx: &ReactorContext<'_>) -> bool;

    /// Listening sockets receive `on_accept` instead of `on_read`, and are not
    /// counted as connections.
    fn is_acceptor(&self) -> bool {
        false
    }

    fn on_accept(&mut self, _ctx: &mut ReactorContext<'_>) {}

    fn on_read(&mut self, _ctx: &mut ReactorContext<'_>) -> Flow {
        Flow::Continue
    }

    fn on_write(&mut self, _ctx: &mut ReactorContext<'_>) -> Flow {
        Flow::Continue
    }

    /// Outbound connection established. Servers never see this.
    fn on_connect(&mut self, _ctx: &mut ReactorContext<'_>) {}

    /// The handler is about to be dropped by the reactor.
    fn on_close(&mut self) {}
}
