//! Single-threaded, non-blocking event loop.
//!
//! The reactor owns every registered socket and the active-connection count.
//! Nothing here is shared with worker threads except [`ReactorHandle`], which
//! only wakes the loop or asks it to stop.
use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, Waker, event::Event};

use crate::{
    reactor::handler::{EventHandler, Flow, ReactorContext},
    tracing_setup::configure_component_tracing,
};

const WAKE_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;

/// Cross-thread handle to a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
}

impl ReactorHandle {
    /// Interrupt the current wait so interest is re-evaluated.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            tracing::warn!("Failed to wake reactor: {}", e);
        }
    }

    /// Ask the loop to exit after the current tick.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

struct Slot {
    handler: Box<dyn EventHandler>,
    armed: Option<Interest>,
    is_connection: bool,
}

#[derive(Debug, Clone, Copy)]
struct Readiness {
    readable: bool,
    writable: bool,
    error: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable(),
            error: event.is_error(),
        }
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    slots: HashMap<Token, Slot>,
    next_token: usize,
    active_connections: usize,
    handle: ReactorHandle,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            slots: HashMap::new(),
            next_token: WAKE_TOKEN.0 + 1,
            active_connections: 0,
            handle: ReactorHandle {
                waker,
                stopping: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections
    }

    /// Number of registered handlers, listeners included.
    pub fn handler_count(&self) -> usize {
        self.slots.len()
    }

    /// Register a non-connection handler such as a listening socket.
    pub fn register(&mut self, handler: Box<dyn EventHandler>) -> Token {
        self.insert(handler, false)
    }

    fn insert(&mut self, handler: Box<dyn EventHandler>, is_connection: bool) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.slots.insert(
            token,
            Slot {
                handler,
                armed: None,
                is_connection,
            },
        );
        token
    }

    /// Run ticks until [`ReactorHandle::stop`] is called, then close every
    /// handler.
    pub fn run(&mut self, tick: Duration) -> io::Result<()> {
        let _span = configure_component_tracing("reactor").entered();
        tracing::debug!("Reactor started with {} handlers", self.slots.len());

        while !self.handle.is_stopping() {
            self.poll_once(Some(tick))?;
        }

        self.close_all();
        tracing::debug!("Reactor stopped");
        Ok(())
    }

    /// One tick: arm interest, wait, dispatch, then reap closed handlers.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let mut closed = self.arm();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let ready: Vec<(Token, Readiness)> = self
            .events
            .iter()
            .filter(|event| event.token() != WAKE_TOKEN)
            .map(|event| (event.token(), Readiness::from_event(event)))
            .collect();

        let mut spawned: Vec<Box<dyn EventHandler>> = Vec::new();
        for (token, readiness) in ready {
            let Some(slot) = self.slots.get_mut(&token) else {
                continue;
            };
            let mut ctx = ReactorContext::new(self.active_connections, &mut spawned, &self.handle);
            let flow = dispatch(slot, readiness, &mut ctx);
            self.active_connections = ctx.active_connections();
            if flow == Flow::Close {
                closed.push(token);
            }
        }

        for handler in spawned {
            self.insert(handler, true);
        }

        for token in closed {
            self.remove(token);
        }

        Ok(())
    }

    /// Re-arm every handler. Registering again each tick makes edge-triggered
    /// backends report sockets that are still ready. Returns handlers whose
    /// registration failed.
    fn arm(&mut self) -> Vec<Token> {
        let registry = self.poll.registry();
        let mut scratch = Vec::new();
        let ctx = ReactorContext::new(self.active_connections, &mut scratch, &self.handle);
        let mut failed = Vec::new();

        for (token, slot) in self.slots.iter_mut() {
            let wanted = interest_for(
                slot.handler.is_readable(&ctx),
                slot.handler.is_writable(&ctx),
            );

            let result = match (slot.armed, wanted) {
                (None, None) => Ok(()),
                (Some(_), None) => registry.deregister(slot.handler.source()),
                (None, Some(interest)) => {
                    registry.register(slot.handler.source(), *token, interest)
                }
                (Some(_), Some(interest)) => {
                    registry.reregister(slot.handler.source(), *token, interest)
                }
            };

            match result {
                Ok(()) => slot.armed = wanted,
                Err(e) => {
                    tracing::warn!("Failed to arm handler {:?}: {}", token, e);
                    failed.push(*token);
                }
            }
        }

        failed
    }

    fn remove(&mut self, token: Token) {
        let Some(mut slot) = self.slots.remove(&token) else {
            return;
        };
        if slot.armed.is_some() {
            let _ = self.poll.registry().deregister(slot.handler.source());
        }
        slot.handler.on_close();
        if slot.is_connection {
            self.active_connections = self.active_connections.saturating_sub(1);
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.slots.keys().copied().collect();
        for token in tokens {
            self.remove(token);
        }
    }
}

fn interest_for(readable: bool, writable: bool) -> Option<Interest> {
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

fn dispatch(slot: &mut Slot, readiness: Readiness, ctx: &mut ReactorContext<'_>) -> Flow {
    let armed = slot.armed;
    let handler = slot.handler.as_mut();

    if handler.is_acceptor() {
        if readiness.readable {
            handler.on_accept(ctx);
        }
        return Flow::Continue;
    }

    if readiness.error {
        return Flow::Close;
    }

    let wants_read = armed.is_some_and(|i| i.is_readable());
    let wants_write = armed.is_some_and(|i| i.is_writable());

    let mut flow = Flow::Continue;
    if readiness.readable && wants_read {
        flow = handler.on_read(ctx);
    }
    if flow == Flow::Continue && readiness.writable && wants_write {
        flow = handler.on_write(ctx);
    }
    flow
}
