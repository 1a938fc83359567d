pub mod event_loop;
pub mod handler;

pub use event_loop::{Reactor, ReactorHandle};
pub use handler::{EventHandler, Flow, ReactorContext};
