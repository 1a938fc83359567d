pub mod application;
pub mod channel;
pub mod dispatcher;
pub mod resolver;
pub mod task;

pub use application::{AppError, Application, Body, BodyChunk, ErrorInfo, body_from_iter};
pub use channel::ChannelFactory;
pub use dispatcher::{Rejected, TaskDispatcher};
pub use resolver::NameResolver;
pub use task::{BodyStream, ProxyInfo, RequestMetadata, ServiceTask, Task};
