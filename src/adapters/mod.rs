pub mod apps;
pub mod dns_resolver;
pub mod http_channel;
pub mod http_task;
pub mod thread_pool;

/// Re-export commonly used types from adapters
pub use apps::BuiltinApp;
pub use dns_resolver::SystemResolver;
pub use http_channel::{HttpChannel, HttpChannelFactory};
pub use http_task::{ChannelOutput, HttpServiceTask, HttpTask};
pub use thread_pool::ThreadedTaskDispatcher;
