pub mod command;
pub mod redis_transport;
pub mod retry;
pub mod router;
pub mod transport;

pub use command::{Command, CommandType};
pub use retry::{ExhaustedMessage, MessageRetryRunner, RetryPolicy};
pub use router::{CommandProcessor, CommandRouter};
pub use transport::{InMemoryNetwork, InMemoryTransport, Transport};
